//! Schematron bridge.
//!
//! A specification that targets a Schematron schema is turned into one that
//! targets XSLT: the schema is compiled to a validating stylesheet, the
//! specification is rewritten to point at it, and the files the
//! specification depends on are copied next to the rewritten copy so its
//! relative references still resolve.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use crate::config::SchematronConfig;
use crate::engine::{Destination, Invocation, Toolchain};
use crate::error::{Result, RunnerError};
use crate::event::{Attribute, Document, DocumentBuilder, EventSink, QName, attribute_value};
use crate::layout::FileLayout;
use crate::resolver::{ResourceResolver, Source, is_absolute_reference};
use crate::sax;

/// Stylesheet parameter naming the compiled schema
pub const STYLESHEET_URI_PARAMETER: &str = "stylesheet-uri";

/// Rewrite a Schematron specification; returns the rewritten copy.
pub fn bridge(
    toolchain: Toolchain<'_>,
    settings: &SchematronConfig,
    spec: &Source,
    layout: &FileLayout,
) -> Result<Source> {
    let spec_document = sax::parse_document(spec)?;
    let schema_reference = spec_document
        .root()
        .and_then(|(_, attributes)| attribute_value(attributes, "schematron"))
        .ok_or_else(|| RunnerError::InvalidSpecification {
            location: spec.system_id().to_string(),
            details: "root element has no schematron attribute".to_string(),
        })?
        .to_string();

    let schema = toolchain
        .resolver
        .require(&schema_reference, Some(spec.system_id()))?;
    let compiled_schema = compile_schema(toolchain, settings, &schema, &layout.compiled_schematron())?;

    let rewritten = layout.rewritten_spec();
    let rewrite = toolchain.load_stylesheet(&settings.rewrite, None)?;
    rewrite.execute(
        &Invocation::transform(&spec_document)
            .with_parameter(STYLESHEET_URI_PARAMETER, compiled_schema.display().to_string()),
        Destination::File(rewritten.clone()),
    )?;

    if !rewritten.is_file() {
        error!(
            "Schematron rewrite of {} produced no document at {}",
            spec.system_id(),
            rewritten.display()
        );
        return Err(RunnerError::RewriteIncomplete { path: rewritten });
    }

    let copied = copy_dependencies(
        toolchain,
        settings,
        spec,
        &spec_document,
        &layout.schematron_dir(),
    )?;
    info!(
        "Bridged {} to {} ({} dependencies copied)",
        spec.system_id(),
        rewritten.display(),
        copied
    );

    Ok(Source::from_file(&rewritten))
}

/// Run the three schema compilation stages; only the last one touches disk.
pub fn compile_schema(
    toolchain: Toolchain<'_>,
    settings: &SchematronConfig,
    schema: &Source,
    destination: &Path,
) -> Result<PathBuf> {
    let mut document = sax::parse_document(schema)?;

    for stage in [&settings.step1, &settings.step2] {
        let stylesheet = toolchain.load_stylesheet(stage, None)?;
        let mut builder = DocumentBuilder::new(None);
        stylesheet.execute(&Invocation::transform(&document), Destination::Events(&mut builder))?;
        debug!("Schematron stage {} done", stage);
        document = builder.into_document();
    }

    let stylesheet = toolchain.load_stylesheet(&settings.step3, None)?;
    stylesheet.execute(
        &Invocation::transform(&document),
        Destination::File(destination.to_path_buf()),
    )?;
    debug!(
        "Compiled schema {} to {}",
        schema.system_id(),
        destination.display()
    );
    Ok(destination.to_path_buf())
}

/// Copy every relative dependency the scanner reports into `target_dir`
fn copy_dependencies(
    toolchain: Toolchain<'_>,
    settings: &SchematronConfig,
    spec: &Source,
    spec_document: &Document,
    target_dir: &Path,
) -> Result<usize> {
    let scanner = toolchain.load_stylesheet(&settings.dependencies, None)?;
    let mut collector = DependencyCollector::default();
    scanner.execute(
        &Invocation::transform(spec_document),
        Destination::Events(&mut collector),
    )?;

    let mut copied = 0;
    for href in collector.into_hrefs() {
        if is_absolute_reference(&href) {
            debug!("Skipping absolute dependency {}", href);
            continue;
        }
        let Some(source) = toolchain.resolver.resolve(&href, Some(spec.system_id()))? else {
            warn!(
                "Dependency {} of {} could not be resolved",
                href,
                spec.system_id()
            );
            continue;
        };

        let destination = target_dir.join(&href);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&destination, source.read_bytes()?)?;
        debug!("Copied dependency {} to {}", href, destination.display());
        copied += 1;
    }
    Ok(copied)
}

/// Collects the `href` of every element in the scanner's output
#[derive(Debug, Default)]
struct DependencyCollector {
    hrefs: BTreeSet<String>,
}

impl DependencyCollector {
    fn into_hrefs(self) -> BTreeSet<String> {
        self.hrefs
    }
}

impl EventSink for DependencyCollector {
    fn start_element(&mut self, _name: &QName, attributes: &[Attribute]) -> Result<()> {
        if let Some(href) = attribute_value(attributes, "href") {
            let href = href.trim();
            if !href.is_empty() {
                self.hrefs.insert(href.to_string());
            }
        }
        Ok(())
    }

    fn end_element(&mut self, _name: &QName) -> Result<()> {
        Ok(())
    }

    fn text(&mut self, _content: &str) -> Result<()> {
        Ok(())
    }
}
