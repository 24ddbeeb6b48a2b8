//! Runs a compiled test program and fans its report out.
//!
//! The report stream goes through a [`FanOut`] with four fixed slots: the
//! report-mode counter, the XML report serializer, the HTML report transform
//! and the CI report (JUnit or a discarding sink). Coverage, when enabled, is
//! recorded by the engine during the same execution and rendered afterwards.
//!
//! Report writers sit behind a [`ReportSlot`]: a writer that fails is taken
//! out of the stream and reported on its own, so it neither aborts the
//! execution nor keeps the other writers from finishing.

use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use crate::compiler::CompiledSpec;
use crate::config::ReportsConfig;
use crate::counter::{CountMode, Counts, ResultCounter};
use crate::engine::{Destination, EntryPoint, Executable, Invocation, ProgramKind, Toolchain};
use crate::error::{Result, RunnerError};
use crate::event::{Attribute, DocumentBuilder, EventSink, FanOut, NullSink, QName};
use crate::junit::JunitSink;
use crate::layout::FileLayout;
use crate::resolver::{ResourceResolver, Source};
use crate::sax;
use crate::serialize::XmlSerializer;

/// Stylesheet parameter carrying the coverage report's CSS location
pub const COVERAGE_CSS_PARAMETER: &str = "inline-css";

/// What one execution produced
#[derive(Debug)]
pub struct ExecutionOutcome {
    /// Counts observed in the report stream, partial when `error` is set
    pub run_counts: Counts,
    pub report_path: PathBuf,
    pub html_path: PathBuf,
    pub junit_path: Option<PathBuf>,
    /// Coverage trace, when coverage was enabled and the engine wrote one
    pub coverage_path: Option<PathBuf>,
    /// Engine or program failure that stopped the run
    pub error: Option<RunnerError>,
    /// Report writers that failed while every test still ran
    pub report_errors: Vec<RunnerError>,
}

impl ExecutionOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Sink that buffers a document and runs a stylesheet over it at the end
pub struct TransformSink<'e> {
    executable: &'e dyn Executable,
    destination: PathBuf,
    parameters: Vec<(String, String)>,
    builder: DocumentBuilder,
}

impl<'e> TransformSink<'e> {
    pub fn new(executable: &'e dyn Executable, destination: impl Into<PathBuf>) -> Self {
        Self {
            executable,
            destination: destination.into(),
            parameters: Vec::new(),
            builder: DocumentBuilder::new(None),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }
}

impl EventSink for TransformSink<'_> {
    fn start_document(&mut self) -> Result<()> {
        self.builder = DocumentBuilder::new(None);
        Ok(())
    }

    fn end_document(&mut self) -> Result<()> {
        let document = std::mem::take(&mut self.builder).into_document();
        let mut invocation = Invocation::transform(&document);
        for (name, value) in &self.parameters {
            invocation = invocation.with_parameter(name.clone(), value.clone());
        }
        self.executable
            .execute(&invocation, Destination::File(self.destination.clone()))?;
        debug!("Wrote {}", self.destination.display());
        Ok(())
    }

    fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> Result<()> {
        self.builder.start_prefix_mapping(prefix, uri)
    }

    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<()> {
        self.builder.start_element(name, attributes)
    }

    fn end_element(&mut self, name: &QName) -> Result<()> {
        self.builder.end_element(name)
    }

    fn text(&mut self, content: &str) -> Result<()> {
        self.builder.text(content)
    }

    fn comment(&mut self, content: &str) -> Result<()> {
        self.builder.comment(content)
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
        self.builder.processing_instruction(target, data)
    }
}

/// One report writer in the fan-out. Its first error is kept and the writer
/// receives nothing more; the event stream itself never sees the error.
pub struct ReportSlot<'s> {
    path: PathBuf,
    writer: &'s mut dyn EventSink,
    error: Option<RunnerError>,
}

impl<'s> ReportSlot<'s> {
    pub fn new(path: impl Into<PathBuf>, writer: &'s mut dyn EventSink) -> Self {
        Self {
            path: path.into(),
            writer,
            error: None,
        }
    }

    fn guard(&mut self, event: impl FnOnce(&mut dyn EventSink) -> Result<()>) -> Result<()> {
        if self.error.is_none()
            && let Err(e) = event(&mut *self.writer)
        {
            warn!("Report writer for {} failed: {}", self.path.display(), e);
            self.error = Some(RunnerError::ReportWriter {
                path: self.path.clone(),
                details: e.to_string(),
            });
        }
        Ok(())
    }

    pub fn into_error(self) -> Option<RunnerError> {
        self.error
    }
}

impl EventSink for ReportSlot<'_> {
    fn start_document(&mut self) -> Result<()> {
        self.guard(|writer| writer.start_document())
    }

    fn end_document(&mut self) -> Result<()> {
        self.guard(|writer| writer.end_document())
    }

    fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> Result<()> {
        self.guard(|writer| writer.start_prefix_mapping(prefix, uri))
    }

    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<()> {
        self.guard(|writer| writer.start_element(name, attributes))
    }

    fn end_element(&mut self, name: &QName) -> Result<()> {
        self.guard(|writer| writer.end_element(name))
    }

    fn text(&mut self, content: &str) -> Result<()> {
        self.guard(|writer| writer.text(content))
    }

    fn comment(&mut self, content: &str) -> Result<()> {
        self.guard(|writer| writer.comment(content))
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
        self.guard(|writer| writer.processing_instruction(target, data))
    }
}

/// Execute `compiled`, writing every report artifact under `layout`.
///
/// Never fails: an error that stops the run is kept in
/// [`ExecutionOutcome::error`] next to whatever was counted before it.
pub fn execute(
    toolchain: Toolchain<'_>,
    settings: &ReportsConfig,
    compiled: &CompiledSpec,
    layout: &FileLayout,
) -> ExecutionOutcome {
    let mut outcome = ExecutionOutcome {
        run_counts: Counts::default(),
        report_path: layout.xml_report(),
        html_path: layout.html_report(),
        junit_path: settings.junit.then(|| layout.junit_report()),
        coverage_path: None,
        error: None,
        report_errors: Vec::new(),
    };

    let coverage_trace = settings.coverage.then(|| layout.coverage_trace());
    let mut counter = ResultCounter::new(CountMode::Report);
    let result = run_with_reports(
        toolchain,
        settings,
        compiled,
        layout,
        &mut counter,
        coverage_trace.clone(),
        &mut outcome.report_errors,
    );
    outcome.run_counts = counter.counts();

    if let Err(e) = result {
        error!(
            "Execution of {} failed after {} test(s): {}",
            compiled.executable_path.display(),
            outcome.run_counts.tests,
            e
        );
        outcome.error = Some(RunnerError::ExecutionFailure {
            spec: layout.relative_source().to_path_buf(),
            details: e.to_string(),
        });
    }

    if let Some(trace) = coverage_trace {
        if trace.is_file() {
            if let Err(e) = render_coverage(toolchain, settings, &trace, &layout.coverage_report()) {
                warn!("Coverage report for {} not written: {}", trace.display(), e);
            }
            outcome.coverage_path = Some(trace);
        } else {
            warn!("No coverage trace was recorded at {}", trace.display());
        }
    }

    info!(
        "Ran {}: {} test(s), {} passed, {} pending, {} failed",
        layout.relative_source().display(),
        outcome.run_counts.tests,
        outcome.run_counts.passed,
        outcome.run_counts.pending_tests,
        outcome.run_counts.failed
    );
    outcome
}

fn run_with_reports(
    toolchain: Toolchain<'_>,
    settings: &ReportsConfig,
    compiled: &CompiledSpec,
    layout: &FileLayout,
    counter: &mut ResultCounter<'_>,
    coverage_trace: Option<PathBuf>,
    report_errors: &mut Vec<RunnerError>,
) -> Result<()> {
    let program = toolchain
        .engine
        .load(compiled.kind, &Source::from_file(&compiled.executable_path))?;
    let formatter = toolchain.load_stylesheet(&settings.html_formatter, None)?;

    let mut xml_serializer = XmlSerializer::create(&layout.xml_report())?;
    let mut html_transform = TransformSink::new(formatter.as_ref(), layout.html_report());
    let mut junit = settings
        .junit
        .then(|| JunitSink::new(layout.name(), layout.junit_report()));
    let mut discard = NullSink;
    let ci_writer: &mut dyn EventSink = match junit.as_mut() {
        Some(sink) => sink,
        None => &mut discard,
    };

    let mut xml_report = ReportSlot::new(layout.xml_report(), &mut xml_serializer);
    let mut html_report = ReportSlot::new(layout.html_report(), &mut html_transform);
    let mut ci_report = ReportSlot::new(layout.junit_report(), ci_writer);

    let invocation = Invocation::new(entry_point(compiled.kind)).with_coverage(coverage_trace);
    let result = {
        let mut reports = FanOut::new([
            counter as &mut dyn EventSink,
            &mut xml_report as &mut dyn EventSink,
            &mut html_report as &mut dyn EventSink,
            &mut ci_report as &mut dyn EventSink,
        ]);
        program.execute(&invocation, Destination::Events(&mut reports))
    };

    report_errors.extend(
        [xml_report, html_report, ci_report]
            .into_iter()
            .filter_map(ReportSlot::into_error),
    );
    result
}

fn entry_point(kind: ProgramKind) -> EntryPoint {
    match kind {
        ProgramKind::Xslt => EntryPoint::xspec_main(),
        ProgramKind::XQuery => EntryPoint::Query,
    }
}

/// Render a coverage trace to HTML. A missing stylesheet for the CSS only
/// drops the styling.
fn render_coverage(
    toolchain: Toolchain<'_>,
    settings: &ReportsConfig,
    trace: &Path,
    destination: &Path,
) -> Result<()> {
    let reporter = toolchain.load_stylesheet(&settings.coverage_reporter, None)?;
    let document = sax::parse_document(&Source::from_file(trace))?;

    let mut invocation = Invocation::transform(&document);
    match toolchain.resolver.resolve(&settings.coverage_css, None) {
        Ok(Some(css)) => {
            invocation = invocation.with_parameter(COVERAGE_CSS_PARAMETER, css.system_id());
        }
        Ok(None) => debug!("Coverage CSS {} not found", settings.coverage_css),
        Err(e) => debug!("Coverage CSS {} not resolved: {}", settings.coverage_css, e),
    }

    reporter.execute(&invocation, Destination::File(destination.to_path_buf()))?;
    debug!("Wrote coverage report {}", destination.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TransformEngine;
    use crate::error::EngineError;
    use crate::resolver::{EmbeddedResolver, ResolverChain};
    use crate::serialize;
    use std::fs;
    use tempfile::TempDir;

    const REPORT: &str = r#"<x:report xmlns:x="http://www.jenitennison.com/xslt/xspec" xmlns:my="urn:my">
  <x:scenario><x:label>s</x:label>
    <x:test successful="true"><x:label>a</x:label><x:expect select="my:square(2)"/></x:test>
    <x:test successful="false"><x:label>b</x:label></x:test>
    <x:test pending="later"><x:label>c</x:label></x:test>
  </x:scenario>
</x:report>"#;

    /// Compiled programs stream `REPORT`; stylesheets copy their input to a file
    #[derive(Default)]
    struct ReportEngine {
        fail_after_first_scenario: bool,
        broken_formatter: bool,
    }

    struct ReportExecutable {
        kind: ProgramKind,
        program: String,
        fail: bool,
        broken: bool,
    }

    impl TransformEngine for ReportEngine {
        fn load(&self, kind: ProgramKind, program: &Source) -> Result<Box<dyn Executable>> {
            Ok(Box::new(ReportExecutable {
                kind,
                program: program.system_id().to_string(),
                fail: self.fail_after_first_scenario,
                broken: self.broken_formatter
                    && program
                        .system_id()
                        .ends_with(ReportsConfig::default().html_formatter.trim_start_matches("cp:/")),
            }))
        }
    }

    impl Executable for ReportExecutable {
        fn execute(&self, invocation: &Invocation<'_>, destination: Destination<'_>) -> Result<()> {
            if self.broken {
                return Err(EngineError::Transform {
                    details: "formatter exploded".to_string(),
                }
                .into());
            }
            if self.program.starts_with("cp:/") {
                let document = invocation.input.cloned().unwrap_or_default();
                if let Destination::File(path) = destination {
                    serialize::write_document(&document, &path)?;
                }
                return Ok(());
            }

            let expected = match self.kind {
                ProgramKind::Xslt => EntryPoint::xspec_main(),
                ProgramKind::XQuery => EntryPoint::Query,
            };
            assert_eq!(invocation.entry_point, expected);
            if let Some(trace) = &invocation.coverage_output {
                fs::write(trace, "<trace/>")?;
            }

            let Destination::Events(sink) = destination else {
                panic!("compiled programs stream their report");
            };
            if self.fail {
                sink.start_document()?;
                let x = |local: &str| {
                    QName::with_namespace(
                        Some("x".to_string()),
                        local,
                        Some(crate::XSPEC_NS.to_string()),
                    )
                };
                sink.start_element(&x("report"), &[])?;
                sink.start_element(&x("test"), &[Attribute::new("successful", "true")])?;
                sink.end_element(&x("test"))?;
                return Err(EngineError::ProcessFailed {
                    status: 2,
                    stderr: "dynamic error".to_string(),
                }
                .into());
            }
            sax::parse_str(REPORT, sink)
        }
    }

    fn resolver() -> ResolverChain {
        let settings = ReportsConfig::default();
        let mut embedded = EmbeddedResolver::new();
        for uri in [&settings.html_formatter, &settings.coverage_reporter] {
            embedded.add(uri.trim_start_matches("cp:/"), b"<xsl:stylesheet/>".to_vec());
        }
        ResolverChain::without_catalog(embedded)
    }

    fn compiled(dir: &Path, kind: ProgramKind) -> (CompiledSpec, FileLayout) {
        let spec = dir.join("suite").join("math.xspec");
        let layout = FileLayout::new(dir, &dir.join("reports"), "run", &spec);
        let executable_path = layout.compiled(kind);
        fs::create_dir_all(executable_path.parent().unwrap()).unwrap();
        fs::write(&executable_path, "<compiled/>").unwrap();
        let compiled = CompiledSpec {
            executable_path,
            kind,
            compile_counts: Counts {
                tests: 3,
                pending_tests: 1,
                ..Counts::default()
            },
        };
        (compiled, layout)
    }

    #[test]
    fn test_all_report_artifacts_written() {
        let temp_dir = TempDir::new().unwrap();
        let (compiled, layout) = compiled(temp_dir.path(), ProgramKind::Xslt);
        let resolver = resolver();
        let engine = ReportEngine::default();
        let settings = ReportsConfig {
            junit: true,
            ..ReportsConfig::default()
        };

        let outcome = execute(Toolchain::new(&resolver, &engine), &settings, &compiled, &layout);

        assert!(outcome.is_complete());
        assert_eq!(outcome.run_counts.tests, 3);
        assert_eq!(outcome.run_counts.passed, 1);
        assert_eq!(outcome.run_counts.failed, 1);
        assert_eq!(outcome.run_counts.pending_tests, 1);
        assert!(layout.xml_report().is_file());
        assert!(layout.html_report().is_file());
        assert_eq!(outcome.junit_path, Some(layout.junit_report()));
        assert!(layout.junit_report().is_file());
        assert!(outcome.coverage_path.is_none());

        let xml = fs::read_to_string(layout.xml_report()).unwrap();
        let html = fs::read_to_string(layout.html_report()).unwrap();
        assert!(xml.contains("successful=\"false\""));
        assert!(html.contains("successful=\"false\""));
    }

    #[test]
    fn test_junit_slot_discards_when_disabled() {
        let temp_dir = TempDir::new().unwrap();
        let (compiled, layout) = compiled(temp_dir.path(), ProgramKind::XQuery);
        let resolver = resolver();
        let engine = ReportEngine::default();

        let outcome = execute(
            Toolchain::new(&resolver, &engine),
            &ReportsConfig::default(),
            &compiled,
            &layout,
        );

        assert!(outcome.is_complete());
        assert!(outcome.junit_path.is_none());
        assert!(outcome.report_errors.is_empty());
        assert!(!layout.junit_report().exists());
        assert_eq!(outcome.run_counts.tests, 3);
    }

    #[test]
    fn test_engine_failure_keeps_partial_counts() {
        let temp_dir = TempDir::new().unwrap();
        let (compiled, layout) = compiled(temp_dir.path(), ProgramKind::Xslt);
        let resolver = resolver();
        let engine = ReportEngine {
            fail_after_first_scenario: true,
            ..ReportEngine::default()
        };

        let outcome = execute(
            Toolchain::new(&resolver, &engine),
            &ReportsConfig::default(),
            &compiled,
            &layout,
        );

        assert!(matches!(
            outcome.error,
            Some(RunnerError::ExecutionFailure { .. })
        ));
        assert_eq!(outcome.run_counts.tests, 1);
        assert_eq!(outcome.run_counts.passed, 1);
    }

    #[test]
    fn test_failing_html_writer_leaves_other_reports_intact() {
        let temp_dir = TempDir::new().unwrap();
        let (compiled, layout) = compiled(temp_dir.path(), ProgramKind::Xslt);
        let resolver = resolver();
        let engine = ReportEngine {
            broken_formatter: true,
            ..ReportEngine::default()
        };
        let settings = ReportsConfig {
            junit: true,
            ..ReportsConfig::default()
        };

        let outcome = execute(Toolchain::new(&resolver, &engine), &settings, &compiled, &layout);

        assert!(outcome.is_complete());
        assert_eq!(outcome.run_counts.tests, 3);
        assert!(layout.xml_report().is_file());
        assert!(layout.junit_report().is_file());
        assert!(!layout.html_report().exists());

        assert_eq!(outcome.report_errors.len(), 1);
        match &outcome.report_errors[0] {
            RunnerError::ReportWriter { path, details } => {
                assert_eq!(path, &layout.html_report());
                assert!(details.contains("formatter exploded"));
            }
            other => panic!("Expected a report writer error, got {:?}", other),
        }
    }

    #[test]
    fn test_xml_report_keeps_namespaces_used_in_values() {
        let temp_dir = TempDir::new().unwrap();
        let (compiled, layout) = compiled(temp_dir.path(), ProgramKind::Xslt);
        let resolver = resolver();
        let engine = ReportEngine::default();

        let outcome = execute(
            Toolchain::new(&resolver, &engine),
            &ReportsConfig::default(),
            &compiled,
            &layout,
        );

        assert!(outcome.is_complete());
        let xml = fs::read_to_string(layout.xml_report()).unwrap();
        let html = fs::read_to_string(layout.html_report()).unwrap();
        assert!(xml.contains(r#"xmlns:my="urn:my""#));
        assert!(html.contains(r#"xmlns:my="urn:my""#));
    }

    #[test]
    fn test_coverage_report_rendered_without_css() {
        let temp_dir = TempDir::new().unwrap();
        let (compiled, layout) = compiled(temp_dir.path(), ProgramKind::Xslt);
        let resolver = resolver();
        let engine = ReportEngine::default();
        let settings = ReportsConfig {
            coverage: true,
            ..ReportsConfig::default()
        };

        let outcome = execute(Toolchain::new(&resolver, &engine), &settings, &compiled, &layout);

        assert!(outcome.is_complete());
        assert_eq!(outcome.coverage_path, Some(layout.coverage_trace()));
        assert!(layout.coverage_report().is_file());
    }

    #[test]
    fn test_missing_html_formatter_fails_execution() {
        let temp_dir = TempDir::new().unwrap();
        let (compiled, layout) = compiled(temp_dir.path(), ProgramKind::Xslt);
        let resolver = ResolverChain::without_catalog(EmbeddedResolver::new());
        let engine = ReportEngine::default();

        let outcome = execute(
            Toolchain::new(&resolver, &engine),
            &ReportsConfig::default(),
            &compiled,
            &layout,
        );
        assert!(!outcome.is_complete());
        assert_eq!(outcome.run_counts, Counts::default());
    }
}
