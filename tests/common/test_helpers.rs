use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use xspec_runner::config::{CompilerConfig, ReportsConfig, SchematronConfig};
use xspec_runner::engine::TransformEngine;
use xspec_runner::resolver::{EMBEDDED_SCHEME, EmbeddedResolver, ResolverChain};
use xspec_runner::runner::{RunnerSettings, SpecRunner};

pub const EXECUTION_ID: &str = "test-run";

/// A test root and a report root in one temporary directory
pub struct SpecWorkspace {
    pub temp_dir: TempDir,
    pub reports: ReportsConfig,
}

impl SpecWorkspace {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("tests")).unwrap();
        Self {
            temp_dir,
            reports: ReportsConfig::default(),
        }
    }

    pub fn test_root(&self) -> PathBuf {
        self.temp_dir.path().join("tests")
    }

    pub fn report_root(&self) -> PathBuf {
        self.temp_dir.path().join("reports")
    }

    /// `<report>/<execution-id>`
    pub fn run_dir(&self) -> PathBuf {
        self.report_root().join(EXECUTION_ID)
    }

    /// Write a file below the test root
    pub fn write(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.test_root().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    /// Write an XSLT specification wrapping `body`
    pub fn write_spec(&self, relative: &str, body: &str) -> PathBuf {
        self.write(relative, &xslt_spec(body))
    }

    pub fn settings(&self) -> RunnerSettings {
        RunnerSettings {
            test_root: self.test_root(),
            report_root: self.report_root(),
            execution_id: EXECUTION_ID.to_string(),
            compiler: CompilerConfig::default(),
            schematron: SchematronConfig::default(),
            reports: self.reports.clone(),
        }
    }

    pub fn runner(&self, engine: impl TransformEngine + 'static) -> SpecRunner {
        SpecRunner::new(
            ResolverChain::without_catalog(stylesheets()),
            Box::new(engine),
            self.settings(),
        )
    }
}

pub fn xslt_spec(body: &str) -> String {
    format!(
        r#"<x:description xmlns:x="http://www.jenitennison.com/xslt/xspec" stylesheet="target.xsl">
{}
</x:description>"#,
        body
    )
}

/// Every stylesheet the default configuration names, as embedded resources
pub fn stylesheets() -> EmbeddedResolver {
    let compiler = CompilerConfig::default();
    let schematron = SchematronConfig::default();
    let reports = ReportsConfig::default();

    let mut embedded = EmbeddedResolver::new();
    for uri in [
        &compiler.xslt,
        &compiler.xquery,
        &schematron.step1,
        &schematron.step2,
        &schematron.step3,
        &schematron.rewrite,
        &schematron.dependencies,
        &reports.html_formatter,
        &reports.coverage_reporter,
    ] {
        embedded.add(
            uri.trim_start_matches(EMBEDDED_SCHEME),
            b"<xsl:stylesheet xmlns:xsl=\"http://www.w3.org/1999/XSL/Transform\"/>".to_vec(),
        );
    }
    embedded.add(
        reports.coverage_css.trim_start_matches(EMBEDDED_SCHEME),
        b"body {}".to_vec(),
    );
    embedded
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| panic!("{}: {}", path.display(), e))
}
