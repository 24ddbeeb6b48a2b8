//! Per-file pipeline and run-level aggregation.
//!
//! Every specification goes through classify → (Schematron bridge) →
//! compile → execute, one file at a time. A failing file never stops the
//! run; its record carries the error and the run reports a single aggregate
//! failure at the end.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use serde::Serialize;

use crate::classify::{SpecKind, classify};
use crate::compiler;
use crate::config::{CompilerConfig, Config, ConfigManager, ReportsConfig, SchematronConfig};
use crate::counter::Counts;
use crate::engine::{CommandEngine, ProgramKind, Toolchain, TransformEngine};
use crate::error::{Result, RunnerError};
use crate::executor;
use crate::file_discovery::FileDiscovery;
use crate::layout::FileLayout;
use crate::resolver::{CatalogResolver, EmbeddedResolver, ResolverChain, Source, generate_catalog};
use crate::schematron;

/// Per-file test counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TestCounts {
    pub total: u64,
    pub passed: u64,
    pub pending: u64,
    pub failed: u64,
    /// Tests known at compile time that never showed up in the report
    pub missed: u64,
}

impl TestCounts {
    /// Combine compile-time and run-time counts
    pub fn from_counts(compile: Counts, run: Counts) -> Self {
        Self {
            total: run.tests,
            passed: run.passed,
            pending: run.pending_tests,
            failed: run.failed,
            missed: compile.tests.saturating_sub(run.tests),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.missed == 0
    }
}

impl std::ops::AddAssign for TestCounts {
    fn add_assign(&mut self, other: Self) {
        self.total += other.total;
        self.passed += other.passed;
        self.pending += other.pending;
        self.failed += other.failed;
        self.missed += other.missed;
    }
}

/// Status of a single specification file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Processing has started
    Running,
    /// Every test passed or is pending
    Passed,
    /// Some tests failed or were missed
    Failed,
    /// The pipeline could not finish the file
    Error,
}

/// Record of one processed specification file
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedFile {
    /// Path relative to the test root
    pub source: PathBuf,
    pub kind: Option<SpecKind>,
    /// The XML report
    pub report_path: PathBuf,
    pub coverage_path: Option<PathBuf>,
    pub counts: TestCounts,
    pub status: FileStatus,
    pub error: Option<String>,
    /// Report writers that failed; they do not change the status
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub report_errors: Vec<String>,
    pub duration: Duration,
}

impl ProcessedFile {
    fn started(layout: &FileLayout) -> Self {
        Self {
            source: layout.relative_source().to_path_buf(),
            kind: None,
            report_path: layout.xml_report(),
            coverage_path: None,
            counts: TestCounts::default(),
            status: FileStatus::Running,
            error: None,
            report_errors: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == FileStatus::Passed
    }
}

/// Progress update for a run
#[derive(Debug, Clone)]
pub struct RunProgress {
    pub current_file: Option<PathBuf>,
    pub completed: usize,
    pub total: usize,
    pub phase: RunPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Discovery,
    Running,
    Complete,
}

/// Progress callback type for run updates
pub type ProgressCallback = Arc<dyn Fn(RunProgress) + Send + Sync>;

/// Aggregated results of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunResults {
    pub total_files: usize,
    pub passed_files: usize,
    pub failed_files: usize,
    pub error_files: usize,
    pub totals: TestCounts,
    pub total_duration: Duration,
    pub file_results: Vec<ProcessedFile>,
}

impl RunResults {
    /// Aggregate individual file records into a summary
    pub fn aggregate(file_results: Vec<ProcessedFile>) -> Self {
        let mut passed_files = 0;
        let mut failed_files = 0;
        let mut error_files = 0;
        let mut totals = TestCounts::default();
        let mut total_duration = Duration::ZERO;

        for result in &file_results {
            match result.status {
                FileStatus::Passed => passed_files += 1,
                FileStatus::Failed => failed_files += 1,
                FileStatus::Error | FileStatus::Running => error_files += 1,
            }
            totals += result.counts;
            total_duration += result.duration;
        }

        Self {
            total_files: file_results.len(),
            passed_files,
            failed_files,
            error_files,
            totals,
            total_duration,
            file_results,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.passed_files == self.total_files
    }

    pub fn has_failures(&self) -> bool {
        self.failed_files > 0 || self.error_files > 0
    }

    /// The single run-level failure, once every file has been attempted
    pub fn ensure_success(&self) -> Result<()> {
        if self.has_failures() {
            return Err(RunnerError::RunFailed {
                failed_files: self.failed_files + self.error_files,
                total_files: self.total_files,
            });
        }
        Ok(())
    }
}

/// Where a run reads from and writes to, and which stylesheets it uses
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerSettings {
    pub test_root: PathBuf,
    pub report_root: PathBuf,
    pub execution_id: String,
    pub compiler: CompilerConfig,
    pub schematron: SchematronConfig,
    pub reports: ReportsConfig,
}

impl RunnerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            test_root: config
                .runner
                .test_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(".")),
            report_root: config.runner.report_dir.clone(),
            execution_id: ConfigManager::get_execution_id(config),
            compiler: config.compiler.clone(),
            schematron: config.schematron.clone(),
            reports: config.reports.clone(),
        }
    }

    /// `<report>/<execution-id>`
    pub fn run_dir(&self) -> PathBuf {
        self.report_root.join(&self.execution_id)
    }
}

/// Runs specification files through the whole pipeline
pub struct SpecRunner {
    resolver: ResolverChain,
    engine: Box<dyn TransformEngine>,
    settings: RunnerSettings,
}

impl SpecRunner {
    pub fn new(
        resolver: ResolverChain,
        engine: Box<dyn TransformEngine>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            resolver,
            engine,
            settings,
        }
    }

    /// Build the resolver chain and command engine a configuration describes.
    ///
    /// The run's catalog is generated here, once, before any file is
    /// processed.
    pub fn from_config(config: &Config) -> Result<Self> {
        let settings = RunnerSettings::from_config(config);

        let mut embedded = EmbeddedResolver::new();
        if let Some(root) = &config.resolver.resource_root {
            embedded = embedded.with_root(root);
        }
        let embedded = Arc::new(embedded);

        let catalog_path = config
            .resolver
            .generated_catalog
            .clone()
            .unwrap_or_else(|| settings.run_dir().join("catalog.xml"));
        let catalog_path = generate_catalog(
            &config.resolver.mappings,
            config.resolver.catalog.as_deref(),
            &catalog_path,
        )?;
        info!("Generated catalog {}", catalog_path.display());

        let catalog = CatalogResolver::load(&catalog_path, Arc::clone(&embedded))?;
        let resolver = ResolverChain::new(embedded, catalog);
        let engine = CommandEngine::new(config.engine.command_engine_config(Some(catalog_path)));

        Ok(Self::new(resolver, Box::new(engine), settings))
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    pub fn toolchain(&self) -> Toolchain<'_> {
        Toolchain::new(&self.resolver, self.engine.as_ref())
    }

    /// Discover specifications under `path` and run them all
    pub async fn run_path(
        &self,
        path: &Path,
        discovery: &FileDiscovery,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<RunResults> {
        if let Some(ref callback) = progress_callback {
            callback(RunProgress {
                current_file: None,
                completed: 0,
                total: 0,
                phase: RunPhase::Discovery,
            });
        }

        let files = discovery.discover_files(path).await?;
        info!("Discovered {} specification file(s)", files.len());

        Ok(self.run_files(&files, progress_callback))
    }

    /// Run `files` in order, one at a time
    pub fn run_files(
        &self,
        files: &[PathBuf],
        progress_callback: Option<ProgressCallback>,
    ) -> RunResults {
        let started = Instant::now();
        let mut processed = Vec::with_capacity(files.len());

        for (completed, file) in files.iter().enumerate() {
            if let Some(ref callback) = progress_callback {
                callback(RunProgress {
                    current_file: Some(file.clone()),
                    completed,
                    total: files.len(),
                    phase: RunPhase::Running,
                });
            }
            processed.push(self.process_file(file));
        }

        let mut results = RunResults::aggregate(processed);
        results.total_duration = started.elapsed();

        if let Some(ref callback) = progress_callback {
            callback(RunProgress {
                current_file: None,
                completed: results.total_files,
                total: results.total_files,
                phase: RunPhase::Complete,
            });
        }
        results
    }

    /// Run one specification and return its record
    pub fn process_file(&self, spec: &Path) -> ProcessedFile {
        let started = Instant::now();
        let layout = FileLayout::new(
            &self.settings.test_root,
            &self.settings.report_root,
            &self.settings.execution_id,
            spec,
        );
        let mut record = ProcessedFile::started(&layout);
        info!("Processing {}", record.source.display());

        match self.run_pipeline(spec, &layout, &mut record) {
            Ok(()) if record.counts.is_success() => record.status = FileStatus::Passed,
            Ok(()) => {
                record.status = FileStatus::Failed;
                if record.counts.missed > 0 {
                    warn!(
                        "{}: {} test(s) never reported",
                        record.source.display(),
                        record.counts.missed
                    );
                    record.error = Some(format!("{} test(s) missed", record.counts.missed));
                }
            }
            Err(e) => {
                error!("{}: {}", record.source.display(), e);
                record.status = FileStatus::Error;
                record.error = Some(e.to_string());
            }
        }

        record.duration = started.elapsed();
        record
    }

    fn run_pipeline(
        &self,
        spec: &Path,
        layout: &FileLayout,
        record: &mut ProcessedFile,
    ) -> Result<()> {
        let toolchain = self.toolchain();
        let mut source = Source::from_file(spec);
        let mut kind = classify(&source)?;
        record.kind = Some(kind);

        if kind == SpecKind::Schematron {
            source = schematron::bridge(toolchain, &self.settings.schematron, &source, layout)?;
            kind = classify(&source)?;
        }

        let program_kind = match kind {
            SpecKind::Xslt => ProgramKind::Xslt,
            SpecKind::XQuery => ProgramKind::XQuery,
            SpecKind::Schematron => {
                return Err(RunnerError::InvalidSpecification {
                    location: source.system_id().to_string(),
                    details: "rewritten specification still targets Schematron".to_string(),
                });
            }
        };

        let compile_failure = |details: String| RunnerError::CompileFailure {
            spec: layout.relative_source().to_path_buf(),
            details,
        };
        let compiled =
            compiler::compile(toolchain, &self.settings.compiler, &source, program_kind, layout)
                .map_err(|e| compile_failure(e.to_string()))?
                .ok_or_else(|| compile_failure("transform engine rejected the compilation".to_string()))?;

        let outcome = executor::execute(toolchain, &self.settings.reports, &compiled, layout);
        record.counts = TestCounts::from_counts(compiled.compile_counts, outcome.run_counts);
        record.report_path = outcome.report_path;
        record.coverage_path = outcome.coverage_path;
        record.report_errors = outcome
            .report_errors
            .iter()
            .map(ToString::to_string)
            .collect();

        match outcome.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
