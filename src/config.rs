use crate::cli::{Cli, OutputFormat};
use crate::engine::{CommandEngineConfig, ProgramKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub runner: RunnerConfig,
    pub resolver: ResolverConfig,
    pub engine: EngineConfig,
    pub compiler: CompilerConfig,
    pub schematron: SchematronConfig,
    pub reports: ReportsConfig,
    pub output: OutputConfig,
}

/// Which files run and where their reports go
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Root that report directories mirror; defaults to the path being run
    pub test_dir: Option<PathBuf>,
    /// Root directory for reports
    pub report_dir: PathBuf,
    /// Sub-directory of `report_dir` for one run; a timestamp when unset
    pub execution_id: Option<String>,
    /// File extensions to process
    pub extensions: Vec<String>,
    /// Include patterns (glob syntax)
    pub include_patterns: Vec<String>,
    /// Exclude patterns (glob syntax)
    pub exclude_patterns: Vec<String>,
    /// Maximum directory depth for discovery
    pub max_depth: Option<usize>,
    pub follow_symlinks: bool,
}

/// Resource resolution settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ResolverConfig {
    /// Directory backing `cp:/` resources not registered in memory
    pub resource_root: Option<PathBuf>,
    /// User catalog chained after the generated one
    pub catalog: Option<PathBuf>,
    /// Where the generated catalog is written; inside the run directory when unset
    pub generated_catalog: Option<PathBuf>,
    /// URI prefix to local directory rewrites added to the generated catalog
    pub mappings: BTreeMap<String, PathBuf>,
}

/// External processor command lines
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub xslt_command: Vec<String>,
    pub xquery_command: Vec<String>,
    /// Arguments enabling a coverage trace; `{output}` is replaced by the trace path
    pub coverage_arguments: Vec<String>,
}

/// Meta-transforms that compile specifications
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompilerConfig {
    pub xslt: String,
    pub xquery: String,
}

/// Stylesheets of the Schematron bridge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchematronConfig {
    /// Include expansion
    pub step1: String,
    /// Abstract pattern expansion
    pub step2: String,
    /// SVRL-for-XSLT generation
    pub step3: String,
    /// Rewrites a Schematron specification into an XSLT one
    pub rewrite: String,
    /// Lists the files a specification depends on
    pub dependencies: String,
}

/// Report artifacts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportsConfig {
    pub junit: bool,
    pub coverage: bool,
    pub html_formatter: String,
    pub coverage_reporter: String,
    pub coverage_css: String,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format
    pub format: OutputFormatConfig,
    /// Verbose output
    pub verbose: bool,
    /// Quiet mode (failures only)
    pub quiet: bool,
}

/// Output format configuration (serializable version of CLI OutputFormat)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormatConfig {
    Human,
    Json,
    Summary,
}

impl From<OutputFormat> for OutputFormatConfig {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Human => OutputFormatConfig::Human,
            OutputFormat::Json => OutputFormatConfig::Json,
            OutputFormat::Summary => OutputFormatConfig::Summary,
        }
    }
}

impl From<OutputFormatConfig> for OutputFormat {
    fn from(format: OutputFormatConfig) -> Self {
        match format {
            OutputFormatConfig::Human => OutputFormat::Human,
            OutputFormatConfig::Json => OutputFormat::Json,
            OutputFormatConfig::Summary => OutputFormat::Summary,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            test_dir: None,
            report_dir: PathBuf::from("target").join("xspec-reports"),
            execution_id: None,
            extensions: vec!["xspec".to_string()],
            include_patterns: vec![],
            exclude_patterns: vec![],
            max_depth: None,
            follow_symlinks: false,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            xslt_command: vec!["java".to_string(), "net.sf.saxon.Transform".to_string()],
            xquery_command: vec!["java".to_string(), "net.sf.saxon.Query".to_string()],
            coverage_arguments: vec![],
        }
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            xslt: "cp:/xspec/compiler/compile-xslt-tests.xsl".to_string(),
            xquery: "cp:/xspec/compiler/compile-xquery-tests.xsl".to_string(),
        }
    }
}

impl CompilerConfig {
    pub fn stylesheet_for(&self, kind: ProgramKind) -> &str {
        match kind {
            ProgramKind::Xslt => &self.xslt,
            ProgramKind::XQuery => &self.xquery,
        }
    }
}

impl Default for SchematronConfig {
    fn default() -> Self {
        Self {
            step1: "cp:/xspec/schematron/iso-schematron/iso_dsdl_include.xsl".to_string(),
            step2: "cp:/xspec/schematron/iso-schematron/iso_abstract_expand.xsl".to_string(),
            step3: "cp:/xspec/schematron/iso-schematron/iso_svrl_for_xslt2.xsl".to_string(),
            rewrite: "cp:/xspec/schematron/schut-to-xspec.xsl".to_string(),
            dependencies: "cp:/xspec/schematron/xspec-dependencies.xsl".to_string(),
        }
    }
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            junit: false,
            coverage: false,
            html_formatter: "cp:/xspec/reporter/format-xspec-report.xsl".to_string(),
            coverage_reporter: "cp:/xspec/reporter/coverage-report.xsl".to_string(),
            coverage_css: "cp:/xspec/reporter/test-report.css".to_string(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormatConfig::Human,
            verbose: false,
            quiet: false,
        }
    }
}

impl EngineConfig {
    /// Command engine settings, pointing the processor at `catalog`
    pub fn command_engine_config(&self, catalog: Option<PathBuf>) -> CommandEngineConfig {
        CommandEngineConfig {
            xslt_command: self.xslt_command.clone(),
            xquery_command: self.xquery_command.clone(),
            coverage_arguments: self.coverage_arguments.clone(),
            catalog,
        }
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: defaults -> file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        let mut config = Config::default();

        if let Some(config_path) = &cli.config {
            let file_config = Self::load_from_file(config_path).await?;
            config = Self::merge_configs(config, file_config);
        } else if let Some(found_config) = Self::find_config_file().await? {
            config = Self::merge_configs(config, found_config);
        }

        config = Self::apply_environment_overrides(config)?;
        config = Self::merge_with_cli(config, cli);

        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => {
                let config: Config = toml::from_str(&content)?;
                Ok(config)
            }
            Some("json") => {
                let config: Config = serde_json::from_str(&content)?;
                Ok(config)
            }
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                // Try to parse as TOML first, then JSON
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    let config: Config = serde_json::from_str(&content)?;
                    Ok(config)
                }
            }
        }
    }

    /// Find configuration file in standard locations
    pub async fn find_config_file() -> Result<Option<Config>> {
        let config_names = [
            "xspec-runner.toml",
            "xspec-runner.json",
            ".xspec-runner.toml",
            ".xspec-runner.json",
        ];

        for name in &config_names {
            let path = PathBuf::from(name);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                log::debug!("Using configuration file {}", path.display());
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("xspec-runner");
            for name in &config_names {
                let path = app_config_dir.join(name);
                if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    log::debug!("Using configuration file {}", path.display());
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: Config) -> Result<Config> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        // Runner settings
        if let Some(report_dir) = env.get("XSPEC_RUNNER_REPORT_DIR") {
            config.runner.report_dir = PathBuf::from(report_dir);
        }

        if let Some(execution_id) = env.get("XSPEC_RUNNER_EXECUTION_ID") {
            config.runner.execution_id = Some(execution_id);
        }

        if let Some(extensions) = env.get("XSPEC_RUNNER_EXTENSIONS") {
            config.runner.extensions = split_list(&extensions);
        }

        // Resolver settings
        if let Some(resource_root) = env.get("XSPEC_RUNNER_RESOURCE_ROOT") {
            config.resolver.resource_root = Some(PathBuf::from(resource_root));
        }

        if let Some(catalog) = env.get("XSPEC_RUNNER_CATALOG") {
            config.resolver.catalog = Some(PathBuf::from(catalog));
        }

        // Engine settings
        if let Some(command) = env.get("XSPEC_RUNNER_XSLT_COMMAND") {
            config.engine.xslt_command = split_command(&command);
        }

        if let Some(command) = env.get("XSPEC_RUNNER_XQUERY_COMMAND") {
            config.engine.xquery_command = split_command(&command);
        }

        // Report settings
        if let Some(junit) = env.get("XSPEC_RUNNER_JUNIT") {
            config.reports.junit = parse_bool("XSPEC_RUNNER_JUNIT", &junit)?;
        }

        if let Some(coverage) = env.get("XSPEC_RUNNER_COVERAGE") {
            config.reports.coverage = parse_bool("XSPEC_RUNNER_COVERAGE", &coverage)?;
        }

        // Output settings
        if let Some(verbose) = env.get("XSPEC_RUNNER_VERBOSE") {
            config.output.verbose = parse_bool("XSPEC_RUNNER_VERBOSE", &verbose)?;
        }

        if let Some(quiet) = env.get("XSPEC_RUNNER_QUIET") {
            config.output.quiet = parse_bool("XSPEC_RUNNER_QUIET", &quiet)?;
        }

        if let Some(format) = env.get("XSPEC_RUNNER_FORMAT") {
            config.output.format = match format.to_lowercase().as_str() {
                "human" => OutputFormatConfig::Human,
                "json" => OutputFormatConfig::Json,
                "summary" => OutputFormatConfig::Summary,
                _ => {
                    return Err(ConfigError::Environment(format!(
                        "Invalid XSPEC_RUNNER_FORMAT value: {}",
                        format
                    )));
                }
            };
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        // Runner settings
        if config.runner.test_dir.is_none() {
            config.runner.test_dir = Some(Self::test_root_for(&cli.path));
        }
        if let Some(report_dir) = &cli.report_dir {
            config.runner.report_dir = report_dir.clone();
        }
        if let Some(execution_id) = &cli.execution_id {
            config.runner.execution_id = Some(execution_id.clone());
        }
        if let Some(extensions) = cli.get_extensions() {
            config.runner.extensions = extensions;
        }
        if !cli.include_patterns.is_empty() {
            config.runner.include_patterns = cli.include_patterns.clone();
        }
        if !cli.exclude_patterns.is_empty() {
            config.runner.exclude_patterns = cli.exclude_patterns.clone();
        }

        // Resolver settings
        if let Some(catalog) = &cli.catalog {
            config.resolver.catalog = Some(catalog.clone());
        }
        if let Some(resource_root) = &cli.resource_root {
            config.resolver.resource_root = Some(resource_root.clone());
        }

        // Report toggles can only be switched on from the command line
        config.reports.junit |= cli.junit;
        config.reports.coverage |= cli.coverage;

        // Output settings
        if let Some(format) = cli.output_format {
            config.output.format = format.into();
        }
        if cli.verbose {
            config.output.verbose = true;
            config.output.quiet = false;
        }
        if cli.quiet {
            config.output.quiet = true;
            config.output.verbose = false;
        }

        config
    }

    /// Merge two configurations (second takes precedence for non-None values)
    pub fn merge_configs(mut base: Config, override_config: Config) -> Config {
        // Runner settings
        if override_config.runner.test_dir.is_some() {
            base.runner.test_dir = override_config.runner.test_dir;
        }
        base.runner.report_dir = override_config.runner.report_dir;
        if override_config.runner.execution_id.is_some() {
            base.runner.execution_id = override_config.runner.execution_id;
        }
        if !override_config.runner.extensions.is_empty() {
            base.runner.extensions = override_config.runner.extensions;
        }
        if !override_config.runner.include_patterns.is_empty() {
            base.runner.include_patterns = override_config.runner.include_patterns;
        }
        if !override_config.runner.exclude_patterns.is_empty() {
            base.runner.exclude_patterns = override_config.runner.exclude_patterns;
        }
        if override_config.runner.max_depth.is_some() {
            base.runner.max_depth = override_config.runner.max_depth;
        }
        base.runner.follow_symlinks = override_config.runner.follow_symlinks;

        // Resolver settings
        if override_config.resolver.resource_root.is_some() {
            base.resolver.resource_root = override_config.resolver.resource_root;
        }
        if override_config.resolver.catalog.is_some() {
            base.resolver.catalog = override_config.resolver.catalog;
        }
        if override_config.resolver.generated_catalog.is_some() {
            base.resolver.generated_catalog = override_config.resolver.generated_catalog;
        }
        base.resolver
            .mappings
            .extend(override_config.resolver.mappings);

        // Stylesheets and commands
        base.engine = override_config.engine;
        base.compiler = override_config.compiler;
        base.schematron = override_config.schematron;
        base.reports = override_config.reports;

        // Output settings
        base.output = override_config.output;

        base
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        // Validate output settings
        if config.output.verbose && config.output.quiet {
            return Err(ConfigError::Validation(
                "Cannot enable both verbose and quiet modes".to_string(),
            ));
        }

        // Validate file settings
        if config.runner.extensions.is_empty() {
            return Err(ConfigError::Validation(
                "At least one file extension must be specified".to_string(),
            ));
        }

        for ext in &config.runner.extensions {
            if ext.contains('/') || ext.contains('\\') || ext.contains('.') {
                return Err(ConfigError::Validation(format!(
                    "Invalid file extension: {}",
                    ext
                )));
            }
        }

        for pattern in config
            .runner
            .include_patterns
            .iter()
            .chain(&config.runner.exclude_patterns)
        {
            if let Err(e) = globset::Glob::new(pattern) {
                return Err(ConfigError::Validation(format!(
                    "Invalid glob pattern '{}': {}",
                    pattern, e
                )));
            }
        }

        if let Some(execution_id) = &config.runner.execution_id
            && (execution_id.is_empty()
                || execution_id.contains('/')
                || execution_id.contains('\\')
                || execution_id == "..")
        {
            return Err(ConfigError::Validation(format!(
                "Execution id must be a single path segment: '{}'",
                execution_id
            )));
        }

        // Validate engine settings
        if config.engine.xslt_command.is_empty() {
            return Err(ConfigError::Validation(
                "An XSLT processor command must be configured".to_string(),
            ));
        }

        // Validate stylesheet references
        let stylesheets = [
            ("compiler.xslt", &config.compiler.xslt),
            ("compiler.xquery", &config.compiler.xquery),
            ("schematron.step1", &config.schematron.step1),
            ("schematron.step2", &config.schematron.step2),
            ("schematron.step3", &config.schematron.step3),
            ("schematron.rewrite", &config.schematron.rewrite),
            ("schematron.dependencies", &config.schematron.dependencies),
            ("reports.html_formatter", &config.reports.html_formatter),
        ];
        for (field, value) in stylesheets {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!("{} must not be empty", field)));
            }
        }

        if config.reports.coverage && config.reports.coverage_reporter.trim().is_empty() {
            return Err(ConfigError::Validation(
                "reports.coverage_reporter must be set when coverage is enabled".to_string(),
            ));
        }

        Ok(())
    }

    /// Directory that report paths are made relative to
    pub fn test_root_for(path: &Path) -> PathBuf {
        if path.is_file() {
            path.parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        } else {
            path.to_path_buf()
        }
    }

    /// The configured execution id, or a timestamp-based one
    pub fn get_execution_id(config: &Config) -> String {
        config
            .runner
            .execution_id
            .clone()
            .unwrap_or_else(|| chrono::Local::now().format("%Y%m%d-%H%M%S").to_string())
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn split_command(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(ConfigError::Environment(format!(
            "Invalid {} value: {}",
            key, value
        ))),
    }
}
