use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only show failures
    Quiet,
    /// Show one line per specification file
    #[default]
    Normal,
    /// Show report locations and per-file counts
    Verbose,
}

/// Console output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
    Summary,
}

/// Compile, run and report XSpec test specifications
#[derive(Parser, Debug, Clone)]
#[command(name = "xspec-runner")]
#[command(about = "Run XSpec specifications for XSLT, XQuery and Schematron")]
#[command(version)]
pub struct Cli {
    /// Specification file or directory of specifications
    #[arg(help = "Specification file or directory to run")]
    pub path: PathBuf,

    /// Configuration file (TOML or JSON)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Root directory for reports
    #[arg(short = 'r', long = "report-dir")]
    pub report_dir: Option<PathBuf>,

    /// Sub-directory of the report root for this run
    #[arg(long = "execution-id")]
    pub execution_id: Option<String>,

    /// File extensions to process (comma-separated)
    #[arg(
        short = 'e',
        long = "extensions",
        help = "File extensions to process (e.g., 'xspec,xml')"
    )]
    pub extensions: Option<String>,

    /// Include file patterns (glob syntax)
    #[arg(long = "include", action = clap::ArgAction::Append)]
    pub include_patterns: Vec<String>,

    /// Exclude file patterns (glob syntax)
    #[arg(long = "exclude", action = clap::ArgAction::Append)]
    pub exclude_patterns: Vec<String>,

    /// User XML catalog, chained after the generated one
    #[arg(long = "catalog")]
    pub catalog: Option<PathBuf>,

    /// Directory backing `cp:/` resources
    #[arg(long = "resource-root")]
    pub resource_root: Option<PathBuf>,

    /// Write a JUnit report per specification
    #[arg(long = "junit")]
    pub junit: bool,

    /// Record coverage and write a coverage report per specification
    #[arg(long = "coverage")]
    pub coverage: bool,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", help = "Enable verbose output")]
    pub verbose: bool,

    /// Enable quiet mode (failures only)
    #[arg(
        short = 'q',
        long = "quiet",
        help = "Quiet mode",
        conflicts_with = "verbose"
    )]
    pub quiet: bool,

    /// Console output format
    #[arg(long = "format", value_enum)]
    pub output_format: Option<OutputFormat>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Extensions given on the command line, if any
    pub fn get_extensions(&self) -> Option<Vec<String>> {
        self.extensions.as_ref().map(|extensions| {
            extensions
                .split(',')
                .map(|s| s.trim().trim_start_matches('.').to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.path.exists() {
            return Err(format!("Path does not exist: {}", self.path.display()));
        }
        if let Some(root) = &self.resource_root
            && !root.is_dir()
        {
            return Err(format!("Resource root is not a directory: {}", root.display()));
        }
        if let Some(catalog) = &self.catalog
            && !catalog.is_file()
        {
            return Err(format!("Catalog does not exist: {}", catalog.display()));
        }
        Ok(())
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Quiet
        } else if self.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_basic_cli_parsing() {
        let args = vec!["xspec-runner", "/tmp"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.path, PathBuf::from("/tmp"));
        assert!(cli.output_format.is_none());
        assert!(cli.get_extensions().is_none());
        assert!(!cli.junit);
    }

    #[test]
    fn test_full_cli_parsing() {
        let args = vec![
            "xspec-runner",
            "--report-dir",
            "target/reports",
            "--execution-id",
            "nightly",
            "-e",
            "xspec, .xml",
            "--include",
            "unit/**",
            "--exclude",
            "**/slow-*",
            "--junit",
            "--coverage",
            "--format",
            "json",
            "-v",
            "tests",
        ];
        let cli = Cli::try_parse_from(args).unwrap();

        assert_eq!(cli.report_dir, Some(PathBuf::from("target/reports")));
        assert_eq!(cli.execution_id.as_deref(), Some("nightly"));
        assert_eq!(
            cli.get_extensions(),
            Some(vec!["xspec".to_string(), "xml".to_string()])
        );
        assert_eq!(cli.include_patterns, vec!["unit/**"]);
        assert_eq!(cli.exclude_patterns, vec!["**/slow-*"]);
        assert!(cli.junit);
        assert!(cli.coverage);
        assert_eq!(cli.output_format, Some(OutputFormat::Json));
        assert_eq!(cli.verbosity(), VerbosityLevel::Verbose);
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        let result = Cli::try_parse_from(vec!["xspec-runner", "-v", "-q", "/tmp"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_missing_path() {
        let cli = Cli::try_parse_from(vec!["xspec-runner", "/definitely/not/here"]).unwrap();
        assert!(cli.validate().is_err());
    }
}
