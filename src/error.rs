use std::path::PathBuf;

use thiserror::Error;

/// Main application error type that encompasses all possible failure modes
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("XML attribute error: {0}")]
    XmlAttribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Resource not found: {reference} (base: {})", .base.as_deref().unwrap_or("none"))]
    ResourceNotFound {
        reference: String,
        base: Option<String>,
    },

    #[error("Invalid specification: {location} - {details}")]
    InvalidSpecification { location: String, details: String },

    #[error("Compilation failed: {spec} - {details}")]
    CompileFailure { spec: PathBuf, details: String },

    #[error("Execution failed: {spec} - {details}")]
    ExecutionFailure { spec: PathBuf, details: String },

    #[error("Rewritten specification missing after Schematron bridge: {path}")]
    RewriteIncomplete { path: PathBuf },

    #[error(
        "Shared scenario '{label}' referenced before its definition or never defined: {location}"
    )]
    UnresolvedSharedScenario { label: String, location: String },

    #[error("Transform engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Report not written: {path} - {details}")]
    ReportWriter { path: PathBuf, details: String },

    #[error("JUnit report error: {path} - {details}")]
    Junit { path: PathBuf, details: String },

    #[error("File system traversal error: {path} - {reason}")]
    FileSystemTraversal { path: PathBuf, reason: String },

    #[error("{failed_files} of {total_files} specification file(s) failed")]
    RunFailed {
        failed_files: usize,
        total_files: usize,
    },
}

/// Errors raised across the transform engine boundary
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to load {kind} program {system_id}: {details}")]
    Load {
        kind: String,
        system_id: String,
        details: String,
    },

    #[error("Transform raised an error: {details}")]
    Transform { details: String },

    #[error("Processor command is not configured for {kind}")]
    NotConfigured { kind: String },

    #[error("Processor exited with status {status}: {stderr}")]
    ProcessFailed { status: i32, stderr: String },

    #[error("Processor output could not be read: {details}")]
    Output { details: String },
}

/// Catalog-specific error types
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog not readable: {path} - {details}")]
    Unreadable { path: PathBuf, details: String },

    #[error("Catalog entry missing attribute '{attribute}' on <{element}>")]
    MissingAttribute { element: String, attribute: String },
}

// Error conversion implementations
impl From<crate::config::ConfigError> for RunnerError {
    fn from(err: crate::config::ConfigError) -> Self {
        RunnerError::Config(err.to_string())
    }
}

impl From<CatalogError> for RunnerError {
    fn from(err: CatalogError) -> Self {
        RunnerError::Catalog(err.to_string())
    }
}

impl RunnerError {
    /// Whether this error came out of the transform engine rather than the pipeline itself
    pub fn is_engine_error(&self) -> bool {
        matches!(self, RunnerError::Engine(_))
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, RunnerError>;
