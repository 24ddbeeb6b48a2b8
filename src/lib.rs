//! # xspec-runner Library
//!
//! Runs XSpec test specifications against XSLT, XQuery and Schematron
//! targets: resources are resolved through an embedded store, an XML catalog
//! and plain URIs; each specification is compiled, executed, and its report
//! streamed to the XML, HTML and JUnit writers while the results are counted.

pub mod classify;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod counter;
pub mod engine;
pub mod error;
pub mod event;
pub mod executor;
pub mod file_discovery;
pub mod junit;
pub mod layout;
pub mod output;
pub mod resolver;
pub mod runner;
pub mod sax;
pub mod schematron;
pub mod serialize;

/// Namespace of XSpec specification and report vocabularies
pub const XSPEC_NS: &str = "http://www.jenitennison.com/xslt/xspec";

pub use classify::{SpecKind, classify};
pub use cli::{Cli, OutputFormat, VerbosityLevel};
pub use compiler::CompiledSpec;
pub use config::{Config, ConfigManager};
pub use counter::{CountMode, Counts, ResultCounter, count_report, count_source};
pub use engine::{
    CommandEngine, CommandEngineConfig, Destination, EntryPoint, Executable, Invocation,
    ProgramKind, Toolchain, TransformEngine,
};
pub use error::{EngineError, Result, RunnerError};
pub use event::{Document, DocumentBuilder, EventSink, FanOut, NullSink, QName, XmlEvent};
pub use executor::ExecutionOutcome;
pub use file_discovery::FileDiscovery;
pub use junit::JunitSink;
pub use layout::FileLayout;
pub use output::Output;
pub use resolver::{
    CatalogResolver, EmbeddedResolver, FallbackResolver, ResolverChain, ResourceResolver, Source,
};
pub use runner::{
    FileStatus, ProcessedFile, ProgressCallback, RunPhase, RunProgress, RunResults,
    RunnerSettings, SpecRunner, TestCounts,
};
