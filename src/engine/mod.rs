//! Transform engine boundary.
//!
//! XSLT and XQuery semantics live outside this crate. An engine loads a
//! program from a resolved [`Source`] and hands back an [`Executable`]; an
//! executable runs once per [`Invocation`] and delivers its output either as
//! events pushed into a sink or as a file written by the engine itself.

mod command;

pub use command::{CommandEngine, CommandEngineConfig};

use std::fmt;
use std::path::PathBuf;

use crate::XSPEC_NS;
use crate::error::Result;
use crate::event::{Document, EventSink};
use crate::resolver::{ResolverChain, ResourceResolver, Source};

/// Language of a program handed to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    Xslt,
    XQuery,
}

impl ProgramKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgramKind::Xslt => "xslt",
            ProgramKind::XQuery => "xquery",
        }
    }
}

impl fmt::Display for ProgramKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where execution starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPoint {
    /// Call a named template, given in Clark notation (`{uri}local`)
    Template(String),
    /// Apply templates to the input document
    ApplyTemplates,
    /// Evaluate the main query body
    Query,
}

impl EntryPoint {
    /// The `{xspec}main` template every compiled XSLT suite starts from
    pub fn xspec_main() -> Self {
        EntryPoint::Template(format!("{{{}}}main", XSPEC_NS))
    }
}

/// One execution request
#[derive(Debug, Clone)]
pub struct Invocation<'d> {
    pub entry_point: EntryPoint,
    pub input: Option<&'d Document>,
    pub parameters: Vec<(String, String)>,
    /// Ask the engine to record a coverage trace here
    pub coverage_output: Option<PathBuf>,
}

impl<'d> Invocation<'d> {
    pub fn new(entry_point: EntryPoint) -> Self {
        Self {
            entry_point,
            input: None,
            parameters: Vec::new(),
            coverage_output: None,
        }
    }

    /// Apply templates to `input`
    pub fn transform(input: &'d Document) -> Self {
        Self::new(EntryPoint::ApplyTemplates).with_input(input)
    }

    pub fn with_input(mut self, input: &'d Document) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    pub fn with_coverage(mut self, output: Option<PathBuf>) -> Self {
        self.coverage_output = output;
        self
    }
}

/// Where an execution's result goes
pub enum Destination<'a> {
    Events(&'a mut dyn EventSink),
    File(PathBuf),
}

impl fmt::Debug for Destination<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Events(_) => f.write_str("Destination::Events"),
            Destination::File(path) => f.debug_tuple("Destination::File").field(path).finish(),
        }
    }
}

/// A loaded program, runnable any number of times
pub trait Executable {
    /// Run once. Events already delivered to an event destination stay
    /// delivered when this returns an error.
    fn execute(&self, invocation: &Invocation<'_>, destination: Destination<'_>) -> Result<()>;
}

pub trait TransformEngine: Send + Sync {
    fn load(&self, kind: ProgramKind, program: &Source) -> Result<Box<dyn Executable>>;

    /// Engine name for log messages
    fn name(&self) -> &str {
        "engine"
    }
}

/// The collaborators every pipeline stage needs
#[derive(Clone, Copy)]
pub struct Toolchain<'a> {
    pub resolver: &'a ResolverChain,
    pub engine: &'a dyn TransformEngine,
}

impl<'a> Toolchain<'a> {
    pub fn new(resolver: &'a ResolverChain, engine: &'a dyn TransformEngine) -> Self {
        Self { resolver, engine }
    }

    /// Resolve a stylesheet reference and load it as an XSLT program
    pub fn load_stylesheet(&self, uri: &str, base: Option<&str>) -> Result<Box<dyn Executable>> {
        let source = self.resolver.require(uri, base)?;
        self.engine.load(ProgramKind::Xslt, &source)
    }
}
