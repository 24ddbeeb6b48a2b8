//! Turns a specification into an executable test program.
//!
//! The specification is parsed once; its events are teed into a document
//! builder (the meta-transform's input) and a result counter that yields the
//! compile-time test counts.

use std::path::PathBuf;

use log::{debug, error, info};

use crate::config::CompilerConfig;
use crate::counter::{CountMode, Counts, ResultCounter};
use crate::engine::{Destination, Invocation, ProgramKind, Toolchain};
use crate::error::Result;
use crate::event::{DocumentBuilder, EventSink, Tee};
use crate::layout::FileLayout;
use crate::resolver::Source;
use crate::sax;

/// An executable test program and the counts known before running it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledSpec {
    pub executable_path: PathBuf,
    pub kind: ProgramKind,
    pub compile_counts: Counts,
}

/// Compile `spec` into `layout.compiled(kind)`.
///
/// Returns `Ok(None)` when the transform engine rejects the compilation; the
/// engine error has already been logged. Every other failure (unreadable or
/// malformed specification, unresolvable compiler stylesheet, a `like` that
/// names an undefined shared scenario) is returned as an error.
pub fn compile(
    toolchain: Toolchain<'_>,
    settings: &CompilerConfig,
    spec: &Source,
    kind: ProgramKind,
    layout: &FileLayout,
) -> Result<Option<CompiledSpec>> {
    let mut builder = DocumentBuilder::new(Some(spec.system_id().to_string()));
    let mut counter = ResultCounter::new(CountMode::Specification)
        .with_resolver(toolchain.resolver)
        .with_system_id(spec.system_id());
    {
        let mut tee = Tee::new([
            &mut builder as &mut dyn EventSink,
            &mut counter as &mut dyn EventSink,
        ]);
        sax::parse_source(spec, &mut tee)?;
    }
    let compile_counts = counter.counts();
    let document = builder.into_document();
    debug!(
        "{} declares {} test(s), {} pending",
        spec.system_id(),
        compile_counts.tests,
        compile_counts.pending_tests
    );

    let compiler_uri = settings.stylesheet_for(kind);
    let executable_path = layout.compiled(kind);

    let outcome = toolchain
        .load_stylesheet(compiler_uri, None)
        .and_then(|compiler| {
            compiler.execute(
                &Invocation::transform(&document),
                Destination::File(executable_path.clone()),
            )
        });

    match outcome {
        Ok(()) => {
            info!("Compiled {} to {}", spec.system_id(), executable_path.display());
            Ok(Some(CompiledSpec {
                executable_path,
                kind,
                compile_counts,
            }))
        }
        Err(e) if e.is_engine_error() => {
            error!(
                "{} failed to compile {}: {}",
                toolchain.engine.name(),
                spec.system_id(),
                e
            );
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
