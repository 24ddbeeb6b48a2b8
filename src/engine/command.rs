//! Engine backed by an external processor command line.
//!
//! Arguments follow the Saxon conventions (`-xsl:`, `-q:`, `-s:`, `-it:`,
//! `-o:`, `-catalog:`, `name=value`). Event destinations read the
//! processor's standard output through the SAX driver while it runs.

use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use tempfile::NamedTempFile;

use super::{Destination, EntryPoint, Executable, Invocation, ProgramKind, TransformEngine};
use crate::error::{EngineError, Result};
use crate::event::Document;
use crate::resolver::Source;
use crate::sax;
use crate::serialize::XmlSerializer;

/// Placeholder in coverage arguments replaced by the trace path
pub const COVERAGE_OUTPUT_PLACEHOLDER: &str = "{output}";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandEngineConfig {
    /// Program and leading arguments for XSLT transforms
    pub xslt_command: Vec<String>,
    /// Program and leading arguments for XQuery evaluation
    pub xquery_command: Vec<String>,
    /// Extra arguments enabling a coverage trace
    pub coverage_arguments: Vec<String>,
    pub catalog: Option<PathBuf>,
}

impl CommandEngineConfig {
    fn command(&self, kind: ProgramKind) -> &[String] {
        match kind {
            ProgramKind::Xslt => &self.xslt_command,
            ProgramKind::XQuery => &self.xquery_command,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandEngine {
    config: CommandEngineConfig,
}

impl CommandEngine {
    pub fn new(config: CommandEngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CommandEngineConfig {
        &self.config
    }
}

impl TransformEngine for CommandEngine {
    fn load(&self, kind: ProgramKind, program: &Source) -> Result<Box<dyn Executable>> {
        let command = self.config.command(kind);
        if command.is_empty() {
            return Err(EngineError::NotConfigured {
                kind: kind.to_string(),
            }
            .into());
        }

        let (program_path, scratch) = match program.file_path() {
            Some(path) => (path.to_path_buf(), None),
            None => {
                let suffix = match kind {
                    ProgramKind::Xslt => ".xsl",
                    ProgramKind::XQuery => ".xq",
                };
                let bytes = program.read_bytes()?;
                let file = scratch_file(suffix, |file| {
                    std::io::Write::write_all(file, &bytes)?;
                    Ok(())
                })
                .map_err(|e| EngineError::Load {
                    kind: kind.to_string(),
                    system_id: program.system_id().to_string(),
                    details: e.to_string(),
                })?;
                (file.path().to_path_buf(), Some(file))
            }
        };

        log::debug!(
            "Loaded {} program {} for {}",
            kind,
            program.system_id(),
            command[0]
        );
        Ok(Box::new(CommandExecutable {
            kind,
            command: command.to_vec(),
            program: program_path,
            coverage_arguments: self.config.coverage_arguments.clone(),
            catalog: self.config.catalog.clone(),
            _scratch: scratch,
        }))
    }

    fn name(&self) -> &str {
        "command"
    }
}

struct CommandExecutable {
    kind: ProgramKind,
    command: Vec<String>,
    program: PathBuf,
    coverage_arguments: Vec<String>,
    catalog: Option<PathBuf>,
    /// Keeps an in-memory program on disk while the executable lives
    _scratch: Option<NamedTempFile>,
}

impl CommandExecutable {
    fn build_command(
        &self,
        invocation: &Invocation<'_>,
        input: Option<&Path>,
        output: Option<&Path>,
    ) -> Command {
        let mut command = Command::new(&self.command[0]);
        command.args(&self.command[1..]);

        match self.kind {
            ProgramKind::Xslt => command.arg(format!("-xsl:{}", self.program.display())),
            ProgramKind::XQuery => command.arg(format!("-q:{}", self.program.display())),
        };
        if let Some(input) = input {
            command.arg(format!("-s:{}", input.display()));
        }
        if let EntryPoint::Template(name) = &invocation.entry_point {
            command.arg(format!("-it:{}", name));
        }
        if let Some(catalog) = &self.catalog {
            command.arg(format!("-catalog:{}", catalog.display()));
        }
        if let Some(trace) = &invocation.coverage_output {
            if self.coverage_arguments.is_empty() {
                log::warn!("Coverage requested but no coverage arguments are configured");
            }
            let trace = trace.display().to_string();
            for argument in &self.coverage_arguments {
                command.arg(argument.replace(COVERAGE_OUTPUT_PLACEHOLDER, &trace));
            }
        }
        if let Some(output) = output {
            command.arg(format!("-o:{}", output.display()));
        }
        for (name, value) in &invocation.parameters {
            command.arg(format!("{}={}", name, value));
        }
        command
    }
}

impl Executable for CommandExecutable {
    fn execute(&self, invocation: &Invocation<'_>, destination: Destination<'_>) -> Result<()> {
        // Held until the process exits
        let mut input_scratch = None;
        let input = match invocation.input {
            Some(document) => Some(materialize_input(document, &mut input_scratch)?),
            None => None,
        };

        let (output, sink) = match destination {
            Destination::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                (Some(path), None)
            }
            Destination::Events(sink) => (None, Some(sink)),
        };

        let mut command = self.build_command(invocation, input.as_deref(), output.as_deref());
        command
            .stdin(Stdio::null())
            .stdout(if sink.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped());

        log::debug!("Running {:?}", command);
        let mut child = command.spawn().map_err(|e| EngineError::Transform {
            details: format!("failed to start {}: {}", self.command[0], e),
        })?;

        // Drained on its own thread so a chatty processor cannot block on a full pipe
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buffer = String::new();
                let _ = pipe.read_to_string(&mut buffer);
                buffer
            })
        });

        let streamed = match (sink, child.stdout.take()) {
            (Some(sink), Some(stdout)) => sax::parse_reader(BufReader::new(stdout), sink),
            _ => Ok(()),
        };

        let status = child.wait()?;
        let stderr = stderr
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(EngineError::ProcessFailed {
                status: status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            }
            .into());
        }
        if !stderr.trim().is_empty() {
            log::debug!("{} stderr: {}", self.command[0], stderr.trim());
        }

        streamed.map_err(|e| {
            EngineError::Output {
                details: e.to_string(),
            }
            .into()
        })
    }
}

/// The file a document was parsed from, or a scratch copy when it has none
fn materialize_input(
    document: &Document,
    scratch: &mut Option<NamedTempFile>,
) -> Result<PathBuf> {
    if let Some(path) = document.system_id.as_deref().map(Path::new) {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
    }

    let file = scratch_file(".xml", |file| {
        let mut serializer = XmlSerializer::new(file);
        document.replay(&mut serializer)
    })?;
    let path = file.path().to_path_buf();
    *scratch = Some(file);
    Ok(path)
}

fn scratch_file(
    suffix: &str,
    write: impl FnOnce(&mut std::fs::File) -> Result<()>,
) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("xspec-runner-")
        .suffix(suffix)
        .tempfile()?;
    write(file.as_file_mut())?;
    Ok(file)
}
