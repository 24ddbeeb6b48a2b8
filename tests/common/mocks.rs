use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use mockall::mock;

use xspec_runner::engine::{Destination, Executable, Invocation, ProgramKind, TransformEngine};
use xspec_runner::error::{EngineError, Result};
use xspec_runner::event::{Attribute, Document, DocumentBuilder, EventSink, QName, XmlEvent};
use xspec_runner::resolver::Source;
use xspec_runner::{XSPEC_NS, sax, serialize};

mock! {
    pub Engine {}

    impl TransformEngine for Engine {
        fn load(&self, kind: ProgramKind, program: &Source) -> Result<Box<dyn Executable>>;
    }
}

/// One call made against the scripted engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineCall {
    pub program: String,
    pub kind: ProgramKind,
}

/// Stand-in for an XSLT/XQuery processor.
///
/// Stylesheets are recognised by file name. The compilers copy the
/// specification through unchanged, so a "compiled" program is the
/// specification itself; running one streams a report with one `x:test` per
/// `x:expect`. An expect whose `select` is `false()` fails.
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    /// Labels of expectations whose tests are left out of the report
    pub omitted_labels: Vec<String>,
    /// Fail the run right after this many tests were reported
    pub abort_after: Option<usize>,
    pub calls: Arc<Mutex<Vec<EngineCall>>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn omitting(mut self, label: &str) -> Self {
        self.omitted_labels.push(label.to_string());
        self
    }

    pub fn aborting_after(mut self, tests: usize) -> Self {
        self.abort_after = Some(tests);
        self
    }

    pub fn loaded_programs(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|call| call.program.clone())
            .collect()
    }
}

impl TransformEngine for ScriptedEngine {
    fn load(&self, kind: ProgramKind, program: &Source) -> Result<Box<dyn Executable>> {
        self.calls.lock().unwrap().push(EngineCall {
            program: program.system_id().to_string(),
            kind,
        });
        Ok(Box::new(ScriptedProgram {
            engine: self.clone(),
            system_id: program.system_id().to_string(),
            path: program.file_path().map(Path::to_path_buf),
        }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedProgram {
    engine: ScriptedEngine,
    system_id: String,
    path: Option<PathBuf>,
}

impl ScriptedProgram {
    fn stylesheet(&self) -> &str {
        self.system_id.rsplit('/').next().unwrap_or_default()
    }

    fn input(invocation: &Invocation<'_>) -> Document {
        invocation.input.cloned().unwrap_or_default()
    }
}

impl Executable for ScriptedProgram {
    fn execute(&self, invocation: &Invocation<'_>, destination: Destination<'_>) -> Result<()> {
        let output = match self.stylesheet() {
            "compile-xslt-tests.xsl" | "compile-xquery-tests.xsl" => Self::input(invocation),
            "format-xspec-report.xsl" | "coverage-report.xsl" => document("<html><body/></html>"),
            "schut-to-xspec.xsl" => retarget_to_stylesheet(Self::input(invocation)),
            "xspec-dependencies.xsl" => document("<dependencies/>"),
            stylesheet if stylesheet.ends_with(".xsl") => Self::input(invocation),
            _ => return self.run_suite(invocation, destination),
        };

        match destination {
            Destination::Events(sink) => output.replay(sink),
            Destination::File(path) => serialize::write_document(&output, &path).map(|_| ()),
        }
    }
}

impl ScriptedProgram {
    fn run_suite(&self, invocation: &Invocation<'_>, destination: Destination<'_>) -> Result<()> {
        let Some(path) = &self.path else {
            return Err(EngineError::Transform {
                details: format!("{} is not a compiled suite", self.system_id),
            }
            .into());
        };
        if let Some(trace) = &invocation.coverage_output {
            serialize::write_document(&document("<trace/>"), trace)?;
        }

        let mut builder = DocumentBuilder::new(None);
        {
            let mut translator = ReportTranslator::new(&mut builder, &self.engine.omitted_labels);
            sax::parse_source(&Source::from_file(path), &mut translator)?;
        }
        let report = builder.into_document();

        let Destination::Events(sink) = destination else {
            return Err(EngineError::Output {
                details: "suites only stream their reports".to_string(),
            }
            .into());
        };

        sink.start_document()?;
        let mut reported = 0;
        for event in &report.events {
            event.dispatch(sink)?;
            if let XmlEvent::EndElement { name } = event
                && name.is(XSPEC_NS, "test")
            {
                reported += 1;
                if self.engine.abort_after == Some(reported) {
                    return Err(EngineError::Transform {
                        details: "XPTY0004: processor aborted".to_string(),
                    }
                    .into());
                }
            }
        }
        sink.end_document()
    }
}

fn document(xml: &str) -> Document {
    let mut builder = DocumentBuilder::new(None);
    sax::parse_str(xml, &mut builder).unwrap();
    builder.into_document()
}

/// Replace the root's `schematron` attribute by a `stylesheet` one
fn retarget_to_stylesheet(mut document: Document) -> Document {
    if let Some(XmlEvent::StartElement { attributes, .. }) = document
        .events
        .iter_mut()
        .find(|event| matches!(event, XmlEvent::StartElement { .. }))
    {
        attributes.retain(|attribute| attribute.name.local_name != "schematron");
        attributes.push(Attribute::new("stylesheet", "rules-sch-compiled.xsl"));
    }
    document
}

enum Frame {
    Emit(QName),
    EmitPending(QName),
    Pending,
    Nothing,
}

/// Turns a specification's event stream into a report's
struct ReportTranslator<'s> {
    out: &'s mut dyn EventSink,
    omitted: &'s [String],
    frames: Vec<Frame>,
    pending_depth: usize,
}

impl<'s> ReportTranslator<'s> {
    fn new(out: &'s mut dyn EventSink, omitted: &'s [String]) -> Self {
        Self {
            out,
            omitted,
            frames: Vec::new(),
            pending_depth: 0,
        }
    }

    fn xspec(local_name: &str) -> QName {
        QName::with_namespace(Some("x".to_string()), local_name, Some(XSPEC_NS.to_string()))
    }

    fn label(attributes: &[Attribute]) -> Vec<Attribute> {
        attributes
            .iter()
            .filter(|a| a.name.namespace_uri.is_none() && a.name.local_name == "label")
            .cloned()
            .collect()
    }

    fn has(attributes: &[Attribute], local_name: &str) -> bool {
        attributes
            .iter()
            .any(|a| a.name.namespace_uri.is_none() && a.name.local_name == local_name)
    }
}

impl EventSink for ReportTranslator<'_> {
    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<()> {
        if !name.in_namespace(XSPEC_NS) {
            self.frames.push(Frame::Nothing);
            return Ok(());
        }

        let frame = match name.local_name.as_str() {
            "description" => {
                let report = Self::xspec("report");
                self.out.start_element(&report, &[])?;
                Frame::Emit(report)
            }
            "scenario" => {
                let scenario = Self::xspec("scenario");
                self.out.start_element(&scenario, &Self::label(attributes))?;
                if Self::has(attributes, "pending") {
                    self.pending_depth += 1;
                    Frame::EmitPending(scenario)
                } else {
                    Frame::Emit(scenario)
                }
            }
            "pending" => {
                self.pending_depth += 1;
                Frame::Pending
            }
            "expect" => {
                let omitted = attributes.iter().any(|a| {
                    a.name.local_name == "label" && self.omitted.iter().any(|l| *l == a.value)
                });
                if omitted {
                    Frame::Nothing
                } else {
                    let mut test_attributes = Self::label(attributes);
                    if self.pending_depth > 0 || Self::has(attributes, "pending") {
                        test_attributes.push(Attribute::new("pending", ""));
                    } else {
                        let failed = attributes
                            .iter()
                            .any(|a| a.name.local_name == "select" && a.value == "false()");
                        test_attributes
                            .push(Attribute::new("successful", if failed { "false" } else { "true" }));
                    }
                    let test = Self::xspec("test");
                    self.out.start_element(&test, &test_attributes)?;
                    Frame::Emit(test)
                }
            }
            _ => Frame::Nothing,
        };
        self.frames.push(frame);
        Ok(())
    }

    fn end_element(&mut self, _name: &QName) -> Result<()> {
        match self.frames.pop() {
            Some(Frame::Emit(name)) => self.out.end_element(&name),
            Some(Frame::EmitPending(name)) => {
                self.pending_depth -= 1;
                self.out.end_element(&name)
            }
            Some(Frame::Pending) => {
                self.pending_depth -= 1;
                Ok(())
            }
            Some(Frame::Nothing) | None => Ok(()),
        }
    }

    fn text(&mut self, _content: &str) -> Result<()> {
        Ok(())
    }
}
