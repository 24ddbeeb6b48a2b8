//! JUnit rendering of the streamed XSpec report.
//!
//! One `<testsuite>` per top-level scenario, one `<testcase>` per `x:test`.
//! Nested scenario labels become the test case's class name.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use log::debug;
use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestSuite};

use crate::XSPEC_NS;
use crate::error::{Result, RunnerError};
use crate::event::{Attribute, EventSink, QName, attribute_value};

#[derive(Debug)]
enum Frame {
    Scenario { label: String, pending: bool },
    Test { label: String, outcome: Outcome },
    Label,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Passed,
    Failed,
    Pending,
}

/// Sink that turns report events into a JUnit file at end of document
#[derive(Debug)]
pub struct JunitSink {
    name: String,
    path: PathBuf,
    frames: Vec<Frame>,
    label_text: String,
    cases: Vec<TestCase>,
    suites: Vec<TestSuite>,
}

impl JunitSink {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            frames: Vec::new(),
            label_text: String::new(),
            cases: Vec::new(),
            suites: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn in_pending_scenario(&self) -> bool {
        self.frames
            .iter()
            .any(|frame| matches!(frame, Frame::Scenario { pending: true, .. }))
    }

    fn scenario_path(&self) -> String {
        self.frames
            .iter()
            .filter_map(|frame| match frame {
                Frame::Scenario { label, .. } => Some(label.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" / ")
    }

    fn scenario_depth(&self) -> usize {
        self.frames
            .iter()
            .filter(|frame| matches!(frame, Frame::Scenario { .. }))
            .count()
    }

    fn finish_test(&mut self, label: String, outcome: Outcome) {
        let name = if label.is_empty() {
            format!("test {}", self.cases.len() + 1)
        } else {
            label
        };

        let status = match outcome {
            Outcome::Passed => TestCaseStatus::success(),
            Outcome::Failed => {
                let mut status = TestCaseStatus::non_success(NonSuccessKind::Failure);
                status.set_message("expectation not met");
                status
            }
            Outcome::Pending => {
                let mut status = TestCaseStatus::skipped();
                status.set_message("pending");
                status
            }
        };

        let mut testcase = TestCase::new(name, status);
        let classname = self.scenario_path();
        if !classname.is_empty() {
            testcase.set_classname(classname);
        }
        self.cases.push(testcase);
    }

    fn finish_top_level_scenario(&mut self, label: String) {
        let name = if label.is_empty() {
            format!("scenario {}", self.suites.len() + 1)
        } else {
            label
        };
        let mut suite = TestSuite::new(name);
        for testcase in self.cases.drain(..) {
            suite.add_test_case(testcase);
        }
        self.suites.push(suite);
    }

    fn write(&mut self) -> Result<()> {
        // Tests outside any scenario still get reported
        if !self.cases.is_empty() {
            let mut suite = TestSuite::new(self.name.clone());
            for testcase in self.cases.drain(..) {
                suite.add_test_case(testcase);
            }
            self.suites.push(suite);
        }

        let mut report = Report::new(self.name.clone());
        report.add_test_suites(self.suites.drain(..));

        let junit_error = |details: String| RunnerError::Junit {
            path: self.path.clone(),
            details,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| junit_error(e.to_string()))?;
        }
        let file = File::create(&self.path).map_err(|e| junit_error(e.to_string()))?;
        report
            .serialize(file)
            .map_err(|e| junit_error(e.to_string()))?;

        debug!("Wrote JUnit report {}", self.path.display());
        Ok(())
    }
}

impl EventSink for JunitSink {
    fn start_document(&mut self) -> Result<()> {
        self.frames.clear();
        self.cases.clear();
        self.suites.clear();
        Ok(())
    }

    fn end_document(&mut self) -> Result<()> {
        self.write()
    }

    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<()> {
        if !name.in_namespace(XSPEC_NS) {
            self.frames.push(Frame::Other);
            return Ok(());
        }

        let pending = attribute_value(attributes, "pending").is_some();
        let frame = match name.local_name.as_str() {
            "scenario" => Frame::Scenario {
                label: attribute_value(attributes, "label")
                    .unwrap_or_default()
                    .to_string(),
                pending: pending || self.in_pending_scenario(),
            },
            "test" => {
                let outcome = if pending || self.in_pending_scenario() {
                    Outcome::Pending
                } else if attribute_value(attributes, "successful") == Some("true") {
                    Outcome::Passed
                } else {
                    Outcome::Failed
                };
                Frame::Test {
                    label: attribute_value(attributes, "label")
                        .unwrap_or_default()
                        .to_string(),
                    outcome,
                }
            }
            "label"
                if matches!(
                    self.frames.last(),
                    Some(Frame::Scenario { .. } | Frame::Test { .. })
                ) =>
            {
                self.label_text.clear();
                Frame::Label
            }
            _ => Frame::Other,
        };
        self.frames.push(frame);
        Ok(())
    }

    fn end_element(&mut self, _name: &QName) -> Result<()> {
        match self.frames.pop() {
            Some(Frame::Label) => {
                let text = self.label_text.trim().to_string();
                match self.frames.last_mut() {
                    Some(Frame::Scenario { label, .. }) | Some(Frame::Test { label, .. })
                        if label.is_empty() =>
                    {
                        *label = text;
                    }
                    _ => {}
                }
            }
            Some(Frame::Test { label, outcome }) => self.finish_test(label, outcome),
            Some(Frame::Scenario { label, .. }) => {
                if self.scenario_depth() == 0 {
                    self.finish_top_level_scenario(label);
                }
            }
            Some(Frame::Other) | None => {}
        }
        Ok(())
    }

    fn text(&mut self, content: &str) -> Result<()> {
        if matches!(self.frames.last(), Some(Frame::Label)) {
            self.label_text.push_str(content);
        }
        Ok(())
    }
}
