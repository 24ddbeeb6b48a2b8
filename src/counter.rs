//! Streaming result counter.
//!
//! A single-pass state machine over the XSpec-namespace elements of either a
//! specification document (compile-time counts) or an execution report
//! (run-time counts). It never buffers the document: each start tag pushes a
//! [`Frame`] recording what its end tag must undo.

use std::collections::HashMap;
use std::ops::AddAssign;

use serde::Serialize;

use crate::XSPEC_NS;
use crate::error::{Result, RunnerError};
use crate::event::{Attribute, EventSink, QName, attribute_value};
use crate::resolver::{ResourceResolver, Source};
use crate::sax;

/// What kind of document is being counted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountMode {
    /// A specification: `expect` elements are tests
    Specification,
    /// An execution report: `test` elements are tests and carry outcomes
    Report,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub tests: u64,
    pub pending_tests: u64,
    pub passed: u64,
    pub failed: u64,
}

impl AddAssign for Counts {
    fn add_assign(&mut self, other: Self) {
        self.tests += other.tests;
        self.pending_tests += other.pending_tests;
        self.passed += other.passed;
        self.failed += other.failed;
    }
}

/// XSpec elements the counter reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum XspecElement {
    Scenario,
    Expect,
    Pending,
    Like,
    Import,
    Label,
    Test,
}

impl XspecElement {
    fn from_name(name: &QName) -> Option<Self> {
        if !name.in_namespace(XSPEC_NS) {
            return None;
        }
        match name.local_name.as_str() {
            "scenario" => Some(Self::Scenario),
            "expect" => Some(Self::Expect),
            "pending" => Some(Self::Pending),
            "like" => Some(Self::Like),
            "import" => Some(Self::Import),
            "label" => Some(Self::Label),
            "test" => Some(Self::Test),
            _ => None,
        }
    }
}

/// Counts accumulated in one scope plus that scope's pending nesting
#[derive(Debug, Default)]
struct Tally {
    counts: Counts,
    pending_depth: usize,
}

/// What an open element undoes when it closes
#[derive(Debug)]
enum Frame {
    Plain,
    Pending,
    Shared { label: Option<String> },
    Label { text: String },
}

pub struct ResultCounter<'r> {
    mode: CountMode,
    resolver: Option<&'r dyn ResourceResolver>,
    system_id: Option<String>,
    /// Bottom is the document total; one more per open shared scenario
    tallies: Vec<Tally>,
    frames: Vec<Frame>,
    shared: HashMap<String, Counts>,
    /// Documents currently being counted above this one, for cycle detection
    ancestors: Vec<String>,
}

impl<'r> ResultCounter<'r> {
    pub fn new(mode: CountMode) -> Self {
        Self {
            mode,
            resolver: None,
            system_id: None,
            tallies: vec![Tally::default()],
            frames: Vec::new(),
            shared: HashMap::new(),
            ancestors: Vec::new(),
        }
    }

    /// Resolver used for `import` references
    pub fn with_resolver(mut self, resolver: &'r dyn ResourceResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Base identifier of the counted document
    pub fn with_system_id(mut self, system_id: impl Into<String>) -> Self {
        self.system_id = Some(system_id.into());
        self
    }

    pub fn mode(&self) -> CountMode {
        self.mode
    }

    /// Document totals; final once the stream has ended
    pub fn counts(&self) -> Counts {
        self.tallies.first().map(|t| t.counts).unwrap_or_default()
    }

    pub fn tests(&self) -> u64 {
        self.counts().tests
    }

    pub fn pending_tests(&self) -> u64 {
        self.counts().pending_tests
    }

    pub fn passed(&self) -> u64 {
        self.counts().passed
    }

    pub fn failed(&self) -> u64 {
        self.counts().failed
    }

    /// Shared scenarios defined so far, by label
    pub fn shared_scenarios(&self) -> &HashMap<String, Counts> {
        &self.shared
    }

    fn active(&mut self) -> &mut Tally {
        if self.tallies.is_empty() {
            self.tallies.push(Tally::default());
        }
        let last = self.tallies.len() - 1;
        &mut self.tallies[last]
    }

    fn location(&self) -> String {
        self.system_id.clone().unwrap_or_else(|| "<stream>".to_string())
    }

    fn start_scenario(&mut self, attributes: &[Attribute]) -> Frame {
        let shared = attribute_value(attributes, "shared").is_some_and(is_true);
        let pending = attribute_value(attributes, "pending").is_some();

        if shared && self.mode == CountMode::Specification {
            self.tallies.push(Tally::default());
            if pending {
                self.active().pending_depth += 1;
            }
            Frame::Shared {
                label: attribute_value(attributes, "label").map(str::to_string),
            }
        } else if pending {
            self.active().pending_depth += 1;
            Frame::Pending
        } else {
            Frame::Plain
        }
    }

    fn count_expect(&mut self, attributes: &[Attribute]) {
        let explicit = attribute_value(attributes, "pending").is_some();
        let tally = self.active();
        tally.counts.tests += 1;
        if explicit || tally.pending_depth > 0 {
            tally.counts.pending_tests += 1;
        }
    }

    fn count_test(&mut self, attributes: &[Attribute]) {
        let explicit = attribute_value(attributes, "pending").is_some();
        let successful = attribute_value(attributes, "successful").is_some_and(is_true);
        let tally = self.active();
        tally.counts.tests += 1;
        if explicit || tally.pending_depth > 0 {
            tally.counts.pending_tests += 1;
        } else if successful {
            tally.counts.passed += 1;
        } else {
            tally.counts.failed += 1;
        }
    }

    fn apply_like(&mut self, attributes: &[Attribute]) -> Result<()> {
        let label = attribute_value(attributes, "label").unwrap_or_default();
        let Some(shared) = self.shared.get(label).copied() else {
            return Err(RunnerError::UnresolvedSharedScenario {
                label: label.to_string(),
                location: self.location(),
            });
        };
        let tally = self.active();
        tally.counts.tests += shared.tests;
        tally.counts.pending_tests += shared.pending_tests;
        Ok(())
    }

    fn apply_import(&mut self, attributes: &[Attribute]) -> Result<()> {
        let Some(href) = attribute_value(attributes, "href") else {
            log::warn!("Import without href in {}", self.location());
            return Ok(());
        };
        let Some(resolver) = self.resolver else {
            log::warn!("No resolver for import '{}' in {}", href, self.location());
            return Ok(());
        };

        let source = match resolver.require(href, self.system_id.as_deref()) {
            Ok(source) => source,
            Err(e) => {
                log::warn!("Import contributes no tests: {}", e);
                return Ok(());
            }
        };

        let id = source.system_id().to_string();
        if self.ancestors.contains(&id) || self.system_id.as_deref() == Some(id.as_str()) {
            log::warn!("Import cycle through {} skipped", id);
            return Ok(());
        }

        let mut ancestors = self.ancestors.clone();
        ancestors.extend(self.system_id.clone());
        let (counts, shared) = count_nested(&source, resolver, ancestors)?;
        log::debug!(
            "Import {} contributes {} test(s), {} pending",
            id,
            counts.tests,
            counts.pending_tests
        );

        let tally = self.active();
        tally.counts.tests += counts.tests;
        tally.counts.pending_tests += counts.pending_tests;
        self.shared.extend(shared);
        Ok(())
    }
}

impl EventSink for ResultCounter<'_> {
    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<()> {
        let frame = match (XspecElement::from_name(name), self.mode) {
            (Some(XspecElement::Scenario), _) => self.start_scenario(attributes),
            (Some(XspecElement::Pending), _) => {
                self.active().pending_depth += 1;
                Frame::Pending
            }
            (Some(XspecElement::Expect), CountMode::Specification) => {
                self.count_expect(attributes);
                Frame::Plain
            }
            (Some(XspecElement::Test), CountMode::Report) => {
                self.count_test(attributes);
                Frame::Plain
            }
            (Some(XspecElement::Like), CountMode::Specification) => {
                self.apply_like(attributes)?;
                Frame::Plain
            }
            (Some(XspecElement::Import), CountMode::Specification) => {
                self.apply_import(attributes)?;
                Frame::Plain
            }
            (Some(XspecElement::Label), CountMode::Specification)
                if matches!(self.frames.last(), Some(Frame::Shared { label: None })) =>
            {
                Frame::Label {
                    text: String::new(),
                }
            }
            _ => Frame::Plain,
        };
        self.frames.push(frame);
        Ok(())
    }

    fn end_element(&mut self, _name: &QName) -> Result<()> {
        match self.frames.pop() {
            None | Some(Frame::Plain) => {}
            Some(Frame::Pending) => {
                let tally = self.active();
                tally.pending_depth = tally.pending_depth.saturating_sub(1);
            }
            Some(Frame::Shared { label }) => {
                // The global tally is never popped
                if self.tallies.len() > 1 {
                    if let Some(tally) = self.tallies.pop() {
                        match label.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()) {
                            Some(label) => {
                                self.shared.insert(label, tally.counts);
                            }
                            None => log::warn!(
                                "Shared scenario without a label in {}",
                                self.location()
                            ),
                        }
                    }
                }
            }
            Some(Frame::Label { text }) => {
                if let Some(Frame::Shared { label }) = self.frames.last_mut() {
                    label.get_or_insert(text);
                }
            }
        }
        Ok(())
    }

    fn text(&mut self, content: &str) -> Result<()> {
        if let Some(Frame::Label { text }) = self.frames.last_mut() {
            text.push_str(content);
        }
        Ok(())
    }
}

fn is_true(value: &str) -> bool {
    matches!(value.trim(), "true" | "yes" | "1")
}

/// Count a specification with a fresh counter
pub fn count_source(source: &Source, resolver: &dyn ResourceResolver) -> Result<Counts> {
    count_nested(source, resolver, Vec::new()).map(|(counts, _)| counts)
}

/// Count a report document (run-time trace) from a source
pub fn count_report(source: &Source) -> Result<Counts> {
    let mut counter = ResultCounter::new(CountMode::Report).with_system_id(source.system_id());
    sax::parse_source(source, &mut counter)?;
    Ok(counter.counts())
}

fn count_nested(
    source: &Source,
    resolver: &dyn ResourceResolver,
    ancestors: Vec<String>,
) -> Result<(Counts, HashMap<String, Counts>)> {
    let mut counter = ResultCounter::new(CountMode::Specification)
        .with_resolver(resolver)
        .with_system_id(source.system_id());
    counter.ancestors = ancestors;
    sax::parse_source(source, &mut counter)?;
    Ok((counter.counts(), counter.shared))
}
