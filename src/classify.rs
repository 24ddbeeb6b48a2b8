//! Decide what a specification tests from its root element alone.

use std::fmt;

use serde::Serialize;

use crate::error::{Result, RunnerError};
use crate::resolver::Source;
use crate::sax;

/// What a specification document targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecKind {
    Xslt,
    XQuery,
    Schematron,
}

impl SpecKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecKind::Xslt => "xslt",
            SpecKind::XQuery => "xquery",
            SpecKind::Schematron => "schematron",
        }
    }
}

impl fmt::Display for SpecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify by the first recognised root attribute in document order.
///
/// `query` and `query-at` mean XQuery, `schematron` means Schematron and
/// `stylesheet` means XSLT.
pub fn classify(source: &Source) -> Result<SpecKind> {
    let invalid = |details: &str| RunnerError::InvalidSpecification {
        location: source.system_id().to_string(),
        details: details.to_string(),
    };

    let (_, attributes) = sax::root_element(source)?.ok_or_else(|| invalid("no root element"))?;

    attributes
        .iter()
        .filter(|attribute| attribute.name.namespace_uri.is_none())
        .find_map(|attribute| match attribute.name.local_name.as_str() {
            "query" | "query-at" => Some(SpecKind::XQuery),
            "schematron" => Some(SpecKind::Schematron),
            "stylesheet" => Some(SpecKind::Xslt),
            _ => None,
        })
        .ok_or_else(|| invalid("root element names no stylesheet, query or schematron"))
}
