//! XML serializer sink.
//!
//! Namespace declarations received through prefix mappings are written on
//! the element that follows them, so bindings only used inside attribute
//! values survive. Any further binding an element or attribute name needs is
//! declared the first time it is not already in scope.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesPI, BytesStart, BytesText, Event};

use crate::error::Result;
use crate::event::{Attribute, Document, EventSink, QName};

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Namespace bindings declared on one open element
type Scope = Vec<(String, String)>;

pub struct XmlSerializer<W: Write> {
    writer: Writer<W>,
    scopes: Vec<Scope>,
    /// Declarations waiting for the next start tag
    pending: Scope,
    declaration: bool,
}

impl XmlSerializer<BufWriter<File>> {
    /// Serialize into a new file, creating missing parent directories
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> XmlSerializer<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: Writer::new(inner),
            scopes: Vec::new(),
            pending: Vec::new(),
            declaration: true,
        }
    }

    /// Leave out the `<?xml ...?>` declaration
    pub fn without_declaration(mut self) -> Self {
        self.declaration = false;
        self
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn in_scope(&self, prefix: &str) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter())
            .find(|(p, _)| p == prefix)
            .map(|(_, uri)| uri.as_str())
    }

    /// Bindings `name` needs that the enclosing scopes do not provide
    fn required_binding(&self, name: &QName, is_attribute: bool) -> Option<(String, String)> {
        let prefix = name.prefix.clone().unwrap_or_default();
        if prefix == "xml" || name.namespace_uri.as_deref() == Some(XML_NAMESPACE) {
            return None;
        }
        match name.namespace_uri.as_deref() {
            Some(uri) => {
                if is_attribute && prefix.is_empty() {
                    return None;
                }
                (self.in_scope(&prefix) != Some(uri)).then(|| (prefix, uri.to_string()))
            }
            // An unqualified element must undeclare an inherited default namespace
            None if !is_attribute && prefix.is_empty() => match self.in_scope("") {
                Some(uri) if !uri.is_empty() => Some((String::new(), String::new())),
                _ => None,
            },
            None => None,
        }
    }
}

impl<W: Write> EventSink for XmlSerializer<W> {
    fn start_document(&mut self) -> Result<()> {
        if self.declaration {
            self.writer
                .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        }
        Ok(())
    }

    fn end_document(&mut self) -> Result<()> {
        self.writer.get_mut().flush()?;
        Ok(())
    }

    fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> Result<()> {
        if !self.pending.iter().any(|(p, _)| p == prefix) {
            self.pending.push((prefix.to_string(), uri.to_string()));
        }
        Ok(())
    }

    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<()> {
        self.scopes.push(std::mem::take(&mut self.pending));
        let names = std::iter::once((name, false)).chain(attributes.iter().map(|a| (&a.name, true)));
        let mut required: Scope = Vec::new();
        for (qname, is_attribute) in names {
            if let Some(binding) = self.required_binding(qname, is_attribute)
                && !required.iter().any(|(p, _)| *p == binding.0)
            {
                required.push(binding);
            }
        }
        let mut scope = self.scopes.pop().unwrap_or_default();
        for binding in required {
            match scope.iter_mut().find(|(p, _)| *p == binding.0) {
                Some(declared) => *declared = binding,
                None => scope.push(binding),
            }
        }

        let lexical = name.lexical();
        let mut start = BytesStart::new(lexical.as_str());
        for (prefix, uri) in &scope {
            let key = if prefix.is_empty() {
                "xmlns".to_string()
            } else {
                format!("xmlns:{}", prefix)
            };
            start.push_attribute((key.as_str(), uri.as_str()));
        }
        for attribute in attributes {
            start.push_attribute((attribute.name.lexical().as_str(), attribute.value.as_str()));
        }

        self.writer.write_event(Event::Start(start))?;
        self.scopes.push(scope);
        Ok(())
    }

    fn end_element(&mut self, name: &QName) -> Result<()> {
        self.writer
            .write_event(Event::End(BytesEnd::new(name.lexical())))?;
        self.scopes.pop();
        Ok(())
    }

    fn text(&mut self, content: &str) -> Result<()> {
        self.writer.write_event(Event::Text(BytesText::new(content)))?;
        Ok(())
    }

    fn comment(&mut self, content: &str) -> Result<()> {
        self.writer
            .write_event(Event::Comment(BytesText::from_escaped(content)))?;
        Ok(())
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
        let content = if data.is_empty() {
            target.to_string()
        } else {
            format!("{} {}", target, data)
        };
        self.writer.write_event(Event::PI(BytesPI::new(content)))?;
        Ok(())
    }
}

/// Serialize a document to a string
pub fn to_xml_string(document: &Document) -> Result<String> {
    let mut serializer = XmlSerializer::new(Vec::new());
    document.replay(&mut serializer)?;
    Ok(String::from_utf8_lossy(&serializer.into_inner()).into_owned())
}

/// Serialize a document to `path`, creating parent directories
pub fn write_document(document: &Document, path: &Path) -> Result<PathBuf> {
    let mut serializer = XmlSerializer::create(path)?;
    document.replay(&mut serializer)?;
    Ok(path.to_path_buf())
}
