//! Namespaced XML event model shared by every stage of the pipeline.
//!
//! Producers (the SAX driver, transform engines, in-memory documents) push
//! events into an [`EventSink`]. Consumers are plain sinks: the result
//! counter, the report serializers, the document builder. [`FanOut`] drives a
//! fixed set of sinks in lock-step so they all observe one event sequence.

use crate::error::Result;

/// A namespace-qualified element or attribute name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub prefix: Option<String>,
    pub local_name: String,
    pub namespace_uri: Option<String>,
}

impl QName {
    pub fn new(local_name: impl Into<String>) -> Self {
        Self {
            prefix: None,
            local_name: local_name.into(),
            namespace_uri: None,
        }
    }

    pub fn with_namespace(
        prefix: Option<String>,
        local_name: impl Into<String>,
        namespace_uri: Option<String>,
    ) -> Self {
        Self {
            prefix,
            local_name: local_name.into(),
            namespace_uri,
        }
    }

    /// True when this name is `local_name` in namespace `namespace_uri`
    pub fn is(&self, namespace_uri: &str, local_name: &str) -> bool {
        self.local_name == local_name && self.namespace_uri.as_deref() == Some(namespace_uri)
    }

    pub fn in_namespace(&self, namespace_uri: &str) -> bool {
        self.namespace_uri.as_deref() == Some(namespace_uri)
    }

    /// The `prefix:local` form used when serializing
    pub fn lexical(&self) -> String {
        match &self.prefix {
            Some(prefix) if !prefix.is_empty() => format!("{}:{}", prefix, self.local_name),
            _ => self.local_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

impl Attribute {
    pub fn new(local_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: QName::new(local_name),
            value: value.into(),
        }
    }
}

/// Value of the first attribute in no namespace named `local_name`
pub fn attribute_value<'a>(attributes: &'a [Attribute], local_name: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|a| a.name.namespace_uri.is_none() && a.name.local_name == local_name)
        .map(|a| a.value.as_str())
}

/// Owned form of a single streamed event
#[derive(Debug, Clone, PartialEq)]
pub enum XmlEvent {
    /// Binding declared on the element that starts next; an empty prefix is
    /// the default namespace
    PrefixMapping {
        prefix: String,
        uri: String,
    },
    StartElement {
        name: QName,
        attributes: Vec<Attribute>,
    },
    EndElement {
        name: QName,
    },
    Text(String),
    Comment(String),
    ProcessingInstruction {
        target: String,
        data: String,
    },
}

impl XmlEvent {
    /// Push this event into `sink`
    pub fn dispatch(&self, sink: &mut dyn EventSink) -> Result<()> {
        match self {
            XmlEvent::PrefixMapping { prefix, uri } => sink.start_prefix_mapping(prefix, uri),
            XmlEvent::StartElement { name, attributes } => sink.start_element(name, attributes),
            XmlEvent::EndElement { name } => sink.end_element(name),
            XmlEvent::Text(content) => sink.text(content),
            XmlEvent::Comment(content) => sink.comment(content),
            XmlEvent::ProcessingInstruction { target, data } => {
                sink.processing_instruction(target, data)
            }
        }
    }
}

/// SAX-style receiver of a document's event stream
pub trait EventSink {
    fn start_document(&mut self) -> Result<()> {
        Ok(())
    }

    fn end_document(&mut self) -> Result<()> {
        Ok(())
    }

    /// An `xmlns` declaration carried by the next `start_element`. Bindings
    /// can be needed by attribute values (XPath in `select`), not only names.
    fn start_prefix_mapping(&mut self, _prefix: &str, _uri: &str) -> Result<()> {
        Ok(())
    }

    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<()>;
    fn end_element(&mut self, name: &QName) -> Result<()>;
    fn text(&mut self, content: &str) -> Result<()>;

    fn comment(&mut self, _content: &str) -> Result<()> {
        Ok(())
    }

    fn processing_instruction(&mut self, _target: &str, _data: &str) -> Result<()> {
        Ok(())
    }
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn start_element(&mut self, _name: &QName, _attributes: &[Attribute]) -> Result<()> {
        Ok(())
    }

    fn end_element(&mut self, _name: &QName) -> Result<()> {
        Ok(())
    }

    fn text(&mut self, _content: &str) -> Result<()> {
        Ok(())
    }
}

/// Broadcasts each event, in order, to a fixed number of sinks.
///
/// The arity is part of the type, so configuration can only change what sits
/// in a slot (a real consumer or a [`NullSink`]), never how many slots exist.
/// A failing sink does not stop the others: every slot sees every event and
/// the first error is returned once all of them have been driven.
pub struct FanOut<'a, const N: usize> {
    sinks: [&'a mut dyn EventSink; N],
}

impl<'a, const N: usize> FanOut<'a, N> {
    pub fn new(sinks: [&'a mut dyn EventSink; N]) -> Self {
        Self { sinks }
    }

    pub fn arity(&self) -> usize {
        N
    }

    fn broadcast(&mut self, mut event: impl FnMut(&mut dyn EventSink) -> Result<()>) -> Result<()> {
        let mut first_error = None;
        for sink in self.sinks.iter_mut() {
            if let Err(e) = event(&mut **sink) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl<const N: usize> EventSink for FanOut<'_, N> {
    fn start_document(&mut self) -> Result<()> {
        self.broadcast(|sink| sink.start_document())
    }

    fn end_document(&mut self) -> Result<()> {
        self.broadcast(|sink| sink.end_document())
    }

    fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> Result<()> {
        self.broadcast(|sink| sink.start_prefix_mapping(prefix, uri))
    }

    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<()> {
        self.broadcast(|sink| sink.start_element(name, attributes))
    }

    fn end_element(&mut self, name: &QName) -> Result<()> {
        self.broadcast(|sink| sink.end_element(name))
    }

    fn text(&mut self, content: &str) -> Result<()> {
        self.broadcast(|sink| sink.text(content))
    }

    fn comment(&mut self, content: &str) -> Result<()> {
        self.broadcast(|sink| sink.comment(content))
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
        self.broadcast(|sink| sink.processing_instruction(target, data))
    }
}

/// Two-way broadcast
pub type Tee<'a> = FanOut<'a, 2>;

/// A fully materialised document, kept for transform inputs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    /// Absolute identifier of the resource this document was parsed from.
    /// `None` for documents constructed from a transform's output.
    pub system_id: Option<String>,
    pub events: Vec<XmlEvent>,
}

impl Document {
    /// Replay the document into `sink`, including the document boundaries
    pub fn replay(&self, sink: &mut dyn EventSink) -> Result<()> {
        sink.start_document()?;
        for event in &self.events {
            event.dispatch(sink)?;
        }
        sink.end_document()
    }

    /// Root element name and attributes, if the document has one
    pub fn root(&self) -> Option<(&QName, &[Attribute])> {
        self.events.iter().find_map(|event| match event {
            XmlEvent::StartElement { name, attributes } => Some((name, attributes.as_slice())),
            _ => None,
        })
    }
}

/// Sink that records events into a [`Document`]
#[derive(Debug, Default)]
pub struct DocumentBuilder {
    document: Document,
}

impl DocumentBuilder {
    pub fn new(system_id: Option<String>) -> Self {
        Self {
            document: Document {
                system_id,
                events: Vec::new(),
            },
        }
    }

    pub fn into_document(self) -> Document {
        self.document
    }

    pub fn is_empty(&self) -> bool {
        self.document.events.is_empty()
    }
}

impl EventSink for DocumentBuilder {
    fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) -> Result<()> {
        self.document.events.push(XmlEvent::PrefixMapping {
            prefix: prefix.to_string(),
            uri: uri.to_string(),
        });
        Ok(())
    }

    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<()> {
        self.document.events.push(XmlEvent::StartElement {
            name: name.clone(),
            attributes: attributes.to_vec(),
        });
        Ok(())
    }

    fn end_element(&mut self, name: &QName) -> Result<()> {
        self.document
            .events
            .push(XmlEvent::EndElement { name: name.clone() });
        Ok(())
    }

    fn text(&mut self, content: &str) -> Result<()> {
        // Adjacent text runs are merged so CDATA/text splits do not leak out
        if let Some(XmlEvent::Text(previous)) = self.document.events.last_mut() {
            previous.push_str(content);
        } else {
            self.document.events.push(XmlEvent::Text(content.to_string()));
        }
        Ok(())
    }

    fn comment(&mut self, content: &str) -> Result<()> {
        self.document
            .events
            .push(XmlEvent::Comment(content.to_string()));
        Ok(())
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<()> {
        self.document.events.push(XmlEvent::ProcessingInstruction {
            target: target.to_string(),
            data: data.to_string(),
        });
        Ok(())
    }
}
