//! Streaming XML driver.
//!
//! Reads a document with quick-xml's namespace-aware reader and pushes every
//! significant event into an [`EventSink`]. Nothing is buffered beyond the
//! current event; empty elements are expanded into start/end pairs.

use std::borrow::Cow;
use std::io::BufRead;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{PrefixDeclaration, ResolveResult};
use quick_xml::reader::NsReader;

use crate::error::Result;
use crate::event::{Attribute, Document, DocumentBuilder, EventSink, QName};
use crate::resolver::Source;

/// Drive `sink` with the events of the document read from `input`
pub fn parse_reader<R: BufRead>(input: R, sink: &mut dyn EventSink) -> Result<()> {
    let mut reader = NsReader::from_reader(input);
    reader.config_mut().expand_empty_elements = true;
    let mut buf = Vec::new();

    sink.start_document()?;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                for (prefix, uri) in namespace_declarations(&e)? {
                    sink.start_prefix_mapping(&prefix, &uri)?;
                }
                let name = element_name(&reader, &e);
                let attributes = owned_attributes(&reader, &e)?;
                sink.start_element(&name, &attributes)?;
            }
            Event::End(e) => {
                let (ns, local) = reader.resolve_element(e.name());
                let name = QName::with_namespace(
                    e.name()
                        .prefix()
                        .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned()),
                    String::from_utf8_lossy(local.as_ref()).into_owned(),
                    namespace_uri(ns),
                );
                sink.end_element(&name)?;
            }
            Event::Text(e) => {
                let text = e.unescape()?;
                if !text.is_empty() {
                    sink.text(&text)?;
                }
            }
            Event::CData(e) => {
                sink.text(&String::from_utf8_lossy(&e))?;
            }
            Event::Comment(e) => {
                sink.comment(&String::from_utf8_lossy(&e))?;
            }
            Event::PI(e) => {
                let target = String::from_utf8_lossy(e.target()).into_owned();
                let data = String::from_utf8_lossy(e.content());
                sink.processing_instruction(&target, data.trim_start())?;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    sink.end_document()
}

/// Drive `sink` with the events of a resolved source
pub fn parse_source(source: &Source, sink: &mut dyn EventSink) -> Result<()> {
    let input = source.open()?;
    parse_reader(input, sink)
}

pub fn parse_str(xml: &str, sink: &mut dyn EventSink) -> Result<()> {
    parse_reader(xml.as_bytes(), sink)
}

/// Parse a source fully into memory, keeping its system identifier
pub fn parse_document(source: &Source) -> Result<Document> {
    let mut builder = DocumentBuilder::new(Some(source.system_id().to_string()));
    parse_source(source, &mut builder)?;
    Ok(builder.into_document())
}

/// Read only as far as the root element and return its name and attributes
pub fn root_element(source: &Source) -> Result<Option<(QName, Vec<Attribute>)>> {
    let mut reader = NsReader::from_reader(source.open()?);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) => {
                let name = element_name(&reader, &e);
                let attributes = owned_attributes(&reader, &e)?;
                return Ok(Some((name, attributes)));
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
        buf.clear();
    }
}

fn element_name<R>(reader: &NsReader<R>, e: &BytesStart<'_>) -> QName {
    let (ns, local) = reader.resolve_element(e.name());
    QName::with_namespace(
        e.name()
            .prefix()
            .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned()),
        String::from_utf8_lossy(local.as_ref()).into_owned(),
        namespace_uri(ns),
    )
}

/// `xmlns` declarations on `e` as `(prefix, uri)`, the default namespace
/// having an empty prefix
fn namespace_declarations(e: &BytesStart<'_>) -> Result<Vec<(String, String)>> {
    let mut declarations = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        let prefix = match attr.key.as_namespace_binding() {
            Some(PrefixDeclaration::Default) => String::new(),
            Some(PrefixDeclaration::Named(prefix)) => String::from_utf8_lossy(prefix).into_owned(),
            None => continue,
        };
        declarations.push((prefix, attr.unescape_value()?.into_owned()));
    }
    Ok(declarations)
}

/// Attributes in document order. Namespace declarations are reported
/// separately through [`EventSink::start_prefix_mapping`].
fn owned_attributes<R>(reader: &NsReader<R>, e: &BytesStart<'_>) -> Result<Vec<Attribute>> {
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        let (ns, local) = reader.resolve_attribute(attr.key);
        let name = QName::with_namespace(
            attr.key
                .prefix()
                .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned()),
            String::from_utf8_lossy(local.as_ref()).into_owned(),
            namespace_uri(ns),
        );
        let value: Cow<'_, str> = attr.unescape_value()?;
        attributes.push(Attribute {
            name,
            value: value.into_owned(),
        });
    }
    Ok(attributes)
}

fn namespace_uri(result: ResolveResult<'_>) -> Option<String> {
    match result {
        ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.as_ref()).into_owned()),
        ResolveResult::Unbound => None,
        ResolveResult::Unknown(prefix) => {
            log::debug!(
                "Undeclared namespace prefix '{}' treated as no namespace",
                String::from_utf8_lossy(&prefix)
            );
            None
        }
    }
}
