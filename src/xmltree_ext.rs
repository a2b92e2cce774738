use std::borrow::Cow;
use std::io::{Read, Write};

use xml::common::XmlVersion;
use xml::writer::EventWriter;
use xml::writer::XmlEvent as XmlWEvent;
use xml::EmitterConfig;
use xmltree::{Element, XMLNode};

use crate::{DavError, DavResult};

pub(crate) const NS_DAV_URI: &str = "DAV:";

pub(crate) trait ElementExt {
    /// Builder: element from "prefix:name". The "D" prefix maps to DAV:.
    fn new2<'a, E: Into<&'a str>>(e: E) -> Self;
    /// Builder: add a namespace declaration.
    fn ns<S: Into<String>>(self, prefix: S, namespace: S) -> Self;
    /// Builder: add a text child.
    fn text<T: Into<String>>(self, t: T) -> Self;
    /// Builder: add a child element.
    fn child(self, e: Element) -> Self;
    /// Parse, and refuse a document whose root element has no namespace.
    fn parse2<R: Read>(r: R) -> DavResult<Element>;
    /// Like `get_child`, but the namespace must match as well.
    fn get_child_ns(&self, ns: &str, name: &str) -> Option<&Element>;
    /// Does the element have this namespace and name.
    fn is(&self, ns: &str, name: &str) -> bool;
    fn push_element(&mut self, e: Element);
    fn child_elems_iter<'a>(&'a self) -> Box<dyn Iterator<Item = &'a Element> + 'a>;
    fn has_child_elems(&self) -> bool;
    /// Text content, without surrounding whitespace.
    fn text_content(&self) -> String;
    /// Write this element (recursively) into an existing emitter.
    fn write_ev<W: Write>(&self, emitter: &mut EventWriter<W>) -> xml::writer::Result<()>;
    /// Serialize this element standalone, no xml declaration.
    fn to_xml_string(&self) -> DavResult<String>;
}

impl ElementExt for Element {
    fn new2<'a, E: Into<&'a str>>(e: E) -> Element {
        let e = e.into();
        let mut x = match e.split_once(':') {
            Some((pfx, name)) => {
                let mut x = Element::new(name);
                x.prefix = Some(pfx.to_string());
                x
            }
            None => Element::new(e),
        };
        if x.prefix.as_deref() == Some("D") {
            x.namespace = Some(NS_DAV_URI.to_string());
            x = x.ns("D", NS_DAV_URI);
        }
        x
    }

    fn ns<S: Into<String>>(mut self, prefix: S, namespace: S) -> Element {
        let mut ns = self.namespaces.unwrap_or_else(xmltree::Namespace::empty);
        ns.force_put(prefix.into(), namespace.into());
        self.namespaces = Some(ns);
        self
    }

    fn text<T: Into<String>>(mut self, t: T) -> Element {
        let t = t.into();
        if !t.is_empty() {
            self.children.push(XMLNode::Text(t));
        }
        self
    }

    fn child(mut self, e: Element) -> Element {
        self.children.push(XMLNode::Element(e));
        self
    }

    fn parse2<R: Read>(r: R) -> DavResult<Element> {
        let elem = Element::parse(r)?;
        if elem.namespace.is_none() {
            return Err(DavError::XmlReadError);
        }
        Ok(elem)
    }

    fn get_child_ns(&self, ns: &str, name: &str) -> Option<&Element> {
        self.child_elems_iter().find(|e| e.is(ns, name))
    }

    fn is(&self, ns: &str, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some(ns)
    }

    fn push_element(&mut self, e: Element) {
        self.children.push(XMLNode::Element(e));
    }

    fn child_elems_iter<'a>(&'a self) -> Box<dyn Iterator<Item = &'a Element> + 'a> {
        Box::new(self.children.iter().filter_map(|n| n.as_element()))
    }

    fn has_child_elems(&self) -> bool {
        self.children.iter().any(|n| n.as_element().is_some())
    }

    fn text_content(&self) -> String {
        self.get_text()
            .map(|t| t.trim().to_string())
            .unwrap_or_default()
    }

    fn write_ev<W: Write>(&self, emitter: &mut EventWriter<W>) -> xml::writer::Result<()> {
        use xml::attribute::Attribute;
        use xml::name::Name;
        use xml::namespace::Namespace;

        let mut name = Name::local(&self.name);
        if let Some(ref ns) = self.namespace {
            name.namespace = Some(ns);
        }
        if let Some(ref p) = self.prefix {
            name.prefix = Some(p);
        }

        let mut attributes = Vec::with_capacity(self.attributes.len());
        for (k, v) in &self.attributes {
            attributes.push(Attribute {
                name: Name::local(k),
                value: v,
            });
        }

        let empty_ns = Namespace::empty();
        let namespace = match self.namespaces {
            Some(ref ns) => Cow::Borrowed(ns),
            None => Cow::Borrowed(&empty_ns),
        };

        emitter.write(XmlWEvent::StartElement {
            name,
            attributes: Cow::Owned(attributes),
            namespace,
        })?;
        for node in &self.children {
            match node {
                XMLNode::Element(elem) => elem.write_ev(emitter)?,
                XMLNode::Text(text) => emitter.write(XmlWEvent::Characters(text))?,
                XMLNode::Comment(comment) => emitter.write(XmlWEvent::Comment(comment))?,
                XMLNode::CData(data) => emitter.write(XmlWEvent::CData(data))?,
                XMLNode::ProcessingInstruction(name, data) => {
                    emitter.write(XmlWEvent::ProcessingInstruction {
                        name,
                        data: data.as_deref(),
                    })?
                }
            }
        }
        emitter.write(XmlWEvent::EndElement { name: Some(name) })?;
        Ok(())
    }

    fn to_xml_string(&self) -> DavResult<String> {
        let mut emitter = EventWriter::new_with_config(
            Vec::new(),
            EmitterConfig {
                write_document_declaration: false,
                normalize_empty_elements: true,
                perform_indent: false,
                ..Default::default()
            },
        );
        self.write_ev(&mut emitter)?;
        String::from_utf8(emitter.into_inner()).map_err(|_| DavError::XmlReadError)
    }
}

/// A new emitter that writes a complete document into `w`.
pub(crate) fn new_document<W: Write>(w: W) -> xml::writer::Result<EventWriter<W>> {
    let mut emitter = EventWriter::new_with_config(
        w,
        EmitterConfig {
            normalize_empty_elements: true,
            perform_indent: false,
            ..Default::default()
        },
    );
    emitter.write(XmlWEvent::StartDocument {
        version: XmlVersion::Version10,
        encoding: Some("utf-8"),
        standalone: None,
    })?;
    Ok(emitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new2_sets_dav_namespace() {
        let e = Element::new2("D:href").text("/x");
        assert!(e.is("DAV:", "href"));
        assert_eq!(e.text_content(), "/x");
    }

    #[test]
    fn to_xml_string_reparses() {
        let e = Element::new2("Z:Author")
            .ns("Z", "http://ns.example.com/z/")
            .text("Jim");
        let s = e.to_xml_string().unwrap();
        let back = Element::parse(s.as_bytes()).unwrap();
        assert!(back.is("http://ns.example.com/z/", "Author"));
        assert_eq!(back.text_content(), "Jim");
    }

    #[test]
    fn parse2_requires_namespace() {
        assert!(Element::parse2(&b"<propfind/>"[..]).is_err());
        assert!(Element::parse2(&b"<D:propfind xmlns:D=\"DAV:\"/>"[..]).is_ok());
    }
}
