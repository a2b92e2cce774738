//! The XML response model: `multistatus`, `response` and `propstat`.
//!
//! Everything here is a plain data container. A document is built up in
//! memory while a request is handled and serialized exactly once, by
//! [`MultiStatus::render`] or [`render_document`].
//!
//! Property and element names are passed around as tags of the form
//! `{namespace}localname`. A tag without braces has no namespace at all,
//! which is different from the empty namespace `{}localname`.
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Response, StatusCode};
use xml::writer::XmlEvent as XmlWEvent;
use xmltree::Element;

use crate::body::Body;
use crate::util::MemBuffer;
use crate::xmltree_ext::{self, ElementExt, NS_DAV_URI};
use crate::{DavError, DavResult};

// prefix used for elements in a namespace other than DAV:.
const FOREIGN_PREFIX: &str = "ns0";

/// Split a `{namespace}local` tag into its parts.
pub fn parse_tag(tag: &str) -> (Option<String>, String) {
    if let Some(rest) = tag.strip_prefix('{') {
        if let Some((ns, local)) = rest.split_once('}') {
            return (Some(ns.to_string()), local.to_string());
        }
    }
    (None, tag.to_string())
}

/// Build a `{namespace}local` tag. Inverse of [`parse_tag`].
pub fn format_tag(namespace: Option<&str>, local: &str) -> String {
    match namespace {
        Some(ns) => format!("{{{}}}{}", ns, local),
        None => local.to_string(),
    }
}

/// The tag of an element.
pub fn element_tag(elem: &Element) -> String {
    format_tag(elem.namespace.as_deref(), &elem.name)
}

/// An empty element for a tag, with its namespace declared on the element.
pub fn element_for_tag(tag: &str) -> Element {
    let (ns, local) = parse_tag(tag);
    let mut elem = Element::new(&local);
    match ns.as_deref() {
        Some(NS_DAV_URI) => {
            elem.prefix = Some("D".to_string());
            elem = elem.ns("D", NS_DAV_URI);
        }
        Some("") | None => {}
        Some(uri) => {
            elem.prefix = Some(FOREIGN_PREFIX.to_string());
            elem = elem.ns(FOREIGN_PREFIX, uri);
        }
    }
    elem.namespace = ns.filter(|ns| !ns.is_empty());
    elem
}

// fixed status/reason table.
const STATUS_REASONS: &[(u16, &str)] = &[
    (100, "Continue"),
    (101, "Switching Protocols"),
    (102, "Processing"),
    (200, "OK"),
    (201, "Created"),
    (202, "Accepted"),
    (203, "Non-Authoritative Information"),
    (204, "No Content"),
    (205, "Reset Content"),
    (206, "Partial Content"),
    (207, "Multi-Status"),
    (300, "Multiple Choices"),
    (301, "Moved Permanently"),
    (302, "Moved Temporarily"),
    (303, "See Other"),
    (304, "Not Modified"),
    (305, "Use Proxy"),
    (307, "Temporary Redirect"),
    (400, "Bad Request"),
    (401, "Unauthorized"),
    (402, "Payment Required"),
    (403, "Forbidden"),
    (404, "Not Found"),
    (405, "Method Not Allowed"),
    (406, "Not Acceptable"),
    (407, "Proxy Authentication Required"),
    (408, "Request Time-out"),
    (409, "Conflict"),
    (410, "Gone"),
    (411, "Length Required"),
    (412, "Precondition Failed"),
    (413, "Request Entity Too Large"),
    (414, "Request-URI Too Large"),
    (415, "Unsupported Media Type"),
    (416, "Requested range not satisfiable"),
    (417, "Expectation Failed"),
    (422, "Unprocessable Entity"),
    (423, "Locked"),
    (424, "Failed Dependency"),
    (500, "Internal Server Error"),
    (501, "Not Implemented"),
    (502, "Bad Gateway"),
    (503, "Service Unavailable"),
    (504, "Gateway Time-out"),
    (505, "HTTP Version not supported"),
    (507, "Insufficient Storage"),
];

/// `HTTP/1.1 <code> <reason>`. An unknown code is a bug in the caller.
pub fn status_line(code: StatusCode) -> DavResult<String> {
    let code = code.as_u16();
    match STATUS_REASONS.iter().find(|(c, _)| *c == code) {
        Some((_, reason)) => Ok(format!("HTTP/1.1 {} {}", code, reason)),
        None => {
            error!("status_line: no reason phrase for {}", code);
            Err(DavError::ContractViolation("unknown status code"))
        }
    }
}

/// A group of properties sharing one status.
#[derive(Debug, Clone)]
pub struct PropStat {
    pub status: StatusCode,
    pub properties: Vec<Element>,
    pub description: Option<String>,
}

impl PropStat {
    fn new(status: StatusCode) -> PropStat {
        PropStat {
            status,
            properties: Vec::new(),
            description: None,
        }
    }
}

/// One `response` element of a multistatus.
#[derive(Debug, Clone)]
pub struct DavResponse {
    href: String,
    status: Option<StatusCode>,
    propstats: Vec<PropStat>,
    error: Option<Element>,
    description: Option<String>,
    location: Option<String>,
}

impl DavResponse {
    /// `href` must already be URL encoded.
    pub fn new(href: impl Into<String>) -> DavResponse {
        DavResponse {
            href: href.into(),
            status: None,
            propstats: Vec::new(),
            error: None,
            description: None,
            location: None,
        }
    }

    /// Response carrying a single status.
    pub fn with_status(href: impl Into<String>, status: StatusCode) -> DavResponse {
        let mut r = DavResponse::new(href);
        r.status = Some(status);
        r
    }

    pub fn href(&self) -> &str {
        &self.href
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    /// Append a property to the propstat bucket for `status`.
    pub fn add_property(&mut self, status: StatusCode, elem: Element) {
        self.propstat_mut(status).properties.push(elem);
    }

    /// The propstat bucket for `status`, created if needed.
    pub fn propstat_mut(&mut self, status: StatusCode) -> &mut PropStat {
        let idx = match self.propstats.iter().position(|p| p.status == status) {
            Some(idx) => idx,
            None => {
                self.propstats.push(PropStat::new(status));
                self.propstats.len() - 1
            }
        };
        &mut self.propstats[idx]
    }

    pub fn propstats(&self) -> &[PropStat] {
        &self.propstats
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = Some(description.into());
    }

    pub fn set_error(&mut self, error: Element) {
        self.error = Some(error);
    }

    pub fn set_location(&mut self, location: impl Into<String>) {
        self.location = Some(location.into());
    }

    fn write_ev<W: std::io::Write>(
        &self,
        emitter: &mut xml::writer::EventWriter<W>,
    ) -> DavResult<()> {
        if self.status.is_some() && !self.propstats.is_empty() {
            return Err(DavError::ContractViolation(
                "response has both a status and propstats",
            ));
        }
        emitter.write(XmlWEvent::start_element("D:response"))?;
        Element::new2("D:href")
            .text(self.href.as_str())
            .write_ev(emitter)?;

        if let Some(status) = self.status {
            Element::new2("D:status")
                .text(status_line(status)?)
                .write_ev(emitter)?;
        }

        // propstats go out sorted by status code.
        let mut propstats = self.propstats.iter().collect::<Vec<_>>();
        propstats.sort_by_key(|p| p.status.as_u16());
        for ps in propstats {
            emitter.write(XmlWEvent::start_element("D:propstat"))?;
            emitter.write(XmlWEvent::start_element("D:prop"))?;
            for e in &ps.properties {
                e.write_ev(emitter)?;
            }
            emitter.write(XmlWEvent::end_element())?;
            Element::new2("D:status")
                .text(status_line(ps.status)?)
                .write_ev(emitter)?;
            if let Some(ref d) = ps.description {
                Element::new2("D:responsedescription")
                    .text(d.as_str())
                    .write_ev(emitter)?;
            }
            emitter.write(XmlWEvent::end_element())?;
        }

        if let Some(ref e) = self.error {
            Element::new2("D:error").child(e.clone()).write_ev(emitter)?;
        }
        if let Some(ref d) = self.description {
            Element::new2("D:responsedescription")
                .text(d.as_str())
                .write_ev(emitter)?;
        }
        if let Some(ref l) = self.location {
            Element::new2("D:location")
                .child(Element::new2("D:href").text(l.as_str()))
                .write_ev(emitter)?;
        }
        emitter.write(XmlWEvent::end_element())?;
        Ok(())
    }
}

/// A `207 Multi-Status` document.
#[derive(Debug, Clone, Default)]
pub struct MultiStatus {
    responses: Vec<DavResponse>,
    description: Option<String>,
}

impl MultiStatus {
    pub fn new() -> MultiStatus {
        MultiStatus::default()
    }

    pub fn push(&mut self, response: DavResponse) {
        self.responses.push(response);
    }

    pub fn responses(&self) -> &[DavResponse] {
        &self.responses
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = Some(description.into());
    }

    /// Serialize to an XML document. Responses appear in insertion order.
    pub fn render(&self) -> DavResult<Bytes> {
        let mut emitter = xmltree_ext::new_document(MemBuffer::new())?;
        emitter.write(XmlWEvent::start_element("D:multistatus").ns("D", NS_DAV_URI))?;
        for r in &self.responses {
            r.write_ev(&mut emitter)?;
        }
        if let Some(ref d) = self.description {
            Element::new2("D:responsedescription")
                .text(d.as_str())
                .write_ev(&mut emitter)?;
        }
        emitter.write(XmlWEvent::end_element())?;
        Ok(emitter.into_inner().take())
    }

    /// Render into a complete `207` HTTP response.
    pub(crate) fn into_response(self) -> DavResult<Response<Body>> {
        let body = self.render()?;
        debug!(target: "xml", "multistatus:\n{}", String::from_utf8_lossy(&body));
        Ok(xml_response(StatusCode::MULTI_STATUS, body))
    }
}

/// Serialize a single element as a complete XML document.
pub fn render_document(elem: &Element) -> DavResult<Bytes> {
    let mut emitter = xmltree_ext::new_document(MemBuffer::new())?;
    elem.write_ev(&mut emitter)?;
    Ok(emitter.into_inner().take())
}

pub(crate) fn xml_response(status: StatusCode, body: Bytes) -> Response<Body> {
    let mut res = Response::new(Body::from(body));
    *res.status_mut() = status;
    res.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/xml; charset=utf-8"),
    );
    res
}
