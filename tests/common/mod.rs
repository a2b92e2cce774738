#![allow(dead_code)]

use std::sync::Arc;

use dav_engine::body::Body;
use dav_engine::{DavHandler, LockSystem, MemStore};
use http::{HeaderMap, Request, StatusCode};
use xmltree::Element;

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl Reply {
    pub fn xml(&self) -> Element {
        Element::parse(self.body.as_bytes())
            .unwrap_or_else(|e| panic!("not xml ({}): {}", e, self.body))
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .map(|v| v.to_str().unwrap().to_string())
    }
}

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A store with `/a/`, `/a/b/`, `/a/b/c` and `/a/d`.
pub fn tree() -> Arc<MemStore> {
    init_log();
    let store = MemStore::new();
    store.add_collection("/a").unwrap();
    store.add_collection("/a/b").unwrap();
    store.add_resource("/a/b/c", "ccc").unwrap();
    store.add_resource("/a/d", "dd").unwrap();
    store
}

pub fn handler(store: &Arc<MemStore>) -> DavHandler {
    DavHandler::builder(store.clone())
        .locksystem(LockSystem::Mem)
        .build()
}

pub async fn send(dav: &DavHandler, method: &str, uri: &str, headers: &[(&str, &str)], body: &str) -> Reply {
    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Host", "localhost");
    for (k, v) in headers {
        req = req.header(*k, *v);
    }
    let req = req.body(Body::from(body.to_string())).unwrap();
    let resp = dav.handle(req).await;
    let (parts, mut body) = resp.into_parts();
    Reply {
        status: parts.status,
        headers: parts.headers,
        body: String::from_utf8(body.take_bytes().to_vec()).unwrap(),
    }
}

pub fn elems<'a>(e: &'a Element, name: &str) -> Vec<&'a Element> {
    e.children
        .iter()
        .filter_map(|n| n.as_element())
        .filter(|c| c.name == name)
        .collect()
}

pub fn child<'a>(e: &'a Element, name: &str) -> &'a Element {
    elems(e, name)
        .into_iter()
        .next()
        .unwrap_or_else(|| panic!("no {} in {}", name, e.name))
}

pub fn text(e: &Element) -> String {
    e.get_text().map(|t| t.trim().to_string()).unwrap_or_default()
}

fn status_code(line: &str) -> u16 {
    line.split_whitespace().nth(1).unwrap().parse().unwrap()
}

/// The `href`s of a multistatus, in order.
pub fn hrefs(ms: &Element) -> Vec<String> {
    elems(ms, "response")
        .into_iter()
        .map(|r| text(child(r, "href")))
        .collect()
}

/// The `response` element for `href`.
pub fn response<'a>(ms: &'a Element, href: &str) -> &'a Element {
    elems(ms, "response")
        .into_iter()
        .find(|r| text(child(r, "href")) == href)
        .unwrap_or_else(|| panic!("no response for {}", href))
}

/// Status of a response that carries a single status.
pub fn response_status(resp: &Element) -> u16 {
    status_code(&text(child(resp, "status")))
}

/// Status and element of property `name` (local name) in a response.
pub fn prop<'a>(resp: &'a Element, name: &str) -> Option<(u16, &'a Element)> {
    for ps in elems(resp, "propstat") {
        let status = status_code(&text(child(ps, "status")));
        if let Some(p) = elems(child(ps, "prop"), name).into_iter().next() {
            return Some((status, p));
        }
    }
    None
}

pub fn prop_status(resp: &Element, name: &str) -> Option<u16> {
    prop(resp, name).map(|(s, _)| s)
}

pub const LOCKINFO: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:exclusive/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
  <D:owner><D:href>http://example.org/~ejw/contact.html</D:href></D:owner>
</D:lockinfo>"#;

pub const LOCKINFO_SHARED: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:shared/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
</D:lockinfo>"#;

/// Take out an exclusive lock, return the token without brackets.
pub async fn lock(dav: &DavHandler, uri: &str, depth: &str) -> String {
    let r = send(dav, "LOCK", uri, &[("Depth", depth)], LOCKINFO).await;
    assert_eq!(r.status, StatusCode::OK, "{}", r.body);
    let t = r.header("Lock-Token").unwrap();
    t.trim_start_matches('<').trim_end_matches('>').to_string()
}
