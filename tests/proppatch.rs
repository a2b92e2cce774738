mod common;

use common::*;
use dav_engine::props::{DavProperty, FieldKind, PropertyRegistry};
use dav_engine::{DavHandler, StoreError};
use http::StatusCode;

fn propertyupdate(inner: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propertyupdate xmlns:D="DAV:" xmlns:Z="http://ns.example.com/z/">{}</D:propertyupdate>"#,
        inner
    )
}

const PROP_DISPLAYNAME: &str =
    r#"<D:propfind xmlns:D="DAV:"><D:prop><D:displayname/></D:prop></D:propfind>"#;

const PROPFIND_ALL: &str = r#"<D:propfind xmlns:D="DAV:"><D:allprop/></D:propfind>"#;

#[tokio::test]
async fn set_and_remove_dead_properties() {
    let store = tree();
    let dav = handler(&store);

    let body = propertyupdate(
        "<D:set><D:prop><Z:Authors><Z:Author>Jim</Z:Author></Z:Authors>\
         <Z:Copyright>2024</Z:Copyright><D:displayname>Dee</D:displayname></D:prop></D:set>",
    );
    let r = send(&dav, "PROPPATCH", "/a/d", &[], &body).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS, "{}", r.body);
    let ms = r.xml();
    let resp = response(&ms, "/a/d");
    assert_eq!(prop_status(resp, "Authors"), Some(200));
    assert_eq!(prop_status(resp, "Copyright"), Some(200));
    assert_eq!(prop_status(resp, "displayname"), Some(200));

    let r = send(&dav, "PROPFIND", "/a/d", &[("Depth", "0")], PROPFIND_ALL).await;
    let ms = r.xml();
    let resp = response(&ms, "/a/d");
    let (_, authors) = prop(resp, "Authors").unwrap();
    assert_eq!(text(child(authors, "Author")), "Jim");
    assert_eq!(text(prop(resp, "displayname").unwrap().1), "Dee");

    // dead properties come back in the order they were set.
    let names = elems(resp, "propstat")
        .into_iter()
        .flat_map(|ps| child(ps, "prop").children.iter().filter_map(|n| n.as_element()))
        .filter(|e| e.namespace.as_deref() == Some("http://ns.example.com/z/"))
        .map(|e| e.name.clone())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["Authors", "Copyright"]);

    let body = propertyupdate("<D:remove><D:prop><Z:Copyright/></D:prop></D:remove>");
    let r = send(&dav, "PROPPATCH", "/a/d", &[], &body).await;
    assert_eq!(prop_status(response(&r.xml(), "/a/d"), "Copyright"), Some(200));

    let r = send(&dav, "PROPFIND", "/a/d", &[("Depth", "0")], PROPFIND_ALL).await;
    assert!(prop(response(&r.xml(), "/a/d"), "Copyright").is_none());
}

#[tokio::test]
async fn failure_makes_everything_fail() {
    let store = tree();
    let dav = handler(&store);

    let body = propertyupdate(
        "<D:set><D:prop><Z:color>red</Z:color><D:getetag>\"x\"</D:getetag></D:prop></D:set>\
         <D:remove><D:prop><D:displayname/></D:prop></D:remove>",
    );
    let r = send(&dav, "PROPPATCH", "/a/d", &[], &body).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    let ms = r.xml();
    let resp = response(&ms, "/a/d");
    assert_eq!(prop_status(resp, "getetag"), Some(403));
    assert_eq!(prop_status(resp, "displayname"), Some(409));
    assert_eq!(prop_status(resp, "color"), Some(424));

    // nothing was written.
    let body = r#"<D:propfind xmlns:D="DAV:" xmlns:Z="http://ns.example.com/z/"><D:prop><Z:color/></D:prop></D:propfind>"#;
    let r = send(&dav, "PROPFIND", "/a/d", &[("Depth", "0")], body).await;
    assert_eq!(prop_status(response(&r.xml(), "/a/d"), "color"), Some(404));
}

#[tokio::test]
async fn failed_commit_is_rolled_back() {
    let store = tree();
    store.deny_write("/a/d", "{http://ns.example.com/z/}second", StoreError::Forbidden);
    let dav = handler(&store);

    let set_first = propertyupdate("<D:set><D:prop><Z:first>1</Z:first></D:prop></D:set>");
    let r = send(&dav, "PROPPATCH", "/a/d", &[], &set_first).await;
    assert_eq!(prop_status(response(&r.xml(), "/a/d"), "first"), Some(200));

    let body = propertyupdate(
        "<D:set><D:prop><Z:first>2</Z:first><Z:second>2</Z:second></D:prop></D:set>",
    );
    let r = send(&dav, "PROPPATCH", "/a/d", &[], &body).await;
    let ms = r.xml();
    let resp = response(&ms, "/a/d");
    assert_eq!(prop_status(resp, "second"), Some(403));
    assert_eq!(prop_status(resp, "first"), Some(424));

    let body = r#"<D:propfind xmlns:D="DAV:" xmlns:Z="http://ns.example.com/z/"><D:prop><Z:first/></D:prop></D:propfind>"#;
    let r = send(&dav, "PROPFIND", "/a/d", &[("Depth", "0")], body).await;
    let ms = r.xml();
    let (status, first) = prop(response(&ms, "/a/d"), "first").unwrap();
    assert_eq!(status, 200);
    assert_eq!(text(first), "1");
}

#[tokio::test]
async fn unset_live_property_is_rolled_back() {
    let store = tree();
    store.deny_write("/a/d", "{http://ns.example.com/z/}second", StoreError::Forbidden);
    let dav = handler(&store);

    let body = propertyupdate(
        "<D:set><D:prop><D:displayname>New</D:displayname><Z:second>2</Z:second></D:prop></D:set>",
    );
    let r = send(&dav, "PROPPATCH", "/a/d", &[], &body).await;
    let ms = r.xml();
    let resp = response(&ms, "/a/d");
    assert_eq!(prop_status(resp, "second"), Some(403));
    assert_eq!(prop_status(resp, "displayname"), Some(424));

    let r = send(&dav, "PROPFIND", "/a/d", &[("Depth", "0")], PROP_DISPLAYNAME).await;
    let ms = r.xml();
    let (status, dn) = prop(response(&ms, "/a/d"), "displayname").unwrap();
    assert_eq!(status, 200);
    assert!(dn.children.is_empty());
}

#[tokio::test]
async fn invalid_value_is_conflict() {
    let store = tree();
    let registry = PropertyRegistry::webdav()
        .with(DavProperty::new("{http://ns.example.com/z/}count", FieldKind::Int));
    let dav = DavHandler::builder(store.clone()).registry(registry).build();

    let body = propertyupdate("<D:set><D:prop><Z:count>many</Z:count></D:prop></D:set>");
    let r = send(&dav, "PROPPATCH", "/a/d", &[], &body).await;
    assert_eq!(prop_status(response(&r.xml(), "/a/d"), "count"), Some(409));

    let body = propertyupdate("<D:set><D:prop><Z:count>42</Z:count></D:prop></D:set>");
    let r = send(&dav, "PROPPATCH", "/a/d", &[], &body).await;
    assert_eq!(prop_status(response(&r.xml(), "/a/d"), "count"), Some(200));

    let body = r#"<D:propfind xmlns:D="DAV:" xmlns:Z="http://ns.example.com/z/"><D:prop><Z:count/></D:prop></D:propfind>"#;
    let r = send(&dav, "PROPFIND", "/a/d", &[("Depth", "0")], body).await;
    assert_eq!(text(prop(response(&r.xml(), "/a/d"), "count").unwrap().1), "42");
}

#[tokio::test]
async fn unauthorized_aborts_the_request() {
    let store = tree();
    store.deny_property("/a/d", "{DAV:}displayname", StoreError::Unauthorized);
    let dav = handler(&store);
    let body = propertyupdate(
        "<D:set><D:prop><Z:x>1</Z:x><D:displayname>n</D:displayname></D:prop></D:set>",
    );
    let r = send(&dav, "PROPPATCH", "/a/d", &[], &body).await;
    assert_eq!(r.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn locked_resource_needs_token() {
    let store = tree();
    let dav = handler(&store);
    let token = lock(&dav, "/a/", "infinity").await;

    let body = propertyupdate("<D:set><D:prop><Z:x>1</Z:x></D:prop></D:set>");
    let r = send(&dav, "PROPPATCH", "/a/d", &[], &body).await;
    assert_eq!(r.status, StatusCode::LOCKED);

    let hdr = format!("(<{}>)", token);
    let r = send(&dav, "PROPPATCH", "/a/d", &[("If", hdr.as_str())], &body).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);

    // tagged with the lock root works too.
    let hdr = format!("<http://localhost/a/> (<{}>)", token);
    let r = send(&dav, "PROPPATCH", "/a/d", &[("If", hdr.as_str())], &body).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
}

#[tokio::test]
async fn if_header_etags() {
    let store = tree();
    let dav = handler(&store);
    let r = send(&dav, "PROPFIND", "/a/d", &[("Depth", "0")], "").await;
    let etag = text(prop(response(&r.xml(), "/a/d"), "getetag").unwrap().1);

    let body = propertyupdate("<D:set><D:prop><Z:x>1</Z:x></D:prop></D:set>");
    let r = send(&dav, "PROPPATCH", "/a/d", &[("If", "([\"nope\"])")], &body).await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);

    let hdr = format!("([{}])", etag);
    let r = send(&dav, "PROPPATCH", "/a/d", &[("If", hdr.as_str())], &body).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);

    let hdr = format!("(Not [{}])", etag);
    let r = send(&dav, "PROPPATCH", "/a/d", &[("If", hdr.as_str())], &body).await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);

    let r = send(&dav, "PROPPATCH", "/a/d", &[("If", "(<a>")], &body).await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bad_bodies() {
    let store = tree();
    let dav = handler(&store);
    let r = send(&dav, "PROPPATCH", "/a/d", &[], "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
    let r = send(&dav, "PROPPATCH", "/a/d", &[], r#"<D:propfind xmlns:D="DAV:"/>"#).await;
    assert_eq!(r.status, StatusCode::UNPROCESSABLE_ENTITY);
    let r = send(&dav, "PROPPATCH", "/nothere", &[], &propertyupdate("")).await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
}
