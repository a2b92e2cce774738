mod common;

use common::*;
use http::StatusCode;

#[tokio::test]
async fn copy_creates_and_overwrites() {
    let store = tree();
    let dav = handler(&store);

    let r = send(&dav, "COPY", "/a/d", &[("Destination", "http://localhost/a/e")], "").await;
    assert_eq!(r.status, StatusCode::CREATED);
    assert_eq!(r.header("Location").as_deref(), Some("/a/e"));
    assert!(store.exists("/a/d"));
    assert!(store.exists("/a/e"));

    let r = send(&dav, "COPY", "/a/d", &[("Destination", "/a/e")], "").await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);

    let headers = [("Destination", "/a/e"), ("Overwrite", "F")];
    let r = send(&dav, "COPY", "/a/d", &headers, "").await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn copy_collection_depth() {
    let store = tree();
    let dav = handler(&store);

    let headers = [("Destination", "/a/x/"), ("Depth", "0")];
    let r = send(&dav, "COPY", "/a/b/", &headers, "").await;
    assert_eq!(r.status, StatusCode::CREATED);
    assert!(store.exists("/a/x"));
    assert!(!store.exists("/a/x/c"));

    let headers = [("Destination", "/a/y/"), ("Depth", "infinity")];
    let r = send(&dav, "COPY", "/a/b/", &headers, "").await;
    assert_eq!(r.status, StatusCode::CREATED);
    assert!(store.exists("/a/y/c"));

    let headers = [("Destination", "/a/z/"), ("Depth", "1")];
    let r = send(&dav, "COPY", "/a/b/", &headers, "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn copy_keeps_dead_properties() {
    let store = tree();
    let dav = handler(&store);
    let body = r#"<D:propertyupdate xmlns:D="DAV:" xmlns:Z="urn:z">
        <D:set><D:prop><Z:tag>v</Z:tag></D:prop></D:set></D:propertyupdate>"#;
    let r = send(&dav, "PROPPATCH", "/a/d", &[], body).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);

    let r = send(&dav, "COPY", "/a/d", &[("Destination", "/a/e")], "").await;
    assert_eq!(r.status, StatusCode::CREATED);

    let body = r#"<D:propfind xmlns:D="DAV:" xmlns:Z="urn:z"><D:prop><Z:tag/></D:prop></D:propfind>"#;
    let r = send(&dav, "PROPFIND", "/a/e", &[("Depth", "0")], body).await;
    let ms = r.xml();
    let (status, tag) = prop(response(&ms, "/a/e"), "tag").unwrap();
    assert_eq!(status, 200);
    assert_eq!(text(tag), "v");
}

#[tokio::test]
async fn move_resource() {
    let store = tree();
    let dav = handler(&store);

    let r = send(&dav, "MOVE", "/a/b", &[("Destination", "/b2")], "").await;
    assert_eq!(r.status, StatusCode::CREATED);
    assert_eq!(r.header("Location").as_deref(), Some("/b2/"));
    assert!(!store.exists("/a/b"));
    assert!(store.exists("/b2/c"));

    let headers = [("Destination", "/a/d2"), ("Depth", "0")];
    let r = send(&dav, "MOVE", "/a/d", &headers, "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn destination_errors() {
    let store = tree();
    let dav = handler(&store);

    let r = send(&dav, "MOVE", "/a/d", &[], "").await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);

    let r = send(&dav, "MOVE", "/a/d", &[("Destination", "/nothere/d")], "").await;
    assert_eq!(r.status, StatusCode::CONFLICT);

    let r = send(&dav, "COPY", "/a/d", &[("Destination", "http://elsewhere/a/e")], "").await;
    assert_eq!(r.status, StatusCode::BAD_GATEWAY);

    let r = send(&dav, "COPY", "/a/d", &[("Destination", "/a/d")], "").await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);

    // an existing destination with Overwrite F fails first, even onto itself.
    let headers = [("Destination", "/a/d"), ("Overwrite", "F")];
    let r = send(&dav, "COPY", "/a/d", &headers, "").await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);

    let r = send(&dav, "COPY", "/a/", &[("Destination", "/a/b/a2/")], "").await;
    assert_eq!(r.status, StatusCode::FORBIDDEN);

    let r = send(&dav, "COPY", "/nothere", &[("Destination", "/x")], "").await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn locks_guard_source_and_destination() {
    let store = tree();
    let dav = handler(&store);
    let token = lock(&dav, "/a/b/", "infinity").await;

    // copying out of a locked tree is fine.
    let r = send(&dav, "COPY", "/a/b/c", &[("Destination", "/a/c2")], "").await;
    assert_eq!(r.status, StatusCode::CREATED);

    // into it is not.
    let r = send(&dav, "COPY", "/a/d", &[("Destination", "/a/b/d")], "").await;
    assert_eq!(r.status, StatusCode::LOCKED);

    // moving a locked resource needs the token.
    let r = send(&dav, "MOVE", "/a/b/c", &[("Destination", "/a/c3")], "").await;
    assert_eq!(r.status, StatusCode::LOCKED);

    let hdr = format!("(<{}>)", token);
    let headers = [("Destination", "/a/c3"), ("If", hdr.as_str())];
    let r = send(&dav, "MOVE", "/a/b/c", &headers, "").await;
    assert_eq!(r.status, StatusCode::CREATED);

    // the moved resource did not take the lock along.
    lock(&dav, "/a/c3", "0").await;
}

#[tokio::test]
async fn move_drops_source_locks() {
    let store = tree();
    let dav = handler(&store);
    let token = lock(&dav, "/a/d", "0").await;

    let hdr = format!("(<{}>)", token);
    let headers = [("Destination", "/a/d2"), ("If", hdr.as_str())];
    let r = send(&dav, "MOVE", "/a/d", &headers, "").await;
    assert_eq!(r.status, StatusCode::CREATED);

    // a new resource at the old name is not locked.
    store.add_resource("/a/d", "new").unwrap();
    lock(&dav, "/a/d", "0").await;
}
