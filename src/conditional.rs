//! Evaluation of the `If` header.
//!
//! The header is parsed completely before anything is evaluated. Each
//! list is evaluated against the resource it names (or the request
//! resource when untagged); the conditions of a list are AND-ed and the
//! lists are OR-ed. While doing so, every state token the client
//! presented is recorded per resource, so that write methods can check
//! later that the client really holds the lock on what it modifies.
use std::collections::HashMap;

use http::Request;

use crate::davheaders::{self, IfHeader, IfItem};
use crate::davpath::DavPath;
use crate::ls::{DavLockSystem, LockDepth};
use crate::store::DavStore;
use crate::{DavError, DavResult};

// state token schemes we can compare.
const TOKEN_SCHEMES: &[&str] = &["opaquelocktoken:", "urn:uuid:"];

/// State tokens presented in the `If` header, per resource key.
#[derive(Debug, Default, Clone)]
pub(crate) struct IfRecord {
    states: HashMap<String, Vec<(String, bool)>>,
}

impl IfRecord {
    fn add(&mut self, path: &DavPath, token: &str, negated: bool) {
        self.states
            .entry(path.key())
            .or_default()
            .push((token.to_string(), negated));
    }

    // did the client assert `token` (not negated) for a resource `covers` accepts.
    fn asserted(&self, token: &str, covers: impl Fn(&str) -> bool) -> bool {
        self.states
            .iter()
            .any(|(k, v)| covers(k.as_str()) && v.iter().any(|(t, neg)| !neg && t == token))
    }
}

// compare entity tags, ignoring weakness.
fn etag_eq(a: &str, b: &str) -> bool {
    fn strip(s: &str) -> &str {
        let s = s.trim();
        let s = s.strip_prefix("W/").unwrap_or(s);
        s.trim_matches('"')
    }
    strip(a) == strip(b)
}

fn recognized(token: &str) -> bool {
    TOKEN_SCHEMES
        .iter()
        .any(|s| token.len() > s.len() && token[..s.len()].eq_ignore_ascii_case(s))
}

// current state of one resource.
struct ResourceState {
    etag: Option<String>,
    token: Option<String>,
}

async fn resource_state(
    store: &dyn DavStore,
    ls: Option<&dyn DavLockSystem>,
    path: &DavPath,
) -> Option<ResourceState> {
    let meta = store.metadata(path).await.ok()?;
    let token = ls
        .and_then(|ls| ls.lock_token(path))
        .and_then(|lt| lt.lock.token().map(|t| t.to_string()));
    Some(ResourceState {
        etag: meta.etag,
        token,
    })
}

/// Evaluate the `If` header of `req`. A request without one passes.
/// A false header fails with `PreconditionFailed`.
pub(crate) async fn if_match(
    req: &Request<()>,
    store: &dyn DavStore,
    ls: Option<&dyn DavLockSystem>,
    prefix: &str,
    path: &DavPath,
) -> DavResult<IfRecord> {
    let mut record = IfRecord::default();
    let value = match req.headers().get(davheaders::IF) {
        Some(v) => v
            .to_str()
            .map_err(|_| DavError::BadRequest("Invalid If header".to_string()))?,
        None => return Ok(record),
    };
    let hdr = IfHeader::parse(value).map_err(|e| DavError::BadRequest(e.to_string()))?;
    let host = req
        .headers()
        .get(http::header::HOST)
        .and_then(|h| h.to_str().ok());

    let mut any = false;
    for list in &hdr.0 {
        let target = match list.resource_tag {
            Some(ref url) => match davheaders::url_to_path(url, host, prefix) {
                Ok(p) => Some(p),
                Err(_) => {
                    debug!("If: cannot resolve {}, treating as absent", url);
                    None
                }
            },
            None => Some(path.clone()),
        };
        let state = match target {
            Some(ref p) => resource_state(store, ls, p).await,
            None => None,
        };

        let mut all = true;
        for cond in &list.conditions {
            let hit = match (&cond.item, &state) {
                (IfItem::ETag(e), Some(st)) => st.etag.as_deref().map(|t| etag_eq(t, e)).unwrap_or(false),
                (IfItem::StateToken(t), Some(st)) => {
                    recognized(t) && st.token.as_deref() == Some(t.as_str())
                }
                (_, None) => false,
            };
            if let (IfItem::StateToken(t), Some(p)) = (&cond.item, &target) {
                record.add(p, t, cond.not);
            }
            all &= hit != cond.not;
        }
        // keep going: the record must hold every presented token.
        any |= all;
    }

    if !any {
        debug!("If header evaluated to false");
        return Err(DavError::PreconditionFailed);
    }
    Ok(record)
}

/// Did the client present the token of the lock on `path`? True if
/// `path` is not locked at all. The token counts when it was presented
/// for any resource the lock covers.
pub(crate) fn matches_if_header(record: &IfRecord, ls: Option<&dyn DavLockSystem>, path: &DavPath) -> bool {
    let lt = match ls.and_then(|ls| ls.lock_token(path)) {
        Some(lt) => lt,
        None => return true,
    };
    let token = match lt.lock.token() {
        Some(t) => t,
        None => return false,
    };
    let root = lt.lock.root.key();
    let infinite = lt.lock.depth() == LockDepth::Infinity;
    let covers = |key: &str| {
        key == root
            || (infinite
                && (root == "/"
                    || (key.starts_with(&root) && key.as_bytes().get(root.len()) == Some(&b'/'))))
    };
    record.asserted(token, covers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locking::{self, LockRequest, DEFAULT_TIMEOUT};
    use crate::ls::memls::MemLs;
    use crate::ls::{LockScope, LockType};
    use crate::store::memstore::MemStore;
    use crate::store::ResourceMeta;

    fn p(s: &str) -> DavPath {
        DavPath::new(s).unwrap()
    }

    fn req_if(value: &str) -> Request<()> {
        Request::builder()
            .uri("/a/f")
            .header("Host", "localhost")
            .header("If", value)
            .body(())
            .unwrap()
    }

    async fn setup() -> (std::sync::Arc<MemStore>, std::sync::Arc<MemLs>, String) {
        let store = MemStore::new();
        store.add_collection("/a").unwrap();
        store.add_resource("/a/f", "hello").unwrap();
        let ls = MemLs::new();
        let lreq = LockRequest {
            scope: LockScope::Exclusive,
            locktype: LockType::Write,
            owner: None,
            depth: LockDepth::Infinity,
            timeout: DEFAULT_TIMEOUT,
            principal: None,
        };
        let lock = locking::lock(&*store, &*ls, &p("/a/"), &ResourceMeta::collection(), lreq, "H")
            .await
            .unwrap();
        let token = lock.token().unwrap().to_string();
        (store, ls, token)
    }

    #[tokio::test]
    async fn etag_conditions() {
        let (store, ls, _) = setup().await;
        let etag = store.metadata(&p("/a/f")).await.unwrap().etag.unwrap();
        let path = p("/a/f");

        let ok = format!("([{}])", etag);
        assert!(if_match(&req_if(&ok), &*store, Some(&*ls), "", &path).await.is_ok());
        let not = format!("(Not [{}])", etag);
        assert!(matches!(
            if_match(&req_if(&not), &*store, Some(&*ls), "", &path).await,
            Err(DavError::PreconditionFailed)
        ));
        assert!(if_match(&req_if("(Not [\"xx\"])"), &*store, Some(&*ls), "", &path).await.is_ok());
    }

    #[tokio::test]
    async fn token_lists_are_ored() {
        let (store, ls, token) = setup().await;
        let path = p("/a/f");
        let h = format!("(<opaquelocktoken:nope>) (<{}>)", token);
        let rec = if_match(&req_if(&h), &*store, Some(&*ls), "", &path).await.unwrap();
        assert!(matches_if_header(&rec, Some(&*ls), &path));

        let h = "(<opaquelocktoken:nope>) (<urn:uuid:nope>)";
        assert!(if_match(&req_if(h), &*store, Some(&*ls), "", &path).await.is_err());
    }

    #[tokio::test]
    async fn unknown_scheme_and_missing_resource() {
        let (store, ls, _) = setup().await;
        let path = p("/a/f");
        assert!(if_match(&req_if("(<DAV:no-lock>)"), &*store, Some(&*ls), "", &path).await.is_err());
        assert!(if_match(&req_if("(Not <DAV:no-lock>)"), &*store, Some(&*ls), "", &path).await.is_ok());
        // unresolvable resource: only a negated condition holds.
        let h = "<http://other.host/x> (Not <opaquelocktoken:t>)";
        assert!(if_match(&req_if(h), &*store, Some(&*ls), "", &path).await.is_ok());
        let h = "<http://localhost/nothere> ([\"x\"])";
        assert!(if_match(&req_if(h), &*store, Some(&*ls), "", &path).await.is_err());
    }

    #[tokio::test]
    async fn malformed_header_is_bad_request() {
        let (store, ls, _) = setup().await;
        match if_match(&req_if("(<a>"), &*store, Some(&*ls), "", &p("/a/f")).await {
            Err(DavError::BadRequest(msg)) => assert!(msg.contains("position 4")),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn tagged_lock_root_covers_member() {
        let (store, ls, token) = setup().await;
        let path = p("/a/f");
        // a true header without the token does not unlock writes.
        let rec = if_match(&req_if("(Not <DAV:no-lock>)"), &*store, Some(&*ls), "", &path)
            .await
            .unwrap();
        assert!(!matches_if_header(&rec, Some(&*ls), &path));

        let h = format!("<http://localhost/a/> (<{}>)", token);
        let rec = if_match(&req_if(&h), &*store, Some(&*ls), "", &path).await.unwrap();
        assert!(matches_if_header(&rec, Some(&*ls), &path));
        assert!(matches_if_header(&rec, Some(&*ls), &p("/a/")));
        // not locked at all.
        assert!(matches_if_header(&IfRecord::default(), Some(&*ls), &p("/")));
        assert!(matches_if_header(&IfRecord::default(), None, &path));
    }
}
