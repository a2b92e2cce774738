//! The locking engine, on top of a [`DavLockSystem`].
//!
//! Acquisition is two-phase: the subtree a depth-infinity lock covers is
//! collected first, then handed to the lock system in one call which
//! installs all of it or none of it.
use std::time::{Duration, SystemTime};

use xmltree::{Element, XMLNode};

use crate::davheaders::{DavTimeout, Timeout};
use crate::davpath::DavPath;
use crate::ls::*;
use crate::store::{DavStore, ResourceMeta, StoreError};
use crate::xmltree_ext::ElementExt;
use crate::{DavError, DavResult};

/// Used when the client asks for nothing usable.
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(720);

/// Longest timeout we hand out, the largest signed 32 bit value.
pub(crate) const MAX_TIMEOUT: u64 = i32::MAX as u64;

/// Pick the timeout for a new or refreshed lock: the first finite
/// candidate not over the maximum.
pub(crate) fn lock_timeout(hdr: Option<&Timeout>) -> Duration {
    hdr.and_then(|t| {
        t.0.iter().find_map(|t| match *t {
            DavTimeout::Seconds(n) if n <= MAX_TIMEOUT => Some(Duration::from_secs(n)),
            _ => None,
        })
    })
    .unwrap_or(DEFAULT_TIMEOUT)
}

/// What a LOCK request with a body asks for.
#[derive(Debug, Clone)]
pub(crate) struct LockRequest {
    pub scope: LockScope,
    pub locktype: LockType,
    /// The `DAV:owner` element, serialized.
    pub owner: Option<String>,
    pub depth: LockDepth,
    pub timeout: Duration,
    pub principal: Option<String>,
}

// children of a collection, collections with a trailing slash,
// in reverse enumeration order.
async fn children_rev(store: &dyn DavStore, dir: &DavPath) -> DavResult<Vec<(DavPath, bool)>> {
    let mut v = Vec::new();
    for mut child in store.list_children(dir).await? {
        let meta = match store.metadata(&child).await {
            Ok(m) => m,
            // vanished while we were looking.
            Err(StoreError::NotFound) => continue,
            Err(e) => return Err(e.into()),
        };
        if meta.collection {
            child.add_slash();
        }
        v.push((child, meta.collection));
    }
    v.reverse();
    Ok(v)
}

/// Every resource below `path`, in pre-order.
pub(crate) async fn descendants(store: &dyn DavStore, path: &DavPath) -> DavResult<Vec<DavPath>> {
    let mut out = Vec::new();
    let mut stack = children_rev(store, path).await?;
    while let Some((child, collection)) = stack.pop() {
        if collection {
            stack.extend(children_rev(store, &child).await?);
        }
        out.push(child);
    }
    Ok(out)
}

/// Take out a new lock on `path`.
pub(crate) async fn lock(
    store: &dyn DavStore,
    ls: &dyn DavLockSystem,
    path: &DavPath,
    meta: &ResourceMeta,
    req: LockRequest,
    host_id: &str,
) -> DavResult<DavLock> {
    let covered = match (req.depth, meta.collection) {
        (LockDepth::Infinity, true) => descendants(store, path).await?,
        _ => Vec::new(),
    };
    let token = new_token(host_id);
    let lock = DavLock {
        id: token.clone(),
        scope: req.scope,
        locktype: req.locktype,
        owner: req.principal,
        timeout: Some(req.timeout),
        created_at: SystemTime::now(),
        root: path.clone(),
        annotation: Some(DavAnnotation {
            depth: req.depth,
            owner: req.owner,
            token,
        }),
    };
    ls.lock(lock, &covered).map_err(DavError::AlreadyLocked)
}

/// Restart the timeout of the lock `token` on `path`.
pub(crate) fn refresh(
    ls: &dyn DavLockSystem,
    path: &DavPath,
    token: &str,
    timeout: Duration,
) -> DavResult<DavLock> {
    ls.refresh(path, token, Some(timeout))
        .map_err(|_| DavError::PreconditionFailed)
}

/// End the lock `token` on `path`, with all its indirect locks.
pub(crate) fn unlock(ls: &dyn DavLockSystem, path: &DavPath, token: &str) -> DavResult<()> {
    ls.unlock(path, token)
        .map_err(|_| DavError::Conflict("Lock-Token does not match the lock on the resource".to_string()))
}

pub(crate) fn is_locked(ls: &dyn DavLockSystem, path: &DavPath) -> bool {
    ls.lock_token(path).is_some()
}

fn scope_element(scope: LockScope) -> Element {
    let s = match scope {
        LockScope::Exclusive => "D:exclusive",
        LockScope::Shared => "D:shared",
    };
    Element::new2("D:lockscope").child(Element::new2(s))
}

fn type_element(locktype: LockType) -> Element {
    match locktype {
        LockType::Write => Element::new2("D:locktype").child(Element::new2("D:write")),
    }
}

/// The `DAV:activelock` element for a lock. Locks without a WebDAV
/// annotation show depth "0" and no owner or token.
pub(crate) fn activelock_element(lock: &DavLock, now: SystemTime) -> Element {
    let depth = match lock.depth() {
        LockDepth::Zero => "0",
        LockDepth::Infinity => "infinity",
    };
    let mut elem = Element::new2("D:activelock")
        .child(type_element(lock.locktype))
        .child(scope_element(lock.scope))
        .child(Element::new2("D:depth").text(depth));

    if let Some(owner) = lock.annotation.as_ref().and_then(|a| a.owner.as_ref()) {
        match Element::parse(owner.as_bytes()) {
            Ok(o) => elem.push_element(o),
            Err(_) => warn!("lock {}: stored owner is not valid XML", lock.id),
        }
    }

    let timeout = match lock.remaining(now) {
        Some(secs) => format!("Second-{}", secs),
        None => "Infinite".to_string(),
    };
    elem.push_element(Element::new2("D:timeout").text(timeout));

    if let Some(token) = lock.token() {
        elem.push_element(
            Element::new2("D:locktoken").child(Element::new2("D:href").text(token)),
        );
    }
    elem.push_element(
        Element::new2("D:lockroot")
            .child(Element::new2("D:href").text(lock.root.as_url_string_with_prefix())),
    );
    elem
}

/// Content of `DAV:lockdiscovery` for `path`.
pub(crate) fn lockdiscovery_content(ls: &dyn DavLockSystem, path: &DavPath) -> Vec<XMLNode> {
    match ls.lock_token(path) {
        Some(lt) => vec![XMLNode::Element(activelock_element(&lt.lock, SystemTime::now()))],
        None => Vec::new(),
    }
}

/// Content of `DAV:supportedlock`.
pub(crate) fn supportedlock_content(ls: &dyn DavLockSystem) -> Vec<XMLNode> {
    ls.supported()
        .into_iter()
        .map(|(scope, locktype)| {
            XMLNode::Element(
                Element::new2("D:lockentry")
                    .child(scope_element(scope))
                    .child(type_element(locktype)),
            )
        })
        .collect()
}
