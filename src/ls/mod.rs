//! Contains the structs and traits that define a `locksystem` backend.
//!
//! Note that the methods DO NOT return futures, they are synchronous.
//! This is because currently only in-memory locksystems are supported,
//! so there is no need to make them asynchronous.
//!
//! The lock table is the one piece of shared mutable state in the engine.
//! A lock system must make each call atomic: [`DavLockSystem::lock`] either
//! installs the lock on the root and every covered descendant, or nothing.
use std::fmt::Debug;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::davpath::DavPath;

pub mod memls;

/// `exclusive` or `shared`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockScope {
    Exclusive,
    Shared,
}

/// The only lock type RFC4918 defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockType {
    Write,
}

/// Depth of a lock at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockDepth {
    Zero,
    Infinity,
}

/// WebDAV specific data attached to a lock created through LOCK.
/// Locks created by other means may lack it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavAnnotation {
    pub depth: LockDepth,
    /// The `DAV:owner` element from the request, serialized.
    pub owner: Option<String>,
    /// The `opaquelocktoken:` URI handed to the client.
    pub token: String,
}

/// A lock, as stored for its root resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavLock {
    /// Unique id of this lock in the table.
    pub id: String,
    pub scope: LockScope,
    pub locktype: LockType,
    /// The principal that created the lock.
    pub owner: Option<String>,
    /// `None` means infinite.
    pub timeout: Option<Duration>,
    pub created_at: SystemTime,
    /// The resource the lock was taken out on.
    pub root: DavPath,
    pub annotation: Option<DavAnnotation>,
}

impl DavLock {
    /// Depth as recorded in the annotation; "0" for foreign locks.
    pub fn depth(&self) -> LockDepth {
        self.annotation
            .as_ref()
            .map(|a| a.depth)
            .unwrap_or(LockDepth::Zero)
    }

    /// The token a client presents for this lock, if there is one.
    pub fn token(&self) -> Option<&str> {
        self.annotation.as_ref().map(|a| a.token.as_str())
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        match self.timeout {
            Some(t) => self.created_at + t <= now,
            None => false,
        }
    }

    /// Time left, rounded up to whole seconds. `None` if infinite.
    pub fn remaining(&self, now: SystemTime) -> Option<u64> {
        let timeout = self.timeout?;
        let elapsed = now.duration_since(self.created_at).unwrap_or_default();
        let left = timeout.saturating_sub(elapsed);
        Some(left.as_secs() + u64::from(left.subsec_nanos() > 0))
    }
}

/// How a resource is locked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockTokenKind {
    /// The lock was taken out on this resource.
    Direct,
    /// Covered by the depth-infinity lock on `root`.
    Indirect { root: DavPath },
}

/// The lock state of one resource. `lock` is always the data of the root lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub kind: LockTokenKind,
    pub lock: DavLock,
}

/// The trait that defines a locksystem.
pub trait DavLockSystem: Debug + Send + Sync {
    /// Install `lock` on its root, and an indirect lock on every path in
    /// `covered`. If any of them is already locked nothing is changed and
    /// the locked paths are returned.
    fn lock(&self, lock: DavLock, covered: &[DavPath]) -> Result<DavLock, Vec<DavPath>>;

    /// End the lock on `path` if `token` is its token. Ending a lock ends
    /// all its indirect locks as well.
    fn unlock(&self, path: &DavPath, token: &str) -> Result<(), ()>;

    /// Restart the timeout of the lock on `path`.
    fn refresh(&self, path: &DavPath, token: &str, timeout: Option<Duration>) -> Result<DavLock, ()>;

    /// Current lock state of `path`. Expired locks are not reported.
    fn lock_token(&self, path: &DavPath) -> Option<LockToken>;

    /// Forget every lock at or below `path`.
    fn delete(&self, path: &DavPath);

    /// The scope/type combinations this locksystem hands out.
    fn supported(&self) -> Vec<(LockScope, LockType)> {
        vec![
            (LockScope::Exclusive, LockType::Write),
            (LockScope::Shared, LockType::Write),
        ]
    }
}

/// Generate a new lock token:
/// `opaquelocktoken:<random>-<random>-<host-id>:<timestamp>`.
pub fn new_token(host_id: &str) -> String {
    let (a, b) = uuid::Uuid::new_v4().as_u64_pair();
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!(
        "opaquelocktoken:{:016x}-{:016x}-{}:{}.{:03}",
        a,
        b,
        host_id,
        ts.as_secs(),
        ts.subsec_millis()
    )
}

/// A random host id, used when none is configured.
pub fn random_host_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..12].to_uppercase()
}
