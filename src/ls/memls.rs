//! Simple in-memory locksystem.
//!
//! This implementation has state - if you create a
//! new instance in a handler(), it will be empty every time.
//!
//! This means you have to create the instance once, using `MemLs::new`, and
//! hand the same `Arc` to every DavHandler that should share the lock table.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::davpath::DavPath;
use crate::ls::*;

/// Ephemeral in-memory LockSystem.
#[derive(Debug, Clone)]
pub struct MemLs(Arc<Mutex<LockTable>>);

// what the lock table knows about one path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Direct(String),
    Indirect(String),
}

impl Slot {
    fn id(&self) -> &str {
        match self {
            Slot::Direct(id) | Slot::Indirect(id) => id,
        }
    }
}

#[derive(Debug, Default)]
struct LockTable {
    // lock id -> lock.
    locks: HashMap<String, DavLock>,
    // path key -> slot.
    slots: HashMap<String, Slot>,
}

impl LockTable {
    // drop expired locks, together with their slots.
    fn purge(&mut self, now: SystemTime) {
        let expired = self
            .locks
            .values()
            .filter(|l| l.is_expired(now))
            .map(|l| l.id.clone())
            .collect::<Vec<_>>();
        for id in expired {
            debug!("MemLs: lock {} expired", id);
            self.remove_lock(&id);
        }
    }

    // remove a lock and every slot that refers to it.
    fn remove_lock(&mut self, id: &str) {
        self.locks.remove(id);
        self.slots.retain(|_, slot| slot.id() != id);
    }

    // an ancestor holding a depth-infinity lock also covers
    // resources created after the lock was taken.
    fn covering_ancestor(&self, path: &DavPath) -> Option<&DavLock> {
        path.ancestors().into_iter().find_map(|a| match self.slots.get(&a.key()) {
            Some(Slot::Direct(id)) => self
                .locks
                .get(id)
                .filter(|l| l.depth() == LockDepth::Infinity),
            _ => None,
        })
    }

    fn lookup(&self, path: &DavPath) -> Option<LockToken> {
        match self.slots.get(&path.key()) {
            Some(Slot::Direct(id)) => self.locks.get(id).map(|l| LockToken {
                kind: LockTokenKind::Direct,
                lock: l.clone(),
            }),
            Some(Slot::Indirect(id)) => self.locks.get(id).map(|l| LockToken {
                kind: LockTokenKind::Indirect {
                    root: l.root.clone(),
                },
                lock: l.clone(),
            }),
            None => self.covering_ancestor(path).map(|l| LockToken {
                kind: LockTokenKind::Indirect {
                    root: l.root.clone(),
                },
                lock: l.clone(),
            }),
        }
    }

    fn is_locked(&self, path: &DavPath) -> bool {
        self.slots.contains_key(&path.key()) || self.covering_ancestor(path).is_some()
    }
}

// compare two path keys.
fn is_at_or_below(key: &str, base: &str) -> bool {
    base == "/"
        || key == base
        || (key.starts_with(base) && key.as_bytes().get(base.len()) == Some(&b'/'))
}

impl MemLs {
    /// Create a new "memls" locksystem.
    pub fn new() -> Arc<MemLs> {
        Arc::new(MemLs(Arc::new(Mutex::new(LockTable::default()))))
    }
}

impl DavLockSystem for MemLs {
    fn lock(&self, lock: DavLock, covered: &[DavPath]) -> Result<DavLock, Vec<DavPath>> {
        let mut table = self.0.lock();
        table.purge(SystemTime::now());

        // check everything first, then install everything.
        let mut conflicts = Vec::new();
        if table.is_locked(&lock.root) {
            conflicts.push(lock.root.clone());
        }
        for p in covered {
            if table.slots.contains_key(&p.key()) {
                conflicts.push(p.clone());
            }
        }
        if !conflicts.is_empty() {
            debug!("MemLs: lock {} refused, {} conflicts", lock.root, conflicts.len());
            return Err(conflicts);
        }

        table
            .slots
            .insert(lock.root.key(), Slot::Direct(lock.id.clone()));
        for p in covered {
            table.slots.insert(p.key(), Slot::Indirect(lock.id.clone()));
        }
        debug!(
            "MemLs: locked {} ({} indirect) as {}",
            lock.root,
            covered.len(),
            lock.id
        );
        table.locks.insert(lock.id.clone(), lock.clone());
        Ok(lock)
    }

    fn unlock(&self, path: &DavPath, token: &str) -> Result<(), ()> {
        let mut table = self.0.lock();
        table.purge(SystemTime::now());

        let lt = table.lookup(path).ok_or(())?;
        if lt.lock.token() != Some(token) {
            debug!("MemLs: unlock {}: token mismatch", path);
            return Err(());
        }
        table.remove_lock(&lt.lock.id);
        debug!("MemLs: unlocked {} (root {})", path, lt.lock.root);
        Ok(())
    }

    fn refresh(&self, path: &DavPath, token: &str, timeout: Option<Duration>) -> Result<DavLock, ()> {
        let mut table = self.0.lock();
        let now = SystemTime::now();
        table.purge(now);

        let lt = table.lookup(path).ok_or(())?;
        if lt.lock.token() != Some(token) {
            return Err(());
        }
        let lock = table.locks.get_mut(&lt.lock.id).ok_or(())?;
        lock.timeout = timeout;
        lock.created_at = now;
        debug!("MemLs: refreshed {} timeout {:?}", lock.id, timeout);
        Ok(lock.clone())
    }

    fn lock_token(&self, path: &DavPath) -> Option<LockToken> {
        let mut table = self.0.lock();
        table.purge(SystemTime::now());
        table.lookup(path)
    }

    fn delete(&self, path: &DavPath) {
        let mut table = self.0.lock();
        let doomed = table
            .locks
            .values()
            .filter(|l| l.root.same_resource(path) || path.is_ancestor_of(&l.root))
            .map(|l| l.id.clone())
            .collect::<Vec<_>>();
        for id in doomed {
            table.remove_lock(&id);
        }
        // indirect slots of locks rooted above path.
        let base = path.key();
        table.slots.retain(|k, _| !is_at_or_below(k, &base));
    }
}
