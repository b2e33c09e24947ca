//! TTL'd mutual-exclusion locks over resource keys.
//!
//! At most one valid (unexpired) lock exists per resource key at any
//! instant. Acquire and release are atomic through the map's entry API;
//! expired locks are reclaimed in place by the next acquire. Keys are
//! namespaced `lock:{session_id}[:{sub_resource}]`.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

/// Build the lock key for a session or one of its sub-resources.
pub fn lock_key(session_id: &str, sub_resource: Option<&str>) -> String {
    match sub_resource {
        Some(sub) => format!("lock:{}:{}", session_id, sub),
        None => format!("lock:{}", session_id),
    }
}

#[derive(Debug, Clone)]
struct LockEntry {
    holder: String,
    expires_at: Instant,
}

impl LockEntry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// In-process lock table implementing the acquire/release/renew
/// contract.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: DashMap<String, LockEntry>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically acquire the lock on `resource` for `holder`.
    ///
    /// Succeeds when no unexpired lock exists for the key; an expired
    /// entry is reclaimed by the new holder in the same step.
    pub fn acquire(&self, resource: &str, holder: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let entry = LockEntry {
            holder: holder.to_string(),
            expires_at: now + ttl,
        };

        match self.locks.entry(resource.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if occupied.get().expired(now) {
                    debug!(resource, holder, "Reclaimed expired lock");
                    occupied.insert(entry);
                    true
                } else {
                    false
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                debug!(resource, holder, "Acquired lock");
                vacant.insert(entry);
                true
            }
        }
    }

    /// Compare-and-delete release.
    ///
    /// Only succeeds while `holder` still owns a valid lock on the key.
    /// A holder whose TTL lapsed gets `false` even if nobody re-acquired
    /// yet, so stale holders fail fast instead of releasing someone
    /// else's lock.
    pub fn release(&self, resource: &str, holder: &str) -> bool {
        let now = Instant::now();
        let removed = self
            .locks
            .remove_if(resource, |_, entry| {
                entry.holder == holder && !entry.expired(now)
            })
            .is_some();
        if removed {
            debug!(resource, holder, "Released lock");
        }
        removed
    }

    /// Extend a held lock's TTL. Fails once the lock expired or changed
    /// hands; the caller must then treat its in-flight work as invalid.
    pub fn renew(&self, resource: &str, holder: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        match self.locks.get_mut(resource) {
            Some(mut entry) if entry.holder == holder && !entry.expired(now) => {
                entry.expires_at = now + ttl;
                true
            }
            _ => false,
        }
    }

    /// Whether `holder` currently owns a valid lock on `resource`.
    /// Agents poll this to detect TTL loss.
    pub fn is_held_by(&self, resource: &str, holder: &str) -> bool {
        let now = Instant::now();
        self.locks
            .get(resource)
            .map(|entry| entry.holder == holder && !entry.expired(now))
            .unwrap_or(false)
    }

    /// Drop expired entries. Correctness never depends on this; acquire
    /// reclaims in place. Housekeeping only.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0usize;
        self.locks.retain(|_, entry| {
            let keep = !entry.expired(now);
            if !keep {
                purged += 1;
            }
            keep
        });
        purged
    }
}
