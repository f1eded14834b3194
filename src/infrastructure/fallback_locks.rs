// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-process fallback lock manager.
//!
//! Used only while the fast store is unreachable. Same read/write/exclusive
//! semantics against a process-local map, but no waiters queue and no TTLs:
//! this is a degraded mode, not a replacement. Locks taken here are never
//! migrated back to the fast store; they end when their holders release
//! them.

use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use crate::domain::lock::{LockId, LockKind};

#[derive(Debug)]
enum Entry {
    Exclusive { agent_id: String },
    Readers(Vec<String>),
}

/// Process-local lock table keyed by `(workspace_id, file_path)`.
///
/// The mutex is never held across an await point; every operation is a
/// short critical section.
#[derive(Debug, Default)]
pub struct FallbackLockManager {
    locks: Mutex<HashMap<(String, String), Entry>>,
}

impl FallbackLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same contract as the fast store: `None` means contention. There is no
    /// queue to join here; the caller simply retries later.
    pub fn request(
        &self,
        agent_id: &str,
        workspace_id: &str,
        file_path: &str,
        kind: LockKind,
    ) -> Option<LockId> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let key = (workspace_id.to_string(), file_path.to_string());

        match locks.get_mut(&key) {
            None => {
                if kind.is_write() {
                    locks.insert(
                        key,
                        Entry::Exclusive {
                            agent_id: agent_id.to_string(),
                        },
                    );
                    Some(LockId::exclusive(workspace_id, file_path))
                } else {
                    locks.insert(key, Entry::Readers(vec![agent_id.to_string()]));
                    Some(LockId::reader(workspace_id, file_path, agent_id))
                }
            }
            Some(Entry::Readers(readers)) if kind == LockKind::Read => {
                // Re-entrant reader is a no-op success.
                if !readers.iter().any(|r| r == agent_id) {
                    readers.push(agent_id.to_string());
                }
                Some(LockId::reader(workspace_id, file_path, agent_id))
            }
            Some(_) => {
                debug!(
                    workspace_id,
                    file_path,
                    agent_id,
                    kind = %kind,
                    "fallback lock contention"
                );
                None
            }
        }
    }

    /// Release a lock taken through this manager. Returns `false` when the
    /// caller does not hold it; the entry is left intact.
    pub fn release(&self, lock_id: &LockId, agent_id: &str) -> bool {
        let Some(claim) = lock_id.decode() else {
            return false;
        };
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let key = (claim.workspace_id.clone(), claim.file_path.clone());

        match locks.get_mut(&key) {
            Some(Entry::Readers(readers)) if claim.reader.is_some() => {
                let before = readers.len();
                readers.retain(|r| r != agent_id);
                if readers.len() == before {
                    return false;
                }
                if readers.is_empty() {
                    locks.remove(&key);
                }
                true
            }
            Some(Entry::Exclusive { agent_id: holder }) if claim.reader.is_none() => {
                if holder != agent_id {
                    return false;
                }
                locks.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Number of live entries; used by tests and the health snapshot.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusive_write_then_release() {
        let manager = FallbackLockManager::new();

        let lock = manager
            .request("agent-a", "ws", "/f", LockKind::Write)
            .expect("free key grants a write lock");
        assert!(manager.request("agent-b", "ws", "/f", LockKind::Write).is_none());

        assert!(manager.release(&lock, "agent-a"));
        assert!(manager
            .request("agent-b", "ws", "/f", LockKind::Write)
            .is_some());
    }

    #[test]
    fn test_reader_sharing() {
        let manager = FallbackLockManager::new();

        let la = manager.request("a", "ws", "/f", LockKind::Read).unwrap();
        let lb = manager.request("b", "ws", "/f", LockKind::Read).unwrap();
        let lc = manager.request("c", "ws", "/f", LockKind::Read).unwrap();

        assert!(manager.release(&la, "a"));
        assert!(manager.release(&lb, "b"));
        assert_eq!(manager.len(), 1);
        assert!(manager.release(&lc, "c"));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_writer_blocked_by_readers() {
        let manager = FallbackLockManager::new();

        manager.request("a", "ws", "/f", LockKind::Read).unwrap();
        assert!(manager.request("b", "ws", "/f", LockKind::Write).is_none());
        assert!(manager
            .request("b", "ws", "/f", LockKind::Exclusive)
            .is_none());
    }

    #[test]
    fn test_reader_blocked_by_writer() {
        let manager = FallbackLockManager::new();

        manager.request("a", "ws", "/f", LockKind::Exclusive).unwrap();
        assert!(manager.request("b", "ws", "/f", LockKind::Read).is_none());
    }

    #[test]
    fn test_release_requires_ownership() {
        let manager = FallbackLockManager::new();

        let lock = manager.request("a", "ws", "/f", LockKind::Write).unwrap();
        assert!(!manager.release(&lock, "b"));
        // Still held.
        assert!(manager.request("b", "ws", "/f", LockKind::Write).is_none());
        assert!(manager.release(&lock, "a"));
    }

    #[test]
    fn test_reader_release_requires_membership() {
        let manager = FallbackLockManager::new();

        let la = manager.request("a", "ws", "/f", LockKind::Read).unwrap();
        assert!(!manager.release(&la, "b"));
        assert!(manager.release(&la, "a"));
    }

    #[test]
    fn test_reentrant_reader() {
        let manager = FallbackLockManager::new();

        let first = manager.request("a", "ws", "/f", LockKind::Read).unwrap();
        let second = manager.request("a", "ws", "/f", LockKind::Read).unwrap();
        assert_eq!(first, second);

        // One release frees the key: the readers list is a set.
        assert!(manager.release(&first, "a"));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_keys_are_independent() {
        let manager = FallbackLockManager::new();

        manager.request("a", "ws", "/f", LockKind::Write).unwrap();
        assert!(manager.request("b", "ws", "/g", LockKind::Write).is_some());
        assert!(manager.request("b", "other", "/f", LockKind::Write).is_some());
    }

    #[test]
    fn test_foreign_token_rejected() {
        let manager = FallbackLockManager::new();
        let foreign: LockId = serde_json::from_str("\"garbage\"").unwrap();
        assert!(!manager.release(&foreign, "a"));
    }
}
