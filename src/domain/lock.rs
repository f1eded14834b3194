// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Distributed file lock records and identifiers.
//!
//! A lock is keyed by `(workspace_id, file_path)`. At any instant a key holds
//! either one exclusive record or one readers record with at least one
//! member, never both. Lock ids encode the workspace and path so a release
//! needs no lookup table; reader ids additionally carry the reader's agent
//! id with a `:readers:` separator.
//!
//! Workspace and agent ids must not contain `:` — the same assumption the
//! persisted key layout makes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lock kind requested by an agent. `Exclusive` is an alias for `Write` in
/// this system; both exclude every other holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    Read,
    Write,
    Exclusive,
}

impl LockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockKind::Read => "read",
            LockKind::Write => "write",
            LockKind::Exclusive => "exclusive",
        }
    }

    /// Write and exclusive requests cannot share with anyone.
    pub fn is_write(&self) -> bool {
        matches!(self, LockKind::Write | LockKind::Exclusive)
    }
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque lock token handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockId(String);

const LOCK_ID_PREFIX: &str = "lock:";
const READERS_SEPARATOR: &str = ":readers:";

impl LockId {
    pub fn exclusive(workspace_id: &str, file_path: &str) -> Self {
        Self(format!("{LOCK_ID_PREFIX}{workspace_id}:{file_path}"))
    }

    pub fn reader(workspace_id: &str, file_path: &str, agent_id: &str) -> Self {
        Self(format!(
            "{LOCK_ID_PREFIX}{workspace_id}:{file_path}{READERS_SEPARATOR}{agent_id}"
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the claim this id denotes. Returns `None` for tokens that were
    /// not minted by this broker.
    pub fn decode(&self) -> Option<LockClaim> {
        let rest = self.0.strip_prefix(LOCK_ID_PREFIX)?;
        let (body, reader) = match rest.rsplit_once(READERS_SEPARATOR) {
            Some((body, agent)) => (body, Some(agent.to_string())),
            None => (rest, None),
        };
        let (workspace_id, file_path) = body.split_once(':')?;
        if workspace_id.is_empty() || file_path.is_empty() {
            return None;
        }
        Some(LockClaim {
            workspace_id: workspace_id.to_string(),
            file_path: file_path.to_string(),
            reader,
        })
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decoded form of a [`LockId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockClaim {
    pub workspace_id: String,
    pub file_path: String,
    /// Present iff the id denotes a reader slot.
    pub reader: Option<String>,
}

/// Who holds a lock record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LockHolder {
    Exclusive { agent_id: String },
    /// Members live in a companion set; the record itself only marks the key
    /// as reader-held.
    Readers,
}

/// Stored lock record. Expired records are treated as absent by acquirers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub holder: LockHolder,
    pub lock_type: LockKind,
    pub acquired_at: DateTime<Utc>,
    pub ttl_ms: u64,
}

impl LockRecord {
    pub fn exclusive(agent_id: &str, kind: LockKind, ttl_ms: u64) -> Self {
        Self {
            holder: LockHolder::Exclusive {
                agent_id: agent_id.to_string(),
            },
            lock_type: kind,
            acquired_at: Utc::now(),
            ttl_ms,
        }
    }

    pub fn readers(ttl_ms: u64) -> Self {
        Self {
            holder: LockHolder::Readers,
            lock_type: LockKind::Read,
            acquired_at: Utc::now(),
            ttl_ms,
        }
    }
}

/// A queued lock request awaiting a `lock_retry` signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockWaiter {
    pub agent_id: String,
    pub lock_type: LockKind,
    pub enqueued_at: DateTime<Utc>,
}

impl LockWaiter {
    pub fn new(agent_id: &str, lock_type: LockKind) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            lock_type,
            enqueued_at: Utc::now(),
        }
    }
}
