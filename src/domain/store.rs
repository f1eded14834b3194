// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Store ports — the seams between the bridge and the two backends.
//!
//! The Redis and Kafka orchestrators implement these traits as
//! anti-corruption layers; the bridge and the supervisor depend only on the
//! trait objects, which keeps the backends mockable in tests.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::agent::{AgentRecord, AgentStatus};
use crate::domain::audit::{
    ConflictEntry, CoordinationEntry, FileEditEntry, WorkspaceLifecycleEntry, WorkspaceSnapshot,
};
use crate::domain::consensus::{ConsensusDecision, ConsensusVote};
use crate::domain::health::BackendKind;
use crate::domain::lock::{LockId, LockKind};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store is not connected")]
    NotConnected,
    #[error("backend error: {0}")]
    Backend(String),
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Malformed(err.to_string())
    }
}

/// A backend the supervisor can try to bring back.
#[async_trait]
pub trait Reconnectable: Send + Sync {
    fn service(&self) -> BackendKind;

    /// Idempotent: reconnecting an already-connected backend returns
    /// immediately.
    async fn reconnect(&self) -> Result<(), StoreError>;
}

/// Real-time coordination surface backed by the fast store.
#[async_trait]
pub trait RealtimeStore: Reconnectable {
    async fn connect(&self) -> Result<(), StoreError>;
    async fn disconnect(&self) -> Result<(), StoreError>;
    fn is_connected(&self) -> bool;

    async fn register_agent(&self, agent: AgentRecord) -> Result<(), StoreError>;
    async fn update_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
        current_task: Option<String>,
    ) -> Result<(), StoreError>;
    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>, StoreError>;
    async fn list_workspace_agents(
        &self,
        workspace_id: &str,
    ) -> Result<Vec<AgentRecord>, StoreError>;

    /// Returns `None` on contention; the request is queued and the caller
    /// retries on the matching `lock_retry` event.
    async fn request_file_lock(
        &self,
        agent_id: &str,
        workspace_id: &str,
        file_path: &str,
        kind: LockKind,
    ) -> Result<Option<LockId>, StoreError>;

    /// `false` means the caller did not hold the lock; the record is left
    /// intact.
    async fn release_file_lock(&self, lock_id: &LockId, agent_id: &str)
        -> Result<bool, StoreError>;

    async fn publish_file_edit(
        &self,
        agent_id: &str,
        workspace_id: &str,
        session_id: Option<&str>,
        file_path: &str,
        entry: FileEditEntry,
    ) -> Result<(), StoreError>;

    async fn publish_consensus_vote(
        &self,
        agent_id: &str,
        workspace_id: &str,
        vote: ConsensusVote,
    ) -> Result<(), StoreError>;
}

/// Append-only audit surface backed by the durable store.
#[async_trait]
pub trait AuditLog: Reconnectable {
    async fn connect(&self) -> Result<(), StoreError>;
    async fn disconnect(&self) -> Result<(), StoreError>;
    fn is_connected(&self) -> bool;

    async fn log_file_edit(
        &self,
        agent_id: &str,
        workspace_id: &str,
        session_id: &str,
        file_path: &str,
        entry: FileEditEntry,
    ) -> Result<(), StoreError>;

    async fn save_workspace_snapshot(
        &self,
        agent_id: &str,
        workspace_id: &str,
        session_id: &str,
        snapshot: WorkspaceSnapshot,
    ) -> Result<(), StoreError>;

    async fn log_consensus_decision(
        &self,
        agent_id: &str,
        workspace_id: &str,
        session_id: &str,
        decision: ConsensusDecision,
    ) -> Result<(), StoreError>;

    async fn log_agent_coordination(
        &self,
        agent_id: &str,
        workspace_id: &str,
        session_id: &str,
        entry: CoordinationEntry,
    ) -> Result<(), StoreError>;

    async fn log_conflict_resolution(
        &self,
        agent_id: &str,
        workspace_id: &str,
        session_id: &str,
        entry: ConflictEntry,
    ) -> Result<(), StoreError>;

    async fn log_workspace_lifecycle(
        &self,
        agent_id: &str,
        workspace_id: &str,
        session_id: &str,
        entry: WorkspaceLifecycleEntry,
    ) -> Result<(), StoreError>;

    async fn start_session(
        &self,
        agent_id: &str,
        workspace_id: &str,
        session_id: &str,
        participants: Vec<String>,
    ) -> Result<(), StoreError>;

    async fn end_session(
        &self,
        agent_id: &str,
        workspace_id: &str,
        session_id: &str,
        reason: Option<String>,
    ) -> Result<(), StoreError>;
}
