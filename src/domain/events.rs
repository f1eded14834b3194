// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! The broker's public event surface.
//!
//! Everything a dashboard or adapter can observe arrives as one of these
//! variants on the event bus. Orchestrators and the supervisor own the
//! emitters; the bridge owns the subscribers — the graph is one-way.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::envelope::Envelope;
use crate::domain::health::{BackendKind, HealthReport};
use crate::domain::lock::LockWaiter;

/// Operations routed through the coordination bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    RequestFileLock,
    ReleaseFileLock,
    PublishFileEdit,
    RegisterAgent,
    UpdateAgentStatus,
    PublishConsensusVote,
    LogConsensusDecision,
    LogAgentCoordination,
    LogConflictResolution,
    SaveWorkspaceSnapshot,
    LogWorkspaceLifecycle,
    StartSession,
    EndSession,
}

/// Internal record of one bridge call, emitted to subscribers after routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceOperation {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: OperationKind,
    pub agent_id: String,
    pub workspace_id: String,
    pub data: serde_json::Value,
    pub requires_persistence: bool,
    pub requires_realtime: bool,
}

impl WorkspaceOperation {
    pub fn new(
        kind: OperationKind,
        agent_id: &str,
        workspace_id: &str,
        data: serde_json::Value,
        requires_persistence: bool,
        requires_realtime: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            agent_id: agent_id.to_string(),
            workspace_id: workspace_id.to_string(),
            data,
            requires_persistence,
            requires_realtime,
        }
    }
}

/// Unified broker event published on the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BrokerEvent {
    Initialized,
    Shutdown,
    WorkspaceOperation {
        operation: WorkspaceOperation,
    },
    RedisConnected,
    RedisDisconnected,
    RedisError {
        message: String,
    },
    KafkaConnected,
    KafkaDisconnected,
    KafkaError {
        message: String,
    },
    HealthChanged {
        report: HealthReport,
    },
    /// A waiter was drained on lock release; the named agent may re-invoke
    /// `request_file_lock`. Exactly one waiter is woken per release.
    LockRetry {
        workspace_id: String,
        file_path: String,
        waiter: LockWaiter,
    },
    ReconnectAttemptFailed {
        service: BackendKind,
        attempt: u32,
        message: String,
    },
    ReconnectFailed {
        service: BackendKind,
        attempts: u32,
    },
    RedisMessage {
        stream: String,
        envelope: Envelope,
    },
    KafkaMessage {
        topic: String,
        envelope: Envelope,
    },
}

impl BrokerEvent {
    /// Workspace this event concerns, when it concerns one.
    pub fn workspace_id(&self) -> Option<&str> {
        match self {
            BrokerEvent::WorkspaceOperation { operation } => Some(&operation.workspace_id),
            BrokerEvent::LockRetry { workspace_id, .. } => Some(workspace_id),
            BrokerEvent::RedisMessage { envelope, .. }
            | BrokerEvent::KafkaMessage { envelope, .. } => {
                Some(&envelope.metadata.workspace_id)
            }
            _ => None,
        }
    }
}
