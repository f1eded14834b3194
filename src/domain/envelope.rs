// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Message envelope and taxonomy.
//!
//! Every coordination event, whether it travels over a Redis stream or a
//! Kafka topic, is wrapped in the same envelope. The `type` field is a closed
//! set partitioned by store; the payload is an opaque JSON map whose schema
//! is validated by the consumer that cares about it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::domain::lock::LockKind;

/// Delivery priority carried on every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Closed taxonomy of coordination messages.
///
/// The first five variants travel over Redis streams; the rest are appended
/// to Kafka topics. Session lifecycle events are carried as
/// `WorkspaceSnapshot` with an `eventType` discriminator in the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    FileLock,
    FileEdit,
    AgentStatus,
    WorkspaceEvent,
    ConsensusVote,
    EditHistory,
    WorkspaceSnapshot,
    ConsensusDecision,
    AgentCoordination,
    ConflictResolution,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::FileLock => "file_lock",
            MessageType::FileEdit => "file_edit",
            MessageType::AgentStatus => "agent_status",
            MessageType::WorkspaceEvent => "workspace_event",
            MessageType::ConsensusVote => "consensus_vote",
            MessageType::EditHistory => "edit_history",
            MessageType::WorkspaceSnapshot => "workspace_snapshot",
            MessageType::ConsensusDecision => "consensus_decision",
            MessageType::AgentCoordination => "agent_coordination",
            MessageType::ConflictResolution => "conflict_resolution",
        }
    }

    /// True for types that travel over the fast store's streams.
    pub fn is_realtime(&self) -> bool {
        matches!(
            self,
            MessageType::FileLock
                | MessageType::FileEdit
                | MessageType::AgentStatus
                | MessageType::WorkspaceEvent
                | MessageType::ConsensusVote
        )
    }
}

/// Envelope metadata shared by both stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    pub agent_id: String,
    pub workspace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_type: Option<LockKind>,
    /// Groups related envelopes, e.g. all votes on a proposal share
    /// `consensus_<proposal_id>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Strictly monotonic per producer instance, across all topics.
    pub sequence_number: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_response: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consensus_round: Option<u32>,
}

impl EnvelopeMetadata {
    pub fn new(agent_id: impl Into<String>, workspace_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            workspace_id: workspace_id.into(),
            session_id: None,
            file_path: None,
            lock_type: None,
            correlation_id: None,
            sequence_number: 0,
            retry_count: None,
            requires_response: None,
            consensus_round: None,
        }
    }
}

/// Uniform shape of every published coordination event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Agent id of the producer.
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub priority: Priority,
    pub payload: serde_json::Value,
    pub metadata: EnvelopeMetadata,
}

/// Stamps fresh envelopes with a locally unique id and the producer's next
/// sequence number. One factory per producer instance; the counter is atomic
/// so concurrent callers never observe a duplicate.
#[derive(Debug, Default)]
pub struct EnvelopeFactory {
    sequence: AtomicU64,
}

impl EnvelopeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the next envelope. The source is the acting agent from the
    /// metadata, and `metadata.sequence_number` is overwritten with the
    /// counter value regardless of what the caller supplied.
    pub fn envelope(
        &self,
        message_type: MessageType,
        priority: Priority,
        payload: serde_json::Value,
        mut metadata: EnvelopeMetadata,
    ) -> Envelope {
        metadata.sequence_number = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        Envelope {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            message_type,
            source: metadata.agent_id.clone(),
            target: None,
            priority,
            payload,
            metadata,
        }
    }
}
