// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Payload schemas for the durable audit trail.
//!
//! These are the typed forms behind the envelope's opaque payload map; the
//! durable orchestrator serializes them at the producer boundary and the
//! consumer validates them back out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::envelope::Priority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditOperation {
    Create,
    Update,
    Delete,
}

/// One file edit, carried as opaque content/patches. The broker never diffs
/// or persists file bytes itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FileEditEntry {
    pub operation: Option<EditOperation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl FileEditEntry {
    pub fn update() -> Self {
        Self {
            operation: Some(EditOperation::Update),
            ..Self::default()
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationKind {
    Handoff,
    Collaboration,
    Delegation,
    Synchronization,
}

/// Agent-to-agent coordination record. Delegations expect an answer, so they
/// are flagged `requires_response` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationEntry {
    pub kind: CoordinationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_agent: Option<String>,
    pub task: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_duration_ms: Option<u64>,
    pub priority: Priority,
}

impl CoordinationEntry {
    pub fn new(kind: CoordinationKind, task: impl Into<String>) -> Self {
        Self {
            kind,
            target_agent: None,
            task: task.into(),
            dependencies: Vec::new(),
            expected_duration_ms: None,
            priority: Priority::Medium,
        }
    }
}

/// Conflict resolution record; correlated across stores by its conflict id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictEntry {
    pub conflict_id: String,
    pub conflict_type: String,
    pub involved_agents: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub resolution_method: String,
    pub resolution: String,
    pub outcome: String,
}

/// Append-only workspace snapshot; never mutated after it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WorkspaceSnapshot {
    pub files: HashMap<String, String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub active_agents: Vec<String>,
    /// proposal_id -> recorded outcome
    #[serde(default)]
    pub consensus: HashMap<String, String>,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Created,
    Archived,
}

/// Workspace open/close marker on the lifecycle topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceLifecycleEntry {
    pub event: LifecycleEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl WorkspaceLifecycleEntry {
    pub fn new(event: LifecycleEvent) -> Self {
        Self {
            event,
            name: None,
            reason: None,
            occurred_at: Utc::now(),
        }
    }
}
