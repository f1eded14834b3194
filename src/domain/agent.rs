// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent presence records.
//!
//! The fast store's registry is the single owner of these rows; the bridge
//! never caches them. Re-registering an agent is idempotent and the latest
//! call wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Busy,
    Idle,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Busy => "busy",
            AgentStatus::Idle => "idle",
            AgentStatus::Offline => "offline",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(AgentStatus::Active),
            "busy" => Some(AgentStatus::Busy),
            "idle" => Some(AgentStatus::Idle),
            "offline" => Some(AgentStatus::Offline),
            _ => None,
        }
    }
}

/// One row in the agent registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub name: String,
    pub model: String,
    pub capabilities: BTreeSet<String>,
    pub workspace_id: String,
    pub status: AgentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl AgentRecord {
    pub fn new(
        agent_id: impl Into<String>,
        name: impl Into<String>,
        model: impl Into<String>,
        workspace_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.into(),
            name: name.into(),
            model: model.into(),
            capabilities: BTreeSet::new(),
            workspace_id: workspace_id.into(),
            status: AgentStatus::Active,
            current_task: None,
            registered_at: now,
            last_heartbeat: now,
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_round_trip() {
        for status in [
            AgentStatus::Active,
            AgentStatus::Busy,
            AgentStatus::Idle,
            AgentStatus::Offline,
        ] {
            assert_eq!(AgentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AgentStatus::parse("retired"), None);
    }

    #[test]
    fn test_new_record_is_active() {
        let record = AgentRecord::new("a1", "planner", "gpt-large", "ws-1")
            .with_capabilities(["plan", "review"]);
        assert_eq!(record.status, AgentStatus::Active);
        assert!(record.capabilities.contains("review"));
        assert!(record.current_task.is_none());
    }
}
