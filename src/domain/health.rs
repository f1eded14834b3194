// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Backend health status and the overall rollup.
//!
//! Health is observational: it transitions only on connect/disconnect/error
//! events, and callers never block on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two backends the broker coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Redis,
    Kafka,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Redis => "redis",
            BackendKind::Kafka => "kafka",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-backend connection status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub connected: bool,
    pub last_health_check: DateTime<Utc>,
    pub error_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Default for BackendHealth {
    fn default() -> Self {
        Self {
            connected: false,
            last_health_check: Utc::now(),
            error_count: 0,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallHealth {
    /// Both backends reachable.
    Healthy,
    /// Exactly one backend reachable; callers still get best-effort success.
    Degraded,
    /// Neither backend reachable.
    Offline,
}

/// Snapshot of both backends plus the rollup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub redis: BackendHealth,
    pub kafka: BackendHealth,
    pub overall: OverallHealth,
}

/// Overall health is a pure function of the two connection flags.
pub fn rollup(redis_connected: bool, kafka_connected: bool) -> OverallHealth {
    match (redis_connected, kafka_connected) {
        (true, true) => OverallHealth::Healthy,
        (false, false) => OverallHealth::Offline,
        _ => OverallHealth::Degraded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollup_truth_table() {
        assert_eq!(rollup(true, true), OverallHealth::Healthy);
        assert_eq!(rollup(true, false), OverallHealth::Degraded);
        assert_eq!(rollup(false, true), OverallHealth::Degraded);
        assert_eq!(rollup(false, false), OverallHealth::Offline);
    }
}
