// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Broker configuration.
//!
//! Every section deserializes with defaults so a config file only needs the
//! fields it overrides. Validation runs once at startup; a violation is
//! fatal there and never reached at runtime.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::consensus::ConsensusMethod;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("fast store host must not be empty")]
    EmptyRedisHost,
    #[error("at least one durable store broker is required")]
    NoKafkaBrokers,
    #[error("max_agents_per_workspace must be at least 1")]
    NoAgentCapacity,
    #[error("majority_threshold must be within [0, 1], got {0}")]
    MajorityThresholdOutOfRange(f64),
    #[error("workspace root must not be empty")]
    EmptyWorkspaceRoot,
}

/// Fast store (Redis) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub db: i64,
    pub stream_prefix: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub max_pending_messages: usize,
    pub heartbeat_interval_ms: u64,
    pub lock_timeout_ms: u64,
    pub message_retention_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: 0,
            stream_prefix: "concord".to_string(),
            consumer_group: "concord-brokers".to_string(),
            consumer_name: "broker-1".to_string(),
            max_pending_messages: 100,
            heartbeat_interval_ms: 5_000,
            lock_timeout_ms: 30_000,
            message_retention_ms: 3_600_000,
        }
    }
}

impl RedisConfig {
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaslMechanism {
    #[serde(rename = "plain")]
    Plain,
    #[serde(rename = "scram-256")]
    Scram256,
    #[serde(rename = "scram-512")]
    Scram512,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaAuth {
    pub mechanism: SaslMechanism,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_ms: u64,
    pub retries: u32,
    pub max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_ms: 300,
            retries: 5,
            max_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub size: u32,
    pub linger_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: 16_384,
            linger_ms: 5,
        }
    }
}

/// Durable store (Kafka) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub client_id: String,
    pub brokers: Vec<String>,
    pub ssl: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<KafkaAuth>,
    pub group_id: String,
    pub session_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub retry: RetryConfig,
    pub batch: BatchConfig,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            client_id: "concord-broker".to_string(),
            brokers: vec!["127.0.0.1:9092".to_string()],
            ssl: false,
            auth: None,
            group_id: "concord-audit".to_string(),
            session_timeout_ms: 30_000,
            heartbeat_interval_ms: 3_000,
            retry: RetryConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMode {
    Memory,
    File,
    Disabled,
}

/// Health and reconnect supervision settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub fallback_mode: FallbackMode,
    pub health_check_interval_ms: u64,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            fallback_mode: FallbackMode::Memory,
            health_check_interval_ms: 10_000,
            reconnect_attempts: 5,
            reconnect_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub root: String,
    pub max_agents_per_workspace: usize,
    pub max_files_per_workspace: usize,
    pub max_file_size_bytes: u64,
    pub max_concurrent_edits: usize,
    pub max_session_duration_ms: u64,
    pub lock_timeout_ms: u64,
    pub consensus_timeout_ms: u64,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: "./workspace".to_string(),
            max_agents_per_workspace: 10,
            max_files_per_workspace: 1_000,
            max_file_size_bytes: 10 * 1024 * 1024,
            max_concurrent_edits: 5,
            max_session_duration_ms: 3_600_000,
            lock_timeout_ms: 30_000,
            consensus_timeout_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub default_method: ConsensusMethod,
    pub majority_threshold: f64,
    pub weighting_strategy: String,
    pub vote_timeout_ms: u64,
    pub max_rounds: u32,
    pub deadlock_resolution: String,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            default_method: ConsensusMethod::Majority,
            majority_threshold: 0.5,
            weighting_strategy: "equal".to_string(),
            vote_timeout_ms: 60_000,
            max_rounds: 3,
            deadlock_resolution: "defer".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub enable_file_locking: bool,
    pub enable_edit_history: bool,
    pub enable_audit_logging: bool,
    pub max_lock_duration_ms: u64,
    pub allow_concurrent_reads: bool,
    pub require_agent_auth: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_file_locking: true,
            enable_edit_history: true,
            enable_audit_logging: true,
            max_lock_duration_ms: 300_000,
            allow_concurrent_reads: true,
            require_agent_auth: false,
        }
    }
}

/// Top-level broker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub supervisor: SupervisorConfig,
    pub workspace: WorkspaceConfig,
    pub consensus: ConsensusConfig,
    pub security: SecurityConfig,
}

impl BrokerConfig {
    /// Enforce the startup invariants. Called once before the broker is
    /// wired up; a failure here is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis.host.trim().is_empty() {
            return Err(ConfigError::EmptyRedisHost);
        }
        if self.kafka.brokers.is_empty() {
            return Err(ConfigError::NoKafkaBrokers);
        }
        if self.workspace.max_agents_per_workspace < 1 {
            return Err(ConfigError::NoAgentCapacity);
        }
        if !(0.0..=1.0).contains(&self.consensus.majority_threshold) {
            return Err(ConfigError::MajorityThresholdOutOfRange(
                self.consensus.majority_threshold,
            ));
        }
        if self.workspace.root.trim().is_empty() {
            return Err(ConfigError::EmptyWorkspaceRoot);
        }
        Ok(())
    }
}
