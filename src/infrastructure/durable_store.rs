// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Kafka Audit Log - Durable Coordination Orchestrator
//!
//! Infrastructure adapter that implements the [`AuditLog`] port against a
//! Kafka-family backend: append-only topics for edit history, consensus
//! decisions, coordination, conflicts, snapshots, and session lifecycle.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Responsibility:** Serialize envelopes onto audit topics with
//!   per-workspace partitioning; replay consumed records as broker events
//! - **Collaborators:**
//!   - EventBus: receives `kafka_*` and `kafka_message` events
//!   - Domain: audit payload schemas, envelope taxonomy
//!
//! Partition key is always the workspace id, which preserves per-workspace
//! append order. The producer's sequence number is monotonic across all
//! topics for this instance.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::Message;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::domain::audit::{
    ConflictEntry, CoordinationEntry, CoordinationKind, FileEditEntry, WorkspaceLifecycleEntry,
    WorkspaceSnapshot,
};
use crate::domain::config::{KafkaConfig, SaslMechanism};
use crate::domain::consensus::{round_from_proposal_id, ConsensusDecision};
use crate::domain::envelope::{Envelope, EnvelopeFactory, EnvelopeMetadata, MessageType, Priority};
use crate::domain::events::BrokerEvent;
use crate::domain::health::BackendKind;
use crate::domain::store::{AuditLog, Reconnectable, StoreError};
use crate::infrastructure::event_bus::EventBus;

pub const TOPIC_EDIT_HISTORY: &str = "autogen-edit-history";
pub const TOPIC_WORKSPACE_SNAPSHOTS: &str = "autogen-workspace-snapshots";
pub const TOPIC_CONSENSUS_DECISIONS: &str = "autogen-consensus-decisions";
pub const TOPIC_AGENT_COORDINATION: &str = "autogen-agent-coordination";
pub const TOPIC_CONFLICT_RESOLUTION: &str = "autogen-conflict-resolution";
pub const TOPIC_SESSION_MANAGEMENT: &str = "autogen-session-management";
pub const TOPIC_WORKSPACE_LIFECYCLE: &str = "autogen-workspace-lifecycle";
pub const TOPIC_AUDIT_TRAIL: &str = "autogen-audit-trail";
pub const TOPIC_DECISION_LOG: &str = "autogen-decision-log";

/// Every topic the consumer replays; dashboards also read the trailing two.
pub const ALL_TOPICS: [&str; 9] = [
    TOPIC_EDIT_HISTORY,
    TOPIC_WORKSPACE_SNAPSHOTS,
    TOPIC_CONSENSUS_DECISIONS,
    TOPIC_AGENT_COORDINATION,
    TOPIC_CONFLICT_RESOLUTION,
    TOPIC_SESSION_MANAGEMENT,
    TOPIC_WORKSPACE_LIFECYCLE,
    TOPIC_AUDIT_TRAIL,
    TOPIC_DECISION_LOG,
];

const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
const PRODUCE_TIMEOUT: Duration = Duration::from_secs(10);
const CONSUMER_ERROR_BACKOFF_MS: u64 = 1_000;

/// Kafka-backed implementation of the audit log port.
pub struct KafkaAuditLog {
    config: KafkaConfig,
    bus: EventBus,
    factory: EnvelopeFactory,
    producer: Mutex<Option<FutureProducer>>,
    connected: AtomicBool,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl KafkaAuditLog {
    pub fn new(config: KafkaConfig, bus: EventBus) -> Self {
        Self {
            config,
            bus,
            factory: EnvelopeFactory::new(),
            producer: Mutex::new(None),
            connected: AtomicBool::new(false),
            shutdown: Mutex::new(None),
        }
    }

    fn base_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.config.brokers.join(","))
            .set("client.id", &self.config.client_id);

        let protocol = match (self.config.ssl, self.config.auth.is_some()) {
            (true, true) => "sasl_ssl",
            (true, false) => "ssl",
            (false, true) => "sasl_plaintext",
            (false, false) => "plaintext",
        };
        config.set("security.protocol", protocol);

        if let Some(auth) = &self.config.auth {
            let mechanism = match auth.mechanism {
                SaslMechanism::Plain => "PLAIN",
                SaslMechanism::Scram256 => "SCRAM-SHA-256",
                SaslMechanism::Scram512 => "SCRAM-SHA-512",
            };
            config
                .set("sasl.mechanism", mechanism)
                .set("sasl.username", &auth.username)
                .set("sasl.password", &auth.password);
        }
        config
    }

    fn producer_config(&self) -> ClientConfig {
        let mut config = self.base_config();
        config
            .set(
                "message.send.max.retries",
                self.config.retry.retries.to_string(),
            )
            .set("retry.backoff.ms", self.config.retry.initial_ms.to_string())
            .set("batch.size", self.config.batch.size.to_string())
            .set("linger.ms", self.config.batch.linger_ms.to_string());
        config
    }

    fn consumer_config(&self) -> ClientConfig {
        let mut config = self.base_config();
        config
            .set("group.id", &self.config.group_id)
            .set(
                "session.timeout.ms",
                self.config.session_timeout_ms.to_string(),
            )
            .set(
                "heartbeat.interval.ms",
                self.config.heartbeat_interval_ms.to_string(),
            )
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("allow.auto.create.topics", "true");
        config
    }

    /// Record a failed produce: flip to disconnected and surface the first
    /// error so the supervisor starts a reconnect.
    fn fail(&self, message: String) -> StoreError {
        error!(error = %message, "kafka produce failed");
        if self.connected.swap(false, Ordering::SeqCst) {
            self.bus.publish(BrokerEvent::KafkaError {
                message: message.clone(),
            });
        }
        StoreError::Backend(message)
    }

    fn spawn_consumer(&self, consumer: StreamConsumer, mut shutdown: watch::Receiver<bool>) {
        let bus = self.bus.clone();
        tokio::spawn(async move {
            info!("kafka consumer started");
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    received = consumer.recv() => {
                        match received {
                            Ok(message) => {
                                let topic = message.topic().to_string();
                                match parse_envelope(message.payload()) {
                                    Ok(envelope) => {
                                        bus.publish(BrokerEvent::KafkaMessage {
                                            topic,
                                            envelope,
                                        });
                                        if let Err(err) =
                                            consumer.commit_message(&message, CommitMode::Async)
                                        {
                                            warn!(error = %err, "kafka commit failed");
                                        }
                                    }
                                    Err(err) => {
                                        // Unparseable records stay uncommitted;
                                        // the loop must survive them.
                                        error!(
                                            topic = %topic,
                                            error = %err,
                                            "failed to parse audit envelope"
                                        );
                                    }
                                }
                            }
                            Err(err) => {
                                warn!(error = %err, "kafka receive failed");
                                tokio::time::sleep(Duration::from_millis(
                                    CONSUMER_ERROR_BACKOFF_MS,
                                ))
                                .await;
                            }
                        }
                    }
                }
            }
            info!("kafka consumer stopped");
        });
    }

    async fn append(&self, topic: &str, envelope: Envelope) -> Result<(), StoreError> {
        let producer = self
            .producer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(StoreError::NotConnected)?;
        let payload = serde_json::to_string(&envelope)?;

        let mut headers = OwnedHeaders::new()
            .insert(Header {
                key: "messageType",
                value: Some(envelope.message_type.as_str()),
            })
            .insert(Header {
                key: "agentId",
                value: Some(envelope.metadata.agent_id.as_str()),
            });
        if let Some(correlation_id) = &envelope.metadata.correlation_id {
            headers = headers.insert(Header {
                key: "correlationId",
                value: Some(correlation_id.as_str()),
            });
        }

        let record = FutureRecord::to(topic)
            .key(&envelope.metadata.workspace_id)
            .payload(&payload)
            .headers(headers);
        match producer.send(record, Timeout::After(PRODUCE_TIMEOUT)).await {
            Ok(_delivery) => Ok(()),
            Err((err, _message)) => Err(self.fail(err.to_string())),
        }
    }

    fn edit_envelope(
        &self,
        agent_id: &str,
        workspace_id: &str,
        session_id: &str,
        file_path: &str,
        entry: &FileEditEntry,
    ) -> Result<Envelope, StoreError> {
        let mut payload = serde_json::to_value(entry)?;
        if let serde_json::Value::Object(map) = &mut payload {
            map.insert("file_path".to_string(), file_path.into());
        }
        let mut metadata = EnvelopeMetadata::new(agent_id, workspace_id);
        metadata.session_id = Some(session_id.to_string());
        metadata.file_path = Some(file_path.to_string());
        Ok(self
            .factory
            .envelope(MessageType::EditHistory, Priority::Medium, payload, metadata))
    }

    fn decision_envelope(
        &self,
        agent_id: &str,
        workspace_id: &str,
        session_id: &str,
        decision: &ConsensusDecision,
    ) -> Result<Envelope, StoreError> {
        let mut metadata = EnvelopeMetadata::new(agent_id, workspace_id);
        metadata.session_id = Some(session_id.to_string());
        metadata.correlation_id = Some(format!("consensus_{}", decision.proposal_id));
        metadata.consensus_round = Some(round_from_proposal_id(&decision.proposal_id));
        Ok(self.factory.envelope(
            MessageType::ConsensusDecision,
            Priority::High,
            serde_json::to_value(decision)?,
            metadata,
        ))
    }

    fn coordination_envelope(
        &self,
        agent_id: &str,
        workspace_id: &str,
        session_id: &str,
        entry: &CoordinationEntry,
    ) -> Result<Envelope, StoreError> {
        let mut metadata = EnvelopeMetadata::new(agent_id, workspace_id);
        metadata.session_id = Some(session_id.to_string());
        // Delegations expect an answer from the target.
        metadata.requires_response = Some(entry.kind == CoordinationKind::Delegation);
        let mut envelope = self.factory.envelope(
            MessageType::AgentCoordination,
            entry.priority,
            serde_json::to_value(entry)?,
            metadata,
        );
        envelope.target = entry.target_agent.clone();
        Ok(envelope)
    }
}

#[async_trait]
impl Reconnectable for KafkaAuditLog {
    fn service(&self) -> BackendKind {
        BackendKind::Kafka
    }

    async fn reconnect(&self) -> Result<(), StoreError> {
        self.connect().await
    }
}

#[async_trait]
impl AuditLog for KafkaAuditLog {
    async fn connect(&self) -> Result<(), StoreError> {
        // Idempotent: no double subscribe.
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let producer: FutureProducer = self
            .producer_config()
            .create()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        producer
            .client()
            .fetch_metadata(None, Timeout::After(METADATA_TIMEOUT))
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let consumer: StreamConsumer = self
            .consumer_config()
            .create()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        consumer
            .subscribe(&ALL_TOPICS)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        *self.producer.lock().unwrap_or_else(|e| e.into_inner()) = Some(producer);

        let (tx, rx) = watch::channel(false);
        if let Some(previous) = self
            .shutdown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(tx)
        {
            let _ = previous.send(true);
        }
        self.spawn_consumer(consumer, rx);

        self.connected.store(true, Ordering::SeqCst);
        info!(brokers = %self.config.brokers.join(","), "kafka connected");
        self.bus.publish(BrokerEvent::KafkaConnected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), StoreError> {
        if let Some(tx) = self
            .shutdown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = tx.send(true);
        }
        *self.producer.lock().unwrap_or_else(|e| e.into_inner()) = None;
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("kafka disconnected");
            self.bus.publish(BrokerEvent::KafkaDisconnected);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn log_file_edit(
        &self,
        agent_id: &str,
        workspace_id: &str,
        session_id: &str,
        file_path: &str,
        entry: FileEditEntry,
    ) -> Result<(), StoreError> {
        let envelope = self.edit_envelope(agent_id, workspace_id, session_id, file_path, &entry)?;
        self.append(TOPIC_EDIT_HISTORY, envelope).await
    }

    async fn save_workspace_snapshot(
        &self,
        agent_id: &str,
        workspace_id: &str,
        session_id: &str,
        snapshot: WorkspaceSnapshot,
    ) -> Result<(), StoreError> {
        let mut metadata = EnvelopeMetadata::new(agent_id, workspace_id);
        metadata.session_id = Some(session_id.to_string());
        let envelope = self.factory.envelope(
            MessageType::WorkspaceSnapshot,
            Priority::Low,
            serde_json::to_value(&snapshot)?,
            metadata,
        );
        self.append(TOPIC_WORKSPACE_SNAPSHOTS, envelope).await
    }

    async fn log_consensus_decision(
        &self,
        agent_id: &str,
        workspace_id: &str,
        session_id: &str,
        decision: ConsensusDecision,
    ) -> Result<(), StoreError> {
        let envelope = self.decision_envelope(agent_id, workspace_id, session_id, &decision)?;
        self.append(TOPIC_CONSENSUS_DECISIONS, envelope).await
    }

    async fn log_agent_coordination(
        &self,
        agent_id: &str,
        workspace_id: &str,
        session_id: &str,
        entry: CoordinationEntry,
    ) -> Result<(), StoreError> {
        let envelope = self.coordination_envelope(agent_id, workspace_id, session_id, &entry)?;
        self.append(TOPIC_AGENT_COORDINATION, envelope).await
    }

    async fn log_conflict_resolution(
        &self,
        agent_id: &str,
        workspace_id: &str,
        session_id: &str,
        entry: ConflictEntry,
    ) -> Result<(), StoreError> {
        let mut metadata = EnvelopeMetadata::new(agent_id, workspace_id);
        metadata.session_id = Some(session_id.to_string());
        metadata.correlation_id = Some(entry.conflict_id.clone());
        let envelope = self.factory.envelope(
            MessageType::ConflictResolution,
            Priority::High,
            serde_json::to_value(&entry)?,
            metadata,
        );
        self.append(TOPIC_CONFLICT_RESOLUTION, envelope).await
    }

    async fn log_workspace_lifecycle(
        &self,
        agent_id: &str,
        workspace_id: &str,
        session_id: &str,
        entry: WorkspaceLifecycleEntry,
    ) -> Result<(), StoreError> {
        let mut payload = serde_json::to_value(&entry)?;
        if let serde_json::Value::Object(map) = &mut payload {
            map.insert("eventType".to_string(), "workspace_lifecycle".into());
        }
        let mut metadata = EnvelopeMetadata::new(agent_id, workspace_id);
        metadata.session_id = Some(session_id.to_string());
        let envelope = self.factory.envelope(
            MessageType::WorkspaceSnapshot,
            Priority::Medium,
            payload,
            metadata,
        );
        self.append(TOPIC_WORKSPACE_LIFECYCLE, envelope).await
    }

    async fn start_session(
        &self,
        agent_id: &str,
        workspace_id: &str,
        session_id: &str,
        participants: Vec<String>,
    ) -> Result<(), StoreError> {
        let mut metadata = EnvelopeMetadata::new(agent_id, workspace_id);
        metadata.session_id = Some(session_id.to_string());
        let envelope = self.factory.envelope(
            MessageType::WorkspaceSnapshot,
            Priority::Medium,
            serde_json::json!({
                "eventType": "session_started",
                "participants": participants,
            }),
            metadata,
        );
        self.append(TOPIC_SESSION_MANAGEMENT, envelope).await
    }

    async fn end_session(
        &self,
        agent_id: &str,
        workspace_id: &str,
        session_id: &str,
        reason: Option<String>,
    ) -> Result<(), StoreError> {
        let mut metadata = EnvelopeMetadata::new(agent_id, workspace_id);
        metadata.session_id = Some(session_id.to_string());
        let envelope = self.factory.envelope(
            MessageType::WorkspaceSnapshot,
            Priority::Medium,
            serde_json::json!({
                "eventType": "session_ended",
                "reason": reason,
            }),
            metadata,
        );
        self.append(TOPIC_SESSION_MANAGEMENT, envelope).await
    }
}

/// Decode one consumed record back into an envelope.
fn parse_envelope(payload: Option<&[u8]>) -> Result<Envelope, StoreError> {
    let bytes =
        payload.ok_or_else(|| StoreError::Malformed("audit record has no payload".to_string()))?;
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audit::EditOperation;
    use crate::domain::config::KafkaConfig;
    use crate::domain::consensus::{ConsensusMethod, Decision, Vote, VoteChoice};
    use std::collections::HashMap;

    fn audit_log() -> KafkaAuditLog {
        KafkaAuditLog::new(KafkaConfig::default(), EventBus::new(16))
    }

    fn decision(proposal_id: &str) -> ConsensusDecision {
        ConsensusDecision {
            proposal_id: proposal_id.to_string(),
            description: "adopt schema v2".to_string(),
            votes: HashMap::from([(
                "agent-1".to_string(),
                Vote::new(VoteChoice::Agree),
            )]),
            final_decision: Decision::Approved,
            method: ConsensusMethod::Majority,
            confidence: Some(1.0),
        }
    }

    #[test]
    fn test_parse_envelope_round_trip() {
        let log = audit_log();
        let envelope = log
            .edit_envelope(
                "agent-1",
                "ws-1",
                "session-1",
                "/src/lib.rs",
                &FileEditEntry {
                    operation: Some(EditOperation::Update),
                    ..FileEditEntry::default()
                },
            )
            .unwrap();
        let bytes = serde_json::to_vec(&envelope).unwrap();
        let decoded = parse_envelope(Some(&bytes)).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_parse_envelope_rejects_garbage() {
        assert!(parse_envelope(None).is_err());
        assert!(parse_envelope(Some(b"{broken")).is_err());
    }

    #[test]
    fn test_decision_envelope_extracts_round() {
        let log = audit_log();
        let envelope = log
            .decision_envelope("agent-1", "ws-1", "s-1", &decision("schema_round_4"))
            .unwrap();
        assert_eq!(envelope.metadata.consensus_round, Some(4));
        assert_eq!(
            envelope.metadata.correlation_id.as_deref(),
            Some("consensus_schema_round_4")
        );
    }

    #[test]
    fn test_decision_envelope_defaults_round_to_one() {
        let log = audit_log();
        let envelope = log
            .decision_envelope("agent-1", "ws-1", "s-1", &decision("plain-proposal"))
            .unwrap();
        assert_eq!(envelope.metadata.consensus_round, Some(1));
    }

    #[test]
    fn test_delegation_requires_response() {
        let log = audit_log();
        let mut entry = CoordinationEntry::new(CoordinationKind::Delegation, "split the work");
        entry.target_agent = Some("agent-2".to_string());
        let envelope = log
            .coordination_envelope("agent-1", "ws-1", "s-1", &entry)
            .unwrap();
        assert_eq!(envelope.metadata.requires_response, Some(true));
        assert_eq!(envelope.target.as_deref(), Some("agent-2"));

        let entry = CoordinationEntry::new(CoordinationKind::Handoff, "take over");
        let envelope = log
            .coordination_envelope("agent-1", "ws-1", "s-1", &entry)
            .unwrap();
        assert_eq!(envelope.metadata.requires_response, Some(false));
    }

    #[test]
    fn test_sequence_monotonic_across_topics() {
        let log = audit_log();
        let first = log
            .edit_envelope("a", "w", "s", "/f", &FileEditEntry::default())
            .unwrap();
        let second = log
            .decision_envelope("a", "w", "s", &decision("p"))
            .unwrap();
        assert!(second.metadata.sequence_number > first.metadata.sequence_number);
    }
}
