// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Coordination Bridge - Public API Surface
//!
//! Application service that unifies the fast store, the durable store, and
//! the in-process fallback behind one entry point. Each call is routed to
//! its real-time and/or durable path; a failure on one path never fails the
//! other, and a failure on both is logged rather than raised unless the call
//! carries a return value.
//!
//! # Event Flow
//!
//! ```text
//! caller
//!   |
//!   v
//! CoordinationBridge ---- realtime path ----> RedisCoordinator
//!   |            \------- durable path -----> KafkaAuditLog
//!   |             \------ degraded path ----> FallbackLockManager
//!   v
//! EventBus (workspace_operation + orchestrator/supervisor events)
//! ```

use anyhow::Context;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::supervisor::HealthSupervisor;
use crate::domain::agent::{AgentRecord, AgentStatus};
use crate::domain::audit::{
    ConflictEntry, CoordinationEntry, CoordinationKind, FileEditEntry, WorkspaceLifecycleEntry,
    WorkspaceSnapshot,
};
use crate::domain::config::{BrokerConfig, ConfigError, FallbackMode};
use crate::domain::consensus::{ConsensusDecision, ConsensusVote};
use crate::domain::events::{BrokerEvent, OperationKind, WorkspaceOperation};
use crate::domain::health::{BackendKind, HealthReport};
use crate::domain::lock::{LockId, LockKind};
use crate::domain::store::{AuditLog, RealtimeStore};
use crate::infrastructure::durable_store::KafkaAuditLog;
use crate::infrastructure::event_bus::{
    EventBus, EventBusError, EventReceiver, WorkspaceEventReceiver,
};
use crate::infrastructure::fallback_locks::FallbackLockManager;
use crate::infrastructure::fast_store::RedisCoordinator;

/// Single entry point for agent-facing coordination.
pub struct CoordinationBridge {
    config: BrokerConfig,
    realtime: Arc<dyn RealtimeStore>,
    audit: Arc<dyn AuditLog>,
    fallback: Option<FallbackLockManager>,
    supervisor: Arc<HealthSupervisor>,
    bus: EventBus,
    shutdown: watch::Sender<bool>,
}

impl CoordinationBridge {
    /// Wire a bridge over the given store implementations. Configuration is
    /// validated here; an invalid config never reaches runtime.
    pub fn new(
        config: BrokerConfig,
        realtime: Arc<dyn RealtimeStore>,
        audit: Arc<dyn AuditLog>,
        bus: EventBus,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let supervisor = Arc::new(HealthSupervisor::new(config.supervisor.clone(), bus.clone()));
        let fallback = match config.supervisor.fallback_mode {
            FallbackMode::Disabled => None,
            FallbackMode::Memory => Some(FallbackLockManager::new()),
            FallbackMode::File => {
                // The file variant shares the in-memory table; fallback locks
                // are orphaned on recovery either way.
                warn!("file fallback mode uses the in-memory lock table");
                Some(FallbackLockManager::new())
            }
        };
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            config,
            realtime,
            audit,
            fallback,
            supervisor,
            bus,
            shutdown,
        })
    }

    /// Composition root over the real orchestrators: one event bus shared by
    /// the bridge, the Redis coordinator, and the Kafka audit log.
    pub fn from_config(config: BrokerConfig) -> anyhow::Result<Self> {
        let bus = EventBus::with_default_capacity();
        let realtime = RedisCoordinator::new(config.redis.clone(), bus.clone())
            .context("fast store client setup failed")?;
        let audit = KafkaAuditLog::new(config.kafka.clone(), bus.clone());
        Self::new(config, Arc::new(realtime), Arc::new(audit), bus)
            .context("invalid broker configuration")
    }

    /// Connect both backends and start supervision. Backend failures here
    /// degrade health and schedule reconnects instead of failing startup.
    pub async fn initialize(&self) {
        self.spawn_supervision();
        self.supervisor.start_health_timer(self.shutdown.subscribe());

        match self.realtime.connect().await {
            Ok(()) => self.supervisor.mark_connected(BackendKind::Redis),
            Err(err) => {
                warn!(error = %err, "fast store unavailable at startup");
                self.supervisor
                    .record_failure(BackendKind::Redis, &err.to_string());
                self.supervisor.maybe_reconnect(Arc::clone(&self.realtime));
            }
        }
        match self.audit.connect().await {
            Ok(()) => self.supervisor.mark_connected(BackendKind::Kafka),
            Err(err) => {
                warn!(error = %err, "durable store unavailable at startup");
                self.supervisor
                    .record_failure(BackendKind::Kafka, &err.to_string());
                self.supervisor.maybe_reconnect(Arc::clone(&self.audit));
            }
        }

        info!("coordination bridge initialized");
        self.bus.publish(BrokerEvent::Initialized);
    }

    /// Stop timers and consumer loops, disconnect both backends.
    pub async fn shutdown(&self) {
        self.bus.publish(BrokerEvent::Shutdown);
        let _ = self.shutdown.send(true);
        if let Err(err) = self.realtime.disconnect().await {
            warn!(error = %err, "fast store disconnect failed");
        }
        if let Err(err) = self.audit.disconnect().await {
            warn!(error = %err, "durable store disconnect failed");
        }
        info!("coordination bridge stopped");
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.bus.subscribe()
    }

    pub fn subscribe_workspace(&self, workspace_id: impl Into<String>) -> WorkspaceEventReceiver {
        self.bus.subscribe_workspace(workspace_id)
    }

    pub fn health(&self) -> HealthReport {
        self.supervisor.report()
    }

    /// Clear a terminal reconnect failure so the supervisor may try again.
    pub fn reset_backend(&self, kind: BackendKind) {
        self.supervisor.reset(kind);
        match kind {
            BackendKind::Redis => self.supervisor.maybe_reconnect(Arc::clone(&self.realtime)),
            BackendKind::Kafka => self.supervisor.maybe_reconnect(Arc::clone(&self.audit)),
        }
    }

    /// Request a read/write/exclusive lock. `None` means contention: on the
    /// fast-store path the request is queued and the caller retries on the
    /// matching `lock_retry` event; on the fallback path the caller simply
    /// retries later.
    pub async fn request_file_lock(
        &self,
        agent_id: &str,
        workspace_id: &str,
        file_path: &str,
        kind: LockKind,
        session_id: Option<String>,
    ) -> Option<LockId> {
        let kind = self.effective_kind(kind);
        let lock = if !self.config.security.enable_file_locking {
            // Locking disabled: grant without coordinating.
            Some(LockId::exclusive(workspace_id, file_path))
        } else if self.realtime.is_connected() {
            match self
                .realtime
                .request_file_lock(agent_id, workspace_id, file_path, kind)
                .await
            {
                Ok(lock) => lock,
                Err(err) => {
                    warn!(error = %err, "fast store lock request failed, using fallback");
                    self.fallback_request(agent_id, workspace_id, file_path, kind)
                }
            }
        } else {
            self.fallback_request(agent_id, workspace_id, file_path, kind)
        };

        if lock.is_some() && self.config.security.enable_edit_history {
            let session = self.session_or_new(session_id);
            let entry =
                FileEditEntry::update().with_reason(format!("Lock acquired: {}", kind.as_str()));
            if let Err(err) = self
                .audit
                .log_file_edit(agent_id, workspace_id, &session, file_path, entry)
                .await
            {
                debug!(error = %err, "lock acquisition not audited");
            }
        }

        self.emit_operation(
            OperationKind::RequestFileLock,
            agent_id,
            workspace_id,
            serde_json::json!({
                "file_path": file_path,
                "lock_type": kind.as_str(),
                "granted": lock.is_some(),
            }),
            true,
            true,
        );
        lock
    }

    /// Release a held lock. `false` means the caller was not the holder.
    pub async fn release_file_lock(
        &self,
        lock_id: &LockId,
        agent_id: &str,
        session_id: Option<String>,
    ) -> bool {
        let claim = lock_id.decode();
        let workspace_id = claim
            .as_ref()
            .map(|c| c.workspace_id.clone())
            .unwrap_or_default();

        let released = if !self.config.security.enable_file_locking {
            true
        } else if self.realtime.is_connected() {
            match self.realtime.release_file_lock(lock_id, agent_id).await {
                Ok(released) => released,
                Err(err) => {
                    warn!(error = %err, "fast store release failed, trying fallback");
                    self.fallback_release(lock_id, agent_id)
                }
            }
        } else {
            self.fallback_release(lock_id, agent_id)
        };

        if released && self.config.security.enable_edit_history {
            if let Some(claim) = &claim {
                let session = self.session_or_new(session_id);
                let entry = FileEditEntry::update().with_reason("Lock released");
                if let Err(err) = self
                    .audit
                    .log_file_edit(
                        agent_id,
                        &claim.workspace_id,
                        &session,
                        &claim.file_path,
                        entry,
                    )
                    .await
                {
                    debug!(error = %err, "lock release not audited");
                }
            }
        }

        self.emit_operation(
            OperationKind::ReleaseFileLock,
            agent_id,
            &workspace_id,
            serde_json::json!({
                "lock_id": lock_id.as_str(),
                "released": released,
            }),
            true,
            true,
        );
        released
    }

    /// Publish a file edit on the real-time stream and the durable history.
    /// Best effort on each path; with the fast store down the edit is
    /// durable-only.
    pub async fn publish_file_edit(
        &self,
        agent_id: &str,
        workspace_id: &str,
        file_path: &str,
        entry: FileEditEntry,
        session_id: Option<String>,
    ) {
        let session = self.session_or_new(session_id);

        if self.realtime.is_connected() {
            if let Err(err) = self
                .realtime
                .publish_file_edit(
                    agent_id,
                    workspace_id,
                    Some(&session),
                    file_path,
                    entry.clone(),
                )
                .await
            {
                warn!(error = %err, "real-time edit publication failed");
            }
        } else {
            debug!("fast store down, edit recorded on durable path only");
        }

        if self.config.security.enable_edit_history {
            if let Err(err) = self
                .audit
                .log_file_edit(agent_id, workspace_id, &session, file_path, entry)
                .await
            {
                warn!(error = %err, "edit history append failed");
            }
        }

        self.emit_operation(
            OperationKind::PublishFileEdit,
            agent_id,
            workspace_id,
            serde_json::json!({"file_path": file_path}),
            true,
            true,
        );
    }

    /// Register an agent's presence. Returns `false` when the workspace is
    /// full or neither path accepted the registration.
    pub async fn register_agent(&self, agent: AgentRecord, session_id: Option<String>) -> bool {
        let workspace_id = agent.workspace_id.clone();
        let mut registered = false;

        if self.realtime.is_connected() {
            match self.realtime.list_workspace_agents(&workspace_id).await {
                Ok(existing) => {
                    let already = existing.iter().any(|a| a.agent_id == agent.agent_id);
                    if !already
                        && existing.len() >= self.config.workspace.max_agents_per_workspace
                    {
                        warn!(
                            workspace_id = %workspace_id,
                            agent_id = %agent.agent_id,
                            "workspace is at capacity, registration refused"
                        );
                        self.emit_operation(
                            OperationKind::RegisterAgent,
                            &agent.agent_id,
                            &workspace_id,
                            serde_json::json!({"accepted": false, "reason": "workspace_full"}),
                            true,
                            true,
                        );
                        return false;
                    }
                }
                Err(err) => warn!(error = %err, "could not check workspace capacity"),
            }
            match self.realtime.register_agent(agent.clone()).await {
                Ok(()) => registered = true,
                Err(err) => warn!(error = %err, "real-time registration failed"),
            }
        } else {
            debug!("fast store down, registration recorded on durable path only");
        }

        if self.config.security.enable_audit_logging {
            let session = self.session_or_new(session_id);
            let entry = CoordinationEntry::new(
                CoordinationKind::Synchronization,
                "agent_registration",
            );
            match self
                .audit
                .log_agent_coordination(&agent.agent_id, &workspace_id, &session, entry)
                .await
            {
                Ok(()) => registered = true,
                Err(err) => debug!(error = %err, "registration not audited"),
            }
        }

        self.emit_operation(
            OperationKind::RegisterAgent,
            &agent.agent_id,
            &workspace_id,
            serde_json::json!({"accepted": registered, "name": agent.name}),
            true,
            true,
        );
        registered
    }

    /// Update presence. Real-time only; dropped silently when the fast store
    /// is down.
    pub async fn update_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
        current_task: Option<String>,
    ) {
        if !self.realtime.is_connected() {
            debug!(agent_id, "fast store down, status update dropped");
            return;
        }
        let workspace_id = self
            .realtime
            .get_agent(agent_id)
            .await
            .ok()
            .flatten()
            .map(|agent| agent.workspace_id)
            .unwrap_or_default();

        if let Err(err) = self
            .realtime
            .update_agent_status(agent_id, status, current_task)
            .await
        {
            warn!(error = %err, "status update failed");
            return;
        }

        self.emit_operation(
            OperationKind::UpdateAgentStatus,
            agent_id,
            &workspace_id,
            serde_json::json!({"status": status.as_str()}),
            false,
            true,
        );
    }

    pub async fn get_agent(&self, agent_id: &str) -> Option<AgentRecord> {
        if !self.realtime.is_connected() {
            return None;
        }
        self.realtime.get_agent(agent_id).await.ok().flatten()
    }

    pub async fn list_workspace_agents(&self, workspace_id: &str) -> Vec<AgentRecord> {
        if !self.realtime.is_connected() {
            return Vec::new();
        }
        self.realtime
            .list_workspace_agents(workspace_id)
            .await
            .unwrap_or_default()
    }

    /// Cast a vote on the consensus stream. Real-time only; dropped silently
    /// when the fast store is down.
    pub async fn publish_consensus_vote(
        &self,
        agent_id: &str,
        workspace_id: &str,
        vote: ConsensusVote,
    ) {
        if !self.realtime.is_connected() {
            debug!(agent_id, "fast store down, consensus vote dropped");
            return;
        }
        let proposal_id = vote.proposal_id.clone();
        if let Err(err) = self
            .realtime
            .publish_consensus_vote(agent_id, workspace_id, vote)
            .await
        {
            warn!(error = %err, "consensus vote publication failed");
            return;
        }
        self.emit_operation(
            OperationKind::PublishConsensusVote,
            agent_id,
            workspace_id,
            serde_json::json!({"proposal_id": proposal_id}),
            false,
            true,
        );
    }

    /// Record a final consensus decision on the durable store.
    pub async fn log_consensus_decision(
        &self,
        agent_id: &str,
        workspace_id: &str,
        decision: ConsensusDecision,
        session_id: Option<String>,
    ) {
        let proposal_id = decision.proposal_id.clone();
        let session = self.session_or_new(session_id);
        if let Err(err) = self
            .audit
            .log_consensus_decision(agent_id, workspace_id, &session, decision)
            .await
        {
            warn!(error = %err, "consensus decision dropped");
        }
        self.emit_operation(
            OperationKind::LogConsensusDecision,
            agent_id,
            workspace_id,
            serde_json::json!({"proposal_id": proposal_id}),
            true,
            false,
        );
    }

    pub async fn log_agent_coordination(
        &self,
        agent_id: &str,
        workspace_id: &str,
        entry: CoordinationEntry,
        session_id: Option<String>,
    ) {
        let session = self.session_or_new(session_id);
        if let Err(err) = self
            .audit
            .log_agent_coordination(agent_id, workspace_id, &session, entry)
            .await
        {
            warn!(error = %err, "coordination entry dropped");
        }
        self.emit_operation(
            OperationKind::LogAgentCoordination,
            agent_id,
            workspace_id,
            serde_json::json!({}),
            true,
            false,
        );
    }

    pub async fn log_conflict_resolution(
        &self,
        agent_id: &str,
        workspace_id: &str,
        entry: ConflictEntry,
        session_id: Option<String>,
    ) {
        let conflict_id = entry.conflict_id.clone();
        let session = self.session_or_new(session_id);
        if let Err(err) = self
            .audit
            .log_conflict_resolution(agent_id, workspace_id, &session, entry)
            .await
        {
            warn!(error = %err, "conflict resolution entry dropped");
        }
        self.emit_operation(
            OperationKind::LogConflictResolution,
            agent_id,
            workspace_id,
            serde_json::json!({"conflict_id": conflict_id}),
            true,
            false,
        );
    }

    /// Persist a workspace snapshot. Durable only; dropped when the durable
    /// store is down.
    pub async fn save_workspace_snapshot(
        &self,
        agent_id: &str,
        workspace_id: &str,
        snapshot: WorkspaceSnapshot,
        session_id: Option<String>,
    ) {
        let session = self.session_or_new(session_id);
        if let Err(err) = self
            .audit
            .save_workspace_snapshot(agent_id, workspace_id, &session, snapshot)
            .await
        {
            warn!(error = %err, "workspace snapshot dropped");
        }
        self.emit_operation(
            OperationKind::SaveWorkspaceSnapshot,
            agent_id,
            workspace_id,
            serde_json::json!({}),
            true,
            false,
        );
    }

    pub async fn log_workspace_lifecycle(
        &self,
        agent_id: &str,
        workspace_id: &str,
        entry: WorkspaceLifecycleEntry,
        session_id: Option<String>,
    ) {
        let session = self.session_or_new(session_id);
        if let Err(err) = self
            .audit
            .log_workspace_lifecycle(agent_id, workspace_id, &session, entry)
            .await
        {
            warn!(error = %err, "workspace lifecycle entry dropped");
        }
        self.emit_operation(
            OperationKind::LogWorkspaceLifecycle,
            agent_id,
            workspace_id,
            serde_json::json!({}),
            true,
            false,
        );
    }

    /// Open a session on the durable store and return its id.
    pub async fn start_session(
        &self,
        agent_id: &str,
        workspace_id: &str,
        participants: Vec<String>,
    ) -> String {
        let session = self.session_or_new(None);
        if let Err(err) = self
            .audit
            .start_session(agent_id, workspace_id, &session, participants)
            .await
        {
            warn!(error = %err, "session start not recorded");
        }
        self.emit_operation(
            OperationKind::StartSession,
            agent_id,
            workspace_id,
            serde_json::json!({"session_id": session}),
            true,
            false,
        );
        session
    }

    pub async fn end_session(
        &self,
        agent_id: &str,
        workspace_id: &str,
        session_id: &str,
        reason: Option<String>,
    ) {
        if let Err(err) = self
            .audit
            .end_session(agent_id, workspace_id, session_id, reason)
            .await
        {
            warn!(error = %err, "session end not recorded");
        }
        self.emit_operation(
            OperationKind::EndSession,
            agent_id,
            workspace_id,
            serde_json::json!({"session_id": session_id}),
            true,
            false,
        );
    }

    fn effective_kind(&self, kind: LockKind) -> LockKind {
        if kind == LockKind::Read && !self.config.security.allow_concurrent_reads {
            LockKind::Exclusive
        } else {
            kind
        }
    }

    fn fallback_request(
        &self,
        agent_id: &str,
        workspace_id: &str,
        file_path: &str,
        kind: LockKind,
    ) -> Option<LockId> {
        match &self.fallback {
            Some(fallback) => fallback.request(agent_id, workspace_id, file_path, kind),
            None => {
                warn!("fast store down and fallback disabled, lock request refused");
                None
            }
        }
    }

    fn fallback_release(&self, lock_id: &LockId, agent_id: &str) -> bool {
        match &self.fallback {
            Some(fallback) => fallback.release(lock_id, agent_id),
            None => false,
        }
    }

    fn session_or_new(&self, session_id: Option<String>) -> String {
        session_id.unwrap_or_else(|| format!("session_{}", Uuid::new_v4()))
    }

    fn emit_operation(
        &self,
        kind: OperationKind,
        agent_id: &str,
        workspace_id: &str,
        data: serde_json::Value,
        requires_persistence: bool,
        requires_realtime: bool,
    ) {
        self.bus.publish(BrokerEvent::WorkspaceOperation {
            operation: WorkspaceOperation::new(
                kind,
                agent_id,
                workspace_id,
                data,
                requires_persistence,
                requires_realtime,
            ),
        });
    }

    /// Watch connection events and keep health and reconnects in step.
    fn spawn_supervision(&self) {
        let mut receiver = self.bus.subscribe();
        let supervisor = Arc::clone(&self.supervisor);
        let realtime = Arc::clone(&self.realtime);
        let audit = Arc::clone(&self.audit);

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(BrokerEvent::RedisConnected) => {
                        supervisor.mark_connected(BackendKind::Redis);
                    }
                    Ok(BrokerEvent::KafkaConnected) => {
                        supervisor.mark_connected(BackendKind::Kafka);
                    }
                    Ok(BrokerEvent::RedisDisconnected) => {
                        supervisor.record_failure(BackendKind::Redis, "disconnected");
                        supervisor.maybe_reconnect(Arc::clone(&realtime));
                    }
                    Ok(BrokerEvent::KafkaDisconnected) => {
                        supervisor.record_failure(BackendKind::Kafka, "disconnected");
                        supervisor.maybe_reconnect(Arc::clone(&audit));
                    }
                    Ok(BrokerEvent::RedisError { message }) => {
                        supervisor.record_failure(BackendKind::Redis, &message);
                        supervisor.maybe_reconnect(Arc::clone(&realtime));
                    }
                    Ok(BrokerEvent::KafkaError { message }) => {
                        supervisor.record_failure(BackendKind::Kafka, &message);
                        supervisor.maybe_reconnect(Arc::clone(&audit));
                    }
                    Ok(BrokerEvent::Shutdown) => break,
                    Ok(_) => {}
                    Err(EventBusError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
        });
    }
}
