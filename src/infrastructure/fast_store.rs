// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Redis Coordinator - Real-Time Coordination Orchestrator
//!
//! Infrastructure adapter that implements the [`RealtimeStore`] port against
//! a Redis-family backend: distributed file locks, agent presence, stream
//! publication, and the stream consumer loops.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Responsibility:** Translate coordination operations to Redis
//!   commands and stream entries; re-emit consumed entries as broker events
//! - **Collaborators:**
//!   - EventBus: receives `redis_*`, `lock_retry`, and `redis_message` events
//!   - Domain: lock records, agent registry rows, envelope taxonomy
//!
//! # Persisted layout
//!
//! - `<prefix>:state:locks:<ws>:<path>` — lock record (JSON, PX expiry)
//! - `<prefix>:state:locks:<ws>:<path>:readers` — reader set
//! - `<prefix>:state:edit_queue:<ws>:<path>` — waiters queue (list)
//! - `<prefix>:state:agents:<agent_id>` — agent registry row (hash)
//! - `<prefix>:state:workspace:<ws>` — workspace membership (hash)
//! - `<prefix>:heartbeat:<consumer_name>` — consumer liveness (short TTL)
//! - `<prefix>:{locks,edits,agents,workspace,consensus}` — streams
//!
//! Lock expiry is enforced by the keys' own TTLs: a record the store still
//! serves is live, so acquirers never see an expired holder.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::domain::agent::{AgentRecord, AgentStatus};
use crate::domain::audit::FileEditEntry;
use crate::domain::config::RedisConfig;
use crate::domain::consensus::ConsensusVote;
use crate::domain::envelope::{Envelope, EnvelopeFactory, EnvelopeMetadata, MessageType, Priority};
use crate::domain::events::BrokerEvent;
use crate::domain::health::BackendKind;
use crate::domain::lock::{LockHolder, LockId, LockKind, LockRecord, LockWaiter};
use crate::domain::store::{RealtimeStore, Reconnectable, StoreError};
use crate::infrastructure::event_bus::EventBus;

/// Logical stream names under the configured prefix.
pub const STREAMS: [&str; 5] = ["locks", "edits", "agents", "workspace", "consensus"];

const CONSUMER_BLOCK_MS: usize = 500;
const CONSUMER_ERROR_BACKOFF_MS: u64 = 1_000;

/// Redis-backed implementation of the real-time coordination port.
pub struct RedisCoordinator {
    config: RedisConfig,
    bus: EventBus,
    factory: EnvelopeFactory,
    client: redis::Client,
    conn: Mutex<Option<ConnectionManager>>,
    connected: AtomicBool,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl RedisCoordinator {
    pub fn new(config: RedisConfig, bus: EventBus) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.url())
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self {
            config,
            bus,
            factory: EnvelopeFactory::new(),
            client,
            conn: Mutex::new(None),
            connected: AtomicBool::new(false),
            shutdown: Mutex::new(None),
        })
    }

    fn stream_key(&self, stream: &str) -> String {
        format!("{}:{}", self.config.stream_prefix, stream)
    }

    fn lock_key(&self, workspace_id: &str, file_path: &str) -> String {
        format!(
            "{}:state:locks:{}:{}",
            self.config.stream_prefix, workspace_id, file_path
        )
    }

    fn queue_key(&self, workspace_id: &str, file_path: &str) -> String {
        format!(
            "{}:state:edit_queue:{}:{}",
            self.config.stream_prefix, workspace_id, file_path
        )
    }

    fn agent_key(&self, agent_id: &str) -> String {
        format!("{}:state:agents:{}", self.config.stream_prefix, agent_id)
    }

    fn workspace_key(&self, workspace_id: &str) -> String {
        format!("{}:state:workspace:{}", self.config.stream_prefix, workspace_id)
    }

    fn command_conn(&self) -> Result<ConnectionManager, StoreError> {
        self.conn
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(StoreError::NotConnected)
    }

    /// Record a failed command: flip to disconnected and surface the first
    /// error so the supervisor starts a reconnect.
    fn fail(&self, err: redis::RedisError) -> StoreError {
        let message = err.to_string();
        error!(error = %message, "redis command failed");
        if self.connected.swap(false, Ordering::SeqCst) {
            self.bus.publish(BrokerEvent::RedisError {
                message: message.clone(),
            });
        }
        StoreError::Backend(message)
    }

    async fn ensure_consumer_groups(
        &self,
        conn: &mut ConnectionManager,
    ) -> Result<(), StoreError> {
        for stream in STREAMS {
            let key = self.stream_key(stream);
            let created: redis::RedisResult<String> = conn
                .xgroup_create_mkstream(&key, &self.config.consumer_group, "$")
                .await;
            if let Err(err) = created {
                // The group surviving a restart is the normal case.
                if err.code() != Some("BUSYGROUP") {
                    return Err(StoreError::Backend(err.to_string()));
                }
            }
        }
        Ok(())
    }

    fn spawn_consumer_loops(&self, shutdown: watch::Receiver<bool>) {
        for stream in STREAMS {
            let client = self.client.clone();
            let bus = self.bus.clone();
            let key = self.stream_key(stream);
            let group = self.config.consumer_group.clone();
            let consumer = self.config.consumer_name.clone();
            let count = self.config.max_pending_messages;
            let mut shutdown = shutdown.clone();

            tokio::spawn(async move {
                let mut conn = match client.get_connection_manager().await {
                    Ok(conn) => conn,
                    Err(err) => {
                        warn!(stream, error = %err, "stream consumer could not connect");
                        return;
                    }
                };
                let options = StreamReadOptions::default()
                    .group(&group, &consumer)
                    .count(count)
                    .block(CONSUMER_BLOCK_MS);
                let keys = [key.clone()];
                let ids = [">"];
                info!(stream, "stream consumer started");

                loop {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                        read = conn.xread_options::<_, _, StreamReadReply>(
                            &keys,
                            &ids,
                            &options,
                        ) => {
                            match read {
                                Ok(reply) => {
                                    for stream_key in reply.keys {
                                        for entry in stream_key.ids {
                                            match envelope_from_entry(&entry.map) {
                                                Ok(envelope) => {
                                                    bus.publish(BrokerEvent::RedisMessage {
                                                        stream: stream.to_string(),
                                                        envelope,
                                                    });
                                                }
                                                Err(err) => {
                                                    // Malformed entries are logged,
                                                    // acknowledged, and dropped; the
                                                    // loop survives.
                                                    warn!(
                                                        stream,
                                                        entry = %entry.id,
                                                        error = %err,
                                                        "dropping malformed stream entry"
                                                    );
                                                }
                                            }
                                            let acked: redis::RedisResult<i64> = conn
                                                .xack(&key, &group, &[entry.id.as_str()])
                                                .await;
                                            if let Err(err) = acked {
                                                warn!(stream, error = %err, "xack failed");
                                            }
                                        }
                                    }
                                }
                                Err(err) => {
                                    warn!(stream, error = %err, "stream read failed");
                                    tokio::time::sleep(std::time::Duration::from_millis(
                                        CONSUMER_ERROR_BACKOFF_MS,
                                    ))
                                    .await;
                                }
                            }
                        }
                    }
                }
                info!(stream, "stream consumer stopped");
            });
        }
    }

    fn spawn_heartbeat(&self, mut shutdown: watch::Receiver<bool>) {
        let client = self.client.clone();
        let key = format!(
            "{}:heartbeat:{}",
            self.config.stream_prefix, self.config.consumer_name
        );
        let interval_ms = self.config.heartbeat_interval_ms;
        // The key outliving two missed beats means the consumer is stuck.
        let ttl_secs = (interval_ms * 3 / 1000).max(1);

        tokio::spawn(async move {
            let mut conn = match client.get_connection_manager().await {
                Ok(conn) => conn,
                Err(err) => {
                    warn!(error = %err, "heartbeat task could not connect");
                    return;
                }
            };
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_millis(interval_ms.max(1)));
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let beat: redis::RedisResult<()> = conn
                            .set_ex(&key, Utc::now().to_rfc3339(), ttl_secs)
                            .await;
                        if let Err(err) = beat {
                            debug!(error = %err, "heartbeat write failed");
                        }
                    }
                }
            }
        });
    }

    async fn publish_envelope(&self, stream: &str, envelope: &Envelope) -> Result<(), StoreError> {
        let mut conn = self.command_conn()?;
        let raw = serde_json::to_string(envelope)?;
        // Headers duplicate type/agent/correlation for index-free filtering.
        let mut fields: Vec<(&str, String)> = vec![
            ("envelope", raw),
            ("type", envelope.message_type.as_str().to_string()),
            ("agent_id", envelope.metadata.agent_id.clone()),
        ];
        if let Some(correlation_id) = &envelope.metadata.correlation_id {
            fields.push(("correlation_id", correlation_id.clone()));
        }
        let key = self.stream_key(stream);
        let _entry_id: String = conn
            .xadd(&key, "*", &fields)
            .await
            .map_err(|e| self.fail(e))?;
        Ok(())
    }

    async fn publish_lock_event(
        &self,
        event_type: &str,
        agent_id: &str,
        workspace_id: &str,
        file_path: &str,
        kind: LockKind,
        lock_id: &LockId,
    ) -> Result<(), StoreError> {
        let mut metadata = EnvelopeMetadata::new(agent_id, workspace_id);
        metadata.file_path = Some(file_path.to_string());
        metadata.lock_type = Some(kind);
        let envelope = self.factory.envelope(
            MessageType::FileLock,
            Priority::High,
            serde_json::json!({
                "eventType": event_type,
                "lockId": lock_id.as_str(),
                "filePath": file_path,
                "lockType": kind.as_str(),
            }),
            metadata,
        );
        self.publish_envelope("locks", &envelope).await
    }

    async fn enqueue_waiter(
        &self,
        conn: &mut ConnectionManager,
        workspace_id: &str,
        file_path: &str,
        agent_id: &str,
        kind: LockKind,
    ) -> Result<Option<LockId>, StoreError> {
        let queue = self.queue_key(workspace_id, file_path);
        let depth: usize = conn.llen(&queue).await.map_err(|e| self.fail(e))?;
        if depth >= self.config.max_pending_messages {
            warn!(
                workspace_id,
                file_path,
                agent_id,
                depth,
                "waiters queue full, dropping lock request"
            );
            return Ok(None);
        }
        let waiter = LockWaiter::new(agent_id, kind);
        let _depth: i64 = conn
            .rpush(&queue, serde_json::to_string(&waiter)?)
            .await
            .map_err(|e| self.fail(e))?;
        Ok(None)
    }

    /// Drain one waiter and signal it. Exactly one per release, FIFO.
    async fn wake_next_waiter(
        &self,
        conn: &mut ConnectionManager,
        workspace_id: &str,
        file_path: &str,
    ) {
        let queue = self.queue_key(workspace_id, file_path);
        let popped: redis::RedisResult<Option<String>> = conn.lpop(&queue, None).await;
        match popped {
            Ok(Some(raw)) => match serde_json::from_str::<LockWaiter>(&raw) {
                Ok(waiter) => {
                    self.bus.publish(BrokerEvent::LockRetry {
                        workspace_id: workspace_id.to_string(),
                        file_path: file_path.to_string(),
                        waiter,
                    });
                }
                Err(err) => warn!(error = %err, "dropping malformed waiter entry"),
            },
            Ok(None) => {}
            Err(err) => warn!(error = %err, "waiters queue drain failed"),
        }
    }

    async fn release_reader(
        &self,
        conn: &mut ConnectionManager,
        workspace_id: &str,
        file_path: &str,
        agent_id: &str,
    ) -> Result<bool, StoreError> {
        let base = self.lock_key(workspace_id, file_path);
        let readers = format!("{base}:readers");

        let removed: i64 = conn.srem(&readers, agent_id).await.map_err(|e| self.fail(e))?;
        if removed == 0 {
            return Ok(false);
        }
        let remaining: i64 = conn.scard(&readers).await.map_err(|e| self.fail(e))?;
        if remaining == 0 {
            let _: i64 = conn
                .del(&[readers.as_str(), base.as_str()][..])
                .await
                .map_err(|e| self.fail(e))?;
        }
        Ok(true)
    }

    /// Returns the stored lock kind when the caller held the lock.
    async fn release_exclusive(
        &self,
        conn: &mut ConnectionManager,
        workspace_id: &str,
        file_path: &str,
        agent_id: &str,
    ) -> Result<Option<LockKind>, StoreError> {
        let base = self.lock_key(workspace_id, file_path);
        let existing: Option<String> = conn.get(&base).await.map_err(|e| self.fail(e))?;
        let Some(raw) = existing else {
            return Ok(None);
        };
        let Ok(record) = serde_json::from_str::<LockRecord>(&raw) else {
            return Ok(None);
        };
        match record.holder {
            LockHolder::Exclusive { agent_id: holder } if holder == agent_id => {
                let _: i64 = conn.del(&base).await.map_err(|e| self.fail(e))?;
                Ok(Some(record.lock_type))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl Reconnectable for RedisCoordinator {
    fn service(&self) -> BackendKind {
        BackendKind::Redis
    }

    async fn reconnect(&self) -> Result<(), StoreError> {
        self.connect().await
    }
}

#[async_trait]
impl RealtimeStore for RedisCoordinator {
    async fn connect(&self) -> Result<(), StoreError> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut manager = self
            .client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let _pong: String = redis::cmd("PING")
            .query_async(&mut manager)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.ensure_consumer_groups(&mut manager).await?;

        *self.conn.lock().unwrap_or_else(|e| e.into_inner()) = Some(manager);

        let (tx, rx) = watch::channel(false);
        if let Some(previous) = self
            .shutdown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(tx)
        {
            // Stop loops from an earlier connect before starting fresh ones.
            let _ = previous.send(true);
        }
        self.spawn_consumer_loops(rx.clone());
        self.spawn_heartbeat(rx);

        self.connected.store(true, Ordering::SeqCst);
        info!(host = %self.config.host, port = self.config.port, "redis connected");
        self.bus.publish(BrokerEvent::RedisConnected);
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
        *self.conn.lock().unwrap_or_else(|e| e.into_inner()) = None;
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("redis disconnected");
            self.bus.publish(BrokerEvent::RedisDisconnected);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn register_agent(&self, agent: AgentRecord) -> Result<(), StoreError> {
        let mut conn = self.command_conn()?;
        let key = self.agent_key(&agent.agent_id);
        let capabilities = serde_json::to_string(&agent.capabilities)?;
        let mut fields: Vec<(&str, String)> = vec![
            ("agent_id", agent.agent_id.clone()),
            ("name", agent.name.clone()),
            ("model", agent.model.clone()),
            ("capabilities", capabilities),
            ("workspace_id", agent.workspace_id.clone()),
            ("status", agent.status.as_str().to_string()),
            ("registered_at", agent.registered_at.to_rfc3339()),
            ("last_heartbeat", agent.last_heartbeat.to_rfc3339()),
        ];
        if let Some(task) = &agent.current_task {
            fields.push(("current_task", task.clone()));
        }
        let _: () = conn
            .hset_multiple(&key, &fields)
            .await
            .map_err(|e| self.fail(e))?;
        let _: i64 = conn
            .hset(
                self.workspace_key(&agent.workspace_id),
                &agent.agent_id,
                Utc::now().to_rfc3339(),
            )
            .await
            .map_err(|e| self.fail(e))?;

        let envelope = self.factory.envelope(
            MessageType::AgentStatus,
            Priority::Medium,
            serde_json::json!({
                "eventType": "agent_registered",
                "name": agent.name,
                "model": agent.model,
                "capabilities": agent.capabilities,
                "status": agent.status.as_str(),
            }),
            EnvelopeMetadata::new(&agent.agent_id, &agent.workspace_id),
        );
        self.publish_envelope("agents", &envelope).await
    }

    async fn update_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
        current_task: Option<String>,
    ) -> Result<(), StoreError> {
        let mut conn = self.command_conn()?;
        let key = self.agent_key(agent_id);
        let workspace_id: Option<String> = conn
            .hget(&key, "workspace_id")
            .await
            .map_err(|e| self.fail(e))?;
        let Some(workspace_id) = workspace_id else {
            debug!(agent_id, "status update for unregistered agent dropped");
            return Ok(());
        };

        let mut fields: Vec<(&str, String)> = vec![
            ("status", status.as_str().to_string()),
            ("last_heartbeat", Utc::now().to_rfc3339()),
        ];
        if let Some(task) = &current_task {
            fields.push(("current_task", task.clone()));
        }
        let _: () = conn
            .hset_multiple(&key, &fields)
            .await
            .map_err(|e| self.fail(e))?;
        if current_task.is_none() {
            let _: i64 = conn
                .hdel(&key, "current_task")
                .await
                .map_err(|e| self.fail(e))?;
        }

        let envelope = self.factory.envelope(
            MessageType::AgentStatus,
            Priority::Medium,
            serde_json::json!({
                "eventType": "status_changed",
                "status": status.as_str(),
                "currentTask": current_task,
            }),
            EnvelopeMetadata::new(agent_id, &workspace_id),
        );
        self.publish_envelope("agents", &envelope).await
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>, StoreError> {
        let mut conn = self.command_conn()?;
        let fields: HashMap<String, String> = conn
            .hgetall(self.agent_key(agent_id))
            .await
            .map_err(|e| self.fail(e))?;
        if fields.is_empty() {
            return Ok(None);
        }
        agent_from_fields(&fields).map(Some)
    }

    async fn list_workspace_agents(
        &self,
        workspace_id: &str,
    ) -> Result<Vec<AgentRecord>, StoreError> {
        let mut conn = self.command_conn()?;
        let members: Vec<String> = conn
            .hkeys(self.workspace_key(workspace_id))
            .await
            .map_err(|e| self.fail(e))?;
        let mut agents = Vec::with_capacity(members.len());
        for agent_id in members {
            if let Some(agent) = self.get_agent(&agent_id).await? {
                agents.push(agent);
            }
        }
        Ok(agents)
    }

    async fn request_file_lock(
        &self,
        agent_id: &str,
        workspace_id: &str,
        file_path: &str,
        kind: LockKind,
    ) -> Result<Option<LockId>, StoreError> {
        let mut conn = self.command_conn()?;
        let base = self.lock_key(workspace_id, file_path);
        let readers = format!("{base}:readers");
        let ttl_ms = self.config.lock_timeout_ms;

        let existing: Option<String> = conn.get(&base).await.map_err(|e| self.fail(e))?;
        // An unparseable record is treated as absent; the store's own TTL
        // already hides expired ones.
        let record = existing.and_then(|raw| serde_json::from_str::<LockRecord>(&raw).ok());

        match record {
            None => {
                if kind == LockKind::Read {
                    // Reads join only an existing readers record; on an empty
                    // key the first waiter is served, not a newcomer.
                    let depth: usize = conn
                        .llen(self.queue_key(workspace_id, file_path))
                        .await
                        .map_err(|e| self.fail(e))?;
                    if depth > 0 {
                        return self
                            .enqueue_waiter(&mut conn, workspace_id, file_path, agent_id, kind)
                            .await;
                    }
                }

                let new_record = if kind.is_write() {
                    LockRecord::exclusive(agent_id, kind, ttl_ms)
                } else {
                    LockRecord::readers(ttl_ms)
                };
                let installed: Option<String> = redis::cmd("SET")
                    .arg(&base)
                    .arg(serde_json::to_string(&new_record)?)
                    .arg("PX")
                    .arg(ttl_ms)
                    .arg("NX")
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| self.fail(e))?;
                if installed.is_none() {
                    // Lost the install race. Concurrent readers still share:
                    // if the winner installed a readers record, join it.
                    if kind == LockKind::Read {
                        let winner: Option<String> =
                            conn.get(&base).await.map_err(|e| self.fail(e))?;
                        let winner =
                            winner.and_then(|raw| serde_json::from_str::<LockRecord>(&raw).ok());
                        if winner.is_some_and(|r| matches!(r.holder, LockHolder::Readers)) {
                            let _: i64 =
                                conn.sadd(&readers, agent_id).await.map_err(|e| self.fail(e))?;
                            let _: bool = conn
                                .pexpire(&readers, ttl_ms as i64)
                                .await
                                .map_err(|e| self.fail(e))?;
                            let lock_id = LockId::reader(workspace_id, file_path, agent_id);
                            self.publish_lock_event(
                                "lock_acquired",
                                agent_id,
                                workspace_id,
                                file_path,
                                kind,
                                &lock_id,
                            )
                            .await?;
                            return Ok(Some(lock_id));
                        }
                    }
                    return self
                        .enqueue_waiter(&mut conn, workspace_id, file_path, agent_id, kind)
                        .await;
                }

                let lock_id = if kind.is_write() {
                    LockId::exclusive(workspace_id, file_path)
                } else {
                    let _: i64 = conn.sadd(&readers, agent_id).await.map_err(|e| self.fail(e))?;
                    let _: bool = conn
                        .pexpire(&readers, ttl_ms as i64)
                        .await
                        .map_err(|e| self.fail(e))?;
                    LockId::reader(workspace_id, file_path, agent_id)
                };
                self.publish_lock_event(
                    "lock_acquired",
                    agent_id,
                    workspace_id,
                    file_path,
                    kind,
                    &lock_id,
                )
                .await?;
                Ok(Some(lock_id))
            }
            Some(record)
                if matches!(record.holder, LockHolder::Readers) && kind == LockKind::Read =>
            {
                // Shared join; re-entrant readers land here too.
                let _: i64 = conn.sadd(&readers, agent_id).await.map_err(|e| self.fail(e))?;
                let _: bool = conn
                    .pexpire(&readers, ttl_ms as i64)
                    .await
                    .map_err(|e| self.fail(e))?;
                let _: bool = conn
                    .pexpire(&base, ttl_ms as i64)
                    .await
                    .map_err(|e| self.fail(e))?;
                let lock_id = LockId::reader(workspace_id, file_path, agent_id);
                self.publish_lock_event(
                    "lock_acquired",
                    agent_id,
                    workspace_id,
                    file_path,
                    kind,
                    &lock_id,
                )
                .await?;
                Ok(Some(lock_id))
            }
            Some(_) => {
                self.enqueue_waiter(&mut conn, workspace_id, file_path, agent_id, kind)
                    .await
            }
        }
    }

    async fn release_file_lock(
        &self,
        lock_id: &LockId,
        agent_id: &str,
    ) -> Result<bool, StoreError> {
        let Some(claim) = lock_id.decode() else {
            return Ok(false);
        };
        let mut conn = self.command_conn()?;

        let released = match &claim.reader {
            Some(reader) => {
                // A reader token releases only its own slot.
                if reader == agent_id
                    && self
                        .release_reader(&mut conn, &claim.workspace_id, &claim.file_path, agent_id)
                        .await?
                {
                    Some(LockKind::Read)
                } else {
                    None
                }
            }
            None => {
                self.release_exclusive(&mut conn, &claim.workspace_id, &claim.file_path, agent_id)
                    .await?
            }
        };
        let Some(kind) = released else {
            return Ok(false);
        };
        self.publish_lock_event(
            "lock_released",
            agent_id,
            &claim.workspace_id,
            &claim.file_path,
            kind,
            lock_id,
        )
        .await?;
        self.wake_next_waiter(&mut conn, &claim.workspace_id, &claim.file_path)
            .await;
        Ok(true)
    }

    async fn publish_file_edit(
        &self,
        agent_id: &str,
        workspace_id: &str,
        session_id: Option<&str>,
        file_path: &str,
        entry: FileEditEntry,
    ) -> Result<(), StoreError> {
        let mut payload = serde_json::to_value(&entry)?;
        if let serde_json::Value::Object(map) = &mut payload {
            map.insert("file_path".to_string(), file_path.into());
        }
        let mut metadata = EnvelopeMetadata::new(agent_id, workspace_id);
        metadata.session_id = session_id.map(str::to_string);
        metadata.file_path = Some(file_path.to_string());
        let envelope =
            self.factory
                .envelope(MessageType::FileEdit, Priority::High, payload, metadata);
        self.publish_envelope("edits", &envelope).await
    }

    async fn publish_consensus_vote(
        &self,
        agent_id: &str,
        workspace_id: &str,
        vote: ConsensusVote,
    ) -> Result<(), StoreError> {
        let mut metadata = EnvelopeMetadata::new(agent_id, workspace_id);
        metadata.correlation_id = Some(format!("consensus_{}", vote.proposal_id));
        metadata.consensus_round = Some(crate::domain::consensus::round_from_proposal_id(
            &vote.proposal_id,
        ));
        let payload = serde_json::to_value(&vote)?;
        let envelope = self.factory.envelope(
            MessageType::ConsensusVote,
            Priority::High,
            payload,
            metadata,
        );
        self.publish_envelope("consensus", &envelope).await
    }
}

/// Decode one stream entry back into an envelope.
fn envelope_from_entry(map: &HashMap<String, redis::Value>) -> Result<Envelope, StoreError> {
    let value = map
        .get("envelope")
        .ok_or_else(|| StoreError::Malformed("stream entry missing envelope field".to_string()))?;
    let raw: String =
        redis::from_redis_value(value).map_err(|e| StoreError::Malformed(e.to_string()))?;
    Ok(serde_json::from_str(&raw)?)
}

fn agent_from_fields(fields: &HashMap<String, String>) -> Result<AgentRecord, StoreError> {
    let field = |name: &str| -> Result<&String, StoreError> {
        fields
            .get(name)
            .ok_or_else(|| StoreError::Malformed(format!("agent record missing {name}")))
    };
    let timestamp = |name: &str| -> Result<DateTime<Utc>, StoreError> {
        DateTime::parse_from_rfc3339(field(name)?)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StoreError::Malformed(format!("agent record {name}: {e}")))
    };

    Ok(AgentRecord {
        agent_id: field("agent_id")?.clone(),
        name: field("name")?.clone(),
        model: field("model")?.clone(),
        capabilities: serde_json::from_str(field("capabilities")?)?,
        workspace_id: field("workspace_id")?.clone(),
        status: AgentStatus::parse(field("status")?)
            .ok_or_else(|| StoreError::Malformed("agent record has unknown status".to_string()))?,
        current_task: fields.get("current_task").cloned(),
        registered_at: timestamp("registered_at")?,
        last_heartbeat: timestamp("last_heartbeat")?,
    })
}
