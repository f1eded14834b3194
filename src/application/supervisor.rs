// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Health and reconnect supervision.
//!
//! One state machine per backend: `connected -> disconnected -> reconnecting
//! -> (connected | failed)`. Reconnects back off linearly
//! (`reconnect_delay_ms * attempt`), are deduplicated per service, and stop
//! after `reconnect_attempts` consecutive failures until an external
//! [`HealthSupervisor::reset`]. The rollup is recomputed on every transition
//! and `health_changed` fires only when the overall level moves.

use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::domain::config::SupervisorConfig;
use crate::domain::events::BrokerEvent;
use crate::domain::health::{rollup, BackendHealth, BackendKind, HealthReport, OverallHealth};
use crate::domain::store::Reconnectable;
use crate::infrastructure::event_bus::EventBus;

#[derive(Default)]
struct BackendState {
    health: BackendHealth,
    reconnecting: bool,
    failed: bool,
}

struct SupervisorState {
    redis: BackendState,
    kafka: BackendState,
    overall: OverallHealth,
}

impl SupervisorState {
    fn backend_mut(&mut self, kind: BackendKind) -> &mut BackendState {
        match kind {
            BackendKind::Redis => &mut self.redis,
            BackendKind::Kafka => &mut self.kafka,
        }
    }

    /// Recompute the rollup; returns a report when the level moved.
    fn recompute(&mut self) -> Option<HealthReport> {
        let overall = rollup(self.redis.health.connected, self.kafka.health.connected);
        if overall == self.overall {
            return None;
        }
        self.overall = overall;
        Some(HealthReport {
            redis: self.redis.health.clone(),
            kafka: self.kafka.health.clone(),
            overall,
        })
    }
}

/// Watches connection events and drives bounded reconnect loops.
pub struct HealthSupervisor {
    config: SupervisorConfig,
    bus: EventBus,
    state: Mutex<SupervisorState>,
}

impl HealthSupervisor {
    pub fn new(config: SupervisorConfig, bus: EventBus) -> Self {
        Self {
            config,
            bus,
            state: Mutex::new(SupervisorState {
                redis: BackendState::default(),
                kafka: BackendState::default(),
                overall: OverallHealth::Offline,
            }),
        }
    }

    pub fn mark_connected(&self, kind: BackendKind) {
        let changed = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let backend = state.backend_mut(kind);
            backend.health.connected = true;
            backend.health.error_count = 0;
            backend.health.last_error = None;
            backend.health.last_health_check = Utc::now();
            backend.failed = false;
            state.recompute()
        };
        if let Some(report) = changed {
            self.bus.publish(BrokerEvent::HealthChanged { report });
        }
    }

    pub fn record_failure(&self, kind: BackendKind, message: &str) {
        let changed = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let backend = state.backend_mut(kind);
            backend.health.connected = false;
            backend.health.error_count += 1;
            backend.health.last_error = Some(message.to_string());
            backend.health.last_health_check = Utc::now();
            state.recompute()
        };
        if let Some(report) = changed {
            self.bus.publish(BrokerEvent::HealthChanged { report });
        }
    }

    /// Allow reconnect attempts again after a terminal `reconnect_failed`.
    pub fn reset(&self, kind: BackendKind) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let backend = state.backend_mut(kind);
        backend.failed = false;
        backend.health.error_count = 0;
    }

    pub fn overall(&self) -> OverallHealth {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).overall
    }

    pub fn report(&self) -> HealthReport {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        HealthReport {
            redis: state.redis.health.clone(),
            kafka: state.kafka.health.clone(),
            overall: state.overall,
        }
    }

    /// Start a reconnect loop for the target's service unless one is already
    /// in flight or the service is terminally failed.
    pub fn maybe_reconnect<T>(self: &Arc<Self>, target: Arc<T>)
    where
        T: Reconnectable + ?Sized + 'static,
    {
        let kind = target.service();
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let backend = state.backend_mut(kind);
            if backend.reconnecting || backend.failed {
                return;
            }
            backend.reconnecting = true;
        }

        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let attempts = supervisor.config.reconnect_attempts;
            let delay_ms = supervisor.config.reconnect_delay_ms;

            for attempt in 1..=attempts {
                tokio::time::sleep(Duration::from_millis(delay_ms * u64::from(attempt))).await;
                info!(service = %kind, attempt, "reconnect attempt");
                match target.reconnect().await {
                    Ok(()) => {
                        supervisor.end_reconnect(kind, false);
                        supervisor.mark_connected(kind);
                        info!(service = %kind, attempt, "reconnected");
                        return;
                    }
                    Err(err) => {
                        supervisor.bus.publish(BrokerEvent::ReconnectAttemptFailed {
                            service: kind,
                            attempt,
                            message: err.to_string(),
                        });
                    }
                }
            }

            warn!(service = %kind, attempts, "reconnect attempts exhausted");
            supervisor.end_reconnect(kind, true);
            supervisor.bus.publish(BrokerEvent::ReconnectFailed {
                service: kind,
                attempts,
            });
        });
    }

    fn end_reconnect(&self, kind: BackendKind, terminal: bool) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let backend = state.backend_mut(kind);
        backend.reconnecting = false;
        backend.failed = terminal;
    }

    /// Periodic timer that stamps `last_health_check`; authoritative state
    /// comes from connection events.
    pub fn start_health_timer(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let supervisor = Arc::clone(self);
        let interval_ms = self.config.health_check_interval_ms.max(1);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let mut state =
                            supervisor.state.lock().unwrap_or_else(|e| e.into_inner());
                        let now = Utc::now();
                        state.redis.health.last_health_check = now;
                        state.kafka.health.last_health_check = now;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor() -> Arc<HealthSupervisor> {
        Arc::new(HealthSupervisor::new(
            SupervisorConfig::default(),
            EventBus::new(64),
        ))
    }

    #[test]
    fn test_rollup_transitions() {
        let supervisor = supervisor();
        assert_eq!(supervisor.overall(), OverallHealth::Offline);

        supervisor.mark_connected(BackendKind::Redis);
        assert_eq!(supervisor.overall(), OverallHealth::Degraded);

        supervisor.mark_connected(BackendKind::Kafka);
        assert_eq!(supervisor.overall(), OverallHealth::Healthy);

        supervisor.record_failure(BackendKind::Redis, "gone");
        assert_eq!(supervisor.overall(), OverallHealth::Degraded);

        supervisor.record_failure(BackendKind::Kafka, "gone");
        assert_eq!(supervisor.overall(), OverallHealth::Offline);
    }

    #[test]
    fn test_failure_accumulates_and_connect_clears() {
        let supervisor = supervisor();
        supervisor.record_failure(BackendKind::Kafka, "first");
        supervisor.record_failure(BackendKind::Kafka, "second");

        let report = supervisor.report();
        assert_eq!(report.kafka.error_count, 2);
        assert_eq!(report.kafka.last_error.as_deref(), Some("second"));

        supervisor.mark_connected(BackendKind::Kafka);
        let report = supervisor.report();
        assert_eq!(report.kafka.error_count, 0);
        assert!(report.kafka.last_error.is_none());
    }

    #[tokio::test]
    async fn test_health_changed_fires_only_on_level_moves() {
        let bus = EventBus::new(64);
        let mut receiver = bus.subscribe();
        let supervisor = Arc::new(HealthSupervisor::new(SupervisorConfig::default(), bus));

        supervisor.mark_connected(BackendKind::Redis);
        // Same level again: no second event.
        supervisor.record_failure(BackendKind::Kafka, "still down");

        match receiver.recv().await.unwrap() {
            BrokerEvent::HealthChanged { report } => {
                assert_eq!(report.overall, OverallHealth::Degraded);
            }
            other => panic!("Expected health_changed, got {:?}", other),
        }
        assert!(receiver.try_recv().is_err());
    }
}
