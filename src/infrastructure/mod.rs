// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod durable_store;
pub mod event_bus;
pub mod fallback_locks;
pub mod fast_store;

pub use durable_store::KafkaAuditLog;
pub use event_bus::{EventBus, EventBusError, EventReceiver, WorkspaceEventReceiver};
pub use fallback_locks::FallbackLockManager;
pub use fast_store::RedisCoordinator;
