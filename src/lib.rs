// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Concord — coordination broker for multi-agent collaborative workspaces.
//!
//! Multiple agents (external processes with stable ids) share a logical
//! workspace: they register presence, acquire distributed read/write locks on
//! named files, publish edits, cast consensus votes, and persist workspace
//! snapshots. The broker pairs a low-latency Redis state/stream store with a
//! durable Kafka audit log and keeps working when either backend is down.
//!
//! # Architecture
//!
//! - **Layer: domain** — envelope taxonomy, lock records, agent registry
//!   types, health status, consensus tally, configuration, store ports
//! - **Layer: application** — the coordination bridge (public API) and the
//!   health/reconnect supervisor
//! - **Layer: infrastructure** — event bus, Redis coordinator, Kafka audit
//!   log, in-process fallback lock manager

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
