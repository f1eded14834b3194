// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod bridge;
pub mod supervisor;

pub use bridge::CoordinationBridge;
pub use supervisor::HealthSupervisor;
