// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod agent;
pub mod audit;
pub mod config;
pub mod consensus;
pub mod envelope;
pub mod events;
pub mod health;
pub mod lock;
pub mod store;

pub use agent::{AgentRecord, AgentStatus};
pub use audit::{
    ConflictEntry, CoordinationEntry, CoordinationKind, EditOperation, FileEditEntry,
    LifecycleEvent, WorkspaceLifecycleEntry, WorkspaceSnapshot,
};
pub use config::{BrokerConfig, ConfigError, FallbackMode};
pub use consensus::{
    round_from_proposal_id, tally_votes, ConsensusDecision, ConsensusMethod, ConsensusOutcome,
    ConsensusTally, ConsensusVote, Decision, Vote, VoteChoice,
};
pub use envelope::{Envelope, EnvelopeFactory, EnvelopeMetadata, MessageType, Priority};
pub use events::{BrokerEvent, OperationKind, WorkspaceOperation};
pub use health::{BackendHealth, BackendKind, HealthReport, OverallHealth};
pub use lock::{LockClaim, LockId, LockKind, LockRecord, LockWaiter};
pub use store::{AuditLog, RealtimeStore, Reconnectable, StoreError};
