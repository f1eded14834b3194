// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Consensus votes, decisions, and the majority tally.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    Agree,
    Disagree,
    Abstain,
}

/// A single agent's vote on a proposal. Reasoning is carried for the audit
/// trail; the tally never looks at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub choice: VoteChoice,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl Vote {
    pub fn new(choice: VoteChoice) -> Self {
        Self {
            choice,
            reasoning: None,
        }
    }
}

/// Vote published on the fast store's consensus stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusVote {
    pub proposal_id: String,
    pub choice: VoteChoice,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusOutcome {
    Approved,
    Rejected,
    Deadlock,
}

/// Final decision recorded on the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusMethod {
    Majority,
    Weighted,
    Unanimous,
    Delegate,
}

/// Decision record appended to the consensus-decisions topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusDecision {
    pub proposal_id: String,
    pub description: String,
    pub votes: HashMap<String, Vote>,
    pub final_decision: Decision,
    pub method: ConsensusMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Result of [`tally_votes`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusTally {
    pub outcome: ConsensusOutcome,
    pub confidence: f64,
    pub agree: usize,
    pub disagree: usize,
    pub abstain: usize,
}

/// Majority tally over a vote map.
///
/// A side wins when it reaches at least half of all votes cast (abstentions
/// included) and strictly outnumbers the opposing side; confidence is the
/// winner's share of all votes, never below 0.5. Everything else, ties
/// included, is a deadlock at confidence 0.5.
pub fn tally_votes(votes: &HashMap<String, Vote>) -> ConsensusTally {
    let total = votes.len();
    let agree = votes
        .values()
        .filter(|v| v.choice == VoteChoice::Agree)
        .count();
    let disagree = votes
        .values()
        .filter(|v| v.choice == VoteChoice::Disagree)
        .count();
    let abstain = total - agree - disagree;

    let (outcome, confidence) = if total > 0 && agree * 2 >= total && agree > disagree {
        (ConsensusOutcome::Approved, agree as f64 / total as f64)
    } else if total > 0 && disagree * 2 >= total && disagree > agree {
        (ConsensusOutcome::Rejected, disagree as f64 / total as f64)
    } else {
        (ConsensusOutcome::Deadlock, 0.5)
    };

    ConsensusTally {
        outcome,
        confidence,
        agree,
        disagree,
        abstain,
    }
}

/// Extract the round number from a proposal id containing `round_<n>`;
/// defaults to 1 when no such marker is present.
pub fn round_from_proposal_id(proposal_id: &str) -> u32 {
    for (index, _) in proposal_id.match_indices("round_") {
        let digits: String = proposal_id[index + "round_".len()..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if !digits.is_empty() {
            if let Ok(round) = digits.parse() {
                return round;
            }
        }
    }
    1
}
