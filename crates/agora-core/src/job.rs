use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::money::Credits;
use crate::types::{AgentId, JobId, ListingId, Timestamp};

// ── Status ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Proposed,
    Negotiating,
    Agreed,
    Funded,
    InProgress,
    Delivered,
    Verifying,
    Completed,
    Failed,
    Disputed,
    Resolved,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Proposed => "proposed",
            JobStatus::Negotiating => "negotiating",
            JobStatus::Agreed => "agreed",
            JobStatus::Funded => "funded",
            JobStatus::InProgress => "in_progress",
            JobStatus::Delivered => "delivered",
            JobStatus::Verifying => "verifying",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Disputed => "disputed",
            JobStatus::Resolved => "resolved",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// States in which a delivery deadline still matters.
    pub fn deadline_applies(&self) -> bool {
        matches!(
            self,
            JobStatus::Funded | JobStatus::InProgress | JobStatus::Delivered
        )
    }

    /// States a review may be written in.
    pub fn reviewable(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Resolved
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The allowed sinks for each source state.
pub fn allowed_transitions(from: JobStatus) -> &'static [JobStatus] {
    use JobStatus::*;
    match from {
        Proposed => &[Negotiating, Agreed, Cancelled],
        Negotiating => &[Agreed, Cancelled],
        Agreed => &[Funded, Cancelled],
        Funded => &[InProgress],
        InProgress => &[Delivered, Failed],
        Delivered => &[Verifying, Failed, Completed],
        Verifying => &[Completed, Failed],
        Failed => &[Disputed],
        Disputed => &[Resolved],
        Completed | Resolved | Cancelled => &[],
    }
}

pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

// ── Negotiation log ──────────────────────────────────────────────────────────

/// One entry of the append-only negotiation log. Tagged per entry kind with
/// a typed payload rather than a free-form map.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NegotiationEntry {
    Proposal {
        round: u32,
        proposer: AgentId,
        proposed_price: Credits,
        requirements: Option<Value>,
        acceptance_criteria: Option<Value>,
        acceptance_criteria_hash: Option<String>,
        timestamp: Timestamp,
    },
    Counter {
        round: u32,
        proposer: AgentId,
        proposed_price: Credits,
        counter_terms: Option<Value>,
        accepted_terms: Option<Value>,
        message: Option<String>,
        timestamp: Timestamp,
    },
    Acceptance {
        by: AgentId,
        agreed_price: Credits,
        acceptance_criteria_hash: Option<String>,
        timestamp: Timestamp,
    },
}

// ── Job ──────────────────────────────────────────────────────────────────────

/// The central lifecycle entity: one negotiated unit of work between a client
/// and a seller.
///
/// Invariants: `client != seller`; `current_round <= max_rounds`;
/// `acceptance_criteria_hash` is the SHA-256 of the canonical serialization
/// of `acceptance_criteria`; `result` is surfaced only when
/// `status == Completed`; at most one escrow ever exists for the job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub client: AgentId,
    pub seller: AgentId,
    pub listing_id: Option<ListingId>,
    pub status: JobStatus,
    pub acceptance_criteria: Option<Value>,
    pub acceptance_criteria_hash: Option<String>,
    pub requirements: Option<Value>,
    pub agreed_price: Credits,
    pub delivery_deadline: Option<Timestamp>,
    pub negotiation_log: Vec<NegotiationEntry>,
    pub max_rounds: u32,
    pub current_round: u32,
    pub result: Option<Value>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    pub fn is_party(&self, agent: AgentId) -> bool {
        self.client == agent || self.seller == agent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_sinks() {
        assert!(allowed_transitions(JobStatus::Completed).is_empty());
        assert!(allowed_transitions(JobStatus::Resolved).is_empty());
        assert!(allowed_transitions(JobStatus::Cancelled).is_empty());
    }

    #[test]
    fn table_matches_design() {
        use JobStatus::*;
        assert!(can_transition(Proposed, Negotiating));
        assert!(can_transition(Proposed, Agreed));
        assert!(can_transition(Agreed, Funded));
        assert!(can_transition(Funded, InProgress));
        assert!(can_transition(InProgress, Delivered));
        assert!(can_transition(Delivered, Verifying));
        assert!(can_transition(Verifying, Completed));
        assert!(can_transition(Failed, Disputed));
        assert!(can_transition(Disputed, Resolved));

        assert!(!can_transition(Funded, Delivered));
        assert!(!can_transition(Proposed, Funded));
        assert!(!can_transition(Completed, Failed));
        assert!(!can_transition(Cancelled, Proposed));
    }

    #[test]
    fn every_nonterminal_state_reaches_a_terminal() {
        use std::collections::HashSet;
        let all = [
            JobStatus::Proposed,
            JobStatus::Negotiating,
            JobStatus::Agreed,
            JobStatus::Funded,
            JobStatus::InProgress,
            JobStatus::Delivered,
            JobStatus::Verifying,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Disputed,
            JobStatus::Resolved,
            JobStatus::Cancelled,
        ];
        for start in all {
            let mut seen = HashSet::new();
            let mut stack = vec![start];
            let mut reaches_terminal = false;
            while let Some(s) = stack.pop() {
                if !seen.insert(s) {
                    continue;
                }
                let sinks = allowed_transitions(s);
                if sinks.is_empty() {
                    reaches_terminal = true;
                }
                stack.extend(sinks.iter().copied());
            }
            assert!(reaches_terminal, "{start} cannot reach a terminal state");
        }
    }

    #[test]
    fn status_serde_is_snake_case() {
        let json = serde_json::to_string(&JobStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}
