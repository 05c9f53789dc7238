//! Tiered quorum evaluation with early exit.
//!
//! All threshold comparisons are exact integer arithmetic on the quorum
//! fraction. Floating point is never used: 2/3 is 2/3, not 0.6666.

use crate::types::{TierConfig, Vote, VoteDecision};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuorumOutcome {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteTally {
    pub approvals: u64,
    pub rejections: u64,
    pub eligible: u64,
}

impl VoteTally {
    pub fn from_votes(votes: &[Vote], eligible: u32) -> Self {
        let approvals = votes
            .iter()
            .filter(|v| v.decision == VoteDecision::Approve)
            .count() as u64;
        let rejections = votes
            .iter()
            .filter(|v| v.decision == VoteDecision::Reject)
            .count() as u64;

        Self {
            approvals,
            rejections,
            eligible: eligible as u64,
        }
    }

    pub fn cast(&self) -> u64 {
        self.approvals + self.rejections
    }
}

/// Decide the current state of a vote.
///
/// Approves as soon as `approvals / eligible` meets the tier threshold, even
/// with votes outstanding. Rejects as soon as approval is mathematically out
/// of reach: the best possible final tally assumes every uncast vote approves.
pub fn evaluate(cfg: &TierConfig, tally: &VoteTally) -> QuorumOutcome {
    let num = cfg.quorum_num as u64;
    let den = cfg.quorum_den as u64;

    if tally.eligible == 0 {
        return QuorumOutcome::Pending;
    }

    let remaining = tally.eligible.saturating_sub(tally.cast());

    if tally.approvals * den >= num * tally.eligible {
        QuorumOutcome::Approved
    } else if (tally.approvals + remaining) * den < num * tally.eligible {
        QuorumOutcome::Rejected
    } else {
        QuorumOutcome::Pending
    }
}
