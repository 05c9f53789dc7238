//! Property-based tests for the status transition table.

use proptest::prelude::*;
use token_approval::state_machine::{apply_transition, can_transition};
use token_approval::types::{ApprovalTier, TokenVersion, VersionStatus};

const ALL_STATUSES: [VersionStatus; 8] = [
    VersionStatus::Created,
    VersionStatus::PendingApproval,
    VersionStatus::Approved,
    VersionStatus::Active,
    VersionStatus::Rejected,
    VersionStatus::Replaced,
    VersionStatus::Expired,
    VersionStatus::Archived,
];

fn status_strategy() -> impl Strategy<Value = VersionStatus> {
    prop::sample::select(ALL_STATUSES.to_vec())
}

fn version(status: VersionStatus) -> TokenVersion {
    TokenVersion {
        version_id: "ver1prop".into(),
        token_id: "tok1prop".into(),
        version_number: 1,
        payload: b"p".to_vec(),
        content_digest: None,
        prev_version_id: None,
        status,
        tier: ApprovalTier::Standard,
        votes: vec![],
        submitted_at: None,
        deadline: None,
        decided_at: None,
        decision_reason: None,
        replaced_by: None,
        replaced_at: None,
    }
}

proptest! {
    // apply_transition succeeds exactly on the table's edges; an illegal
    // edge fails and leaves the record byte-for-byte untouched.
    #[test]
    fn apply_agrees_with_table(from in status_strategy(), to in status_strategy()) {
        let mut v = version(from);
        let before = v.clone();

        let result = apply_transition(&mut v, to, "prop", None, 1);

        if can_transition(from, to) {
            prop_assert!(result.is_ok());
            prop_assert_eq!(v.status, to);
        } else {
            prop_assert!(result.is_err());
            prop_assert_eq!(v, before);
        }
    }

    // Any sequence of attempted transitions only ever walks legal edges.
    #[test]
    fn random_walk_stays_on_legal_edges(
        start in status_strategy(),
        attempts in prop::collection::vec(status_strategy(), 0..12),
    ) {
        let mut v = version(start);
        let mut seq = 1u64;

        for target in attempts {
            let from = v.status;
            seq += 1;
            match apply_transition(&mut v, target, "prop", None, seq) {
                Ok(entry) => {
                    prop_assert!(can_transition(from, target));
                    prop_assert_eq!(entry.prev_status, Some(from));
                    prop_assert_eq!(entry.new_status, Some(target));
                }
                Err(_) => prop_assert_eq!(v.status, from),
            }
        }
    }

    // Archived is terminal against every target.
    #[test]
    fn archived_never_leaves(to in status_strategy()) {
        let mut v = version(VersionStatus::Archived);

        prop_assert!(apply_transition(&mut v, to, "prop", None, 1).is_err());
        prop_assert_eq!(v.status, VersionStatus::Archived);
    }
}
