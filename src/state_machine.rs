//! Pure status transition rules for token versions.
//!
//! `can_transition` is a lookup over the legal-edge table; `apply_transition`
//! mutates the in-memory record and hands back the audit entry to persist.
//! Neither function touches storage, so the rules are testable in isolation
//! and the caller decides the atomic unit the change commits in.

use crate::audit::{AuditEntry, AuditPhase};
use crate::error::WorkflowError;
use crate::types::{TimeStamp, TokenVersion, VersionStatus};

/// Legal edges only. Archived is terminal and has no outgoing edges; the
/// administrative rollback path (Active -> PendingApproval) deliberately does
/// not appear here, it bypasses the public table in the engine.
pub fn can_transition(from: VersionStatus, to: VersionStatus) -> bool {
    use VersionStatus::*;

    matches!(
        (from, to),
        (Created, PendingApproval)
            | (Created, Archived)
            | (PendingApproval, Approved)
            | (PendingApproval, Rejected)
            | (PendingApproval, Expired)
            | (Approved, Active)
            | (Active, Replaced)
            | (Active, Expired)
            | (Rejected, Archived)
            | (Replaced, Archived)
            | (Expired, Archived)
    )
}

/// Apply a legal transition to the record and produce its audit entry.
///
/// Fails with `IllegalTransition` and leaves the record untouched when the
/// edge is not in the table. Decision timestamps are stamped when the version
/// reaches Approved or Rejected.
pub fn apply_transition(
    version: &mut TokenVersion,
    to: VersionStatus,
    actor_id: &str,
    reason: Option<String>,
    entry_id: u64,
) -> Result<AuditEntry, WorkflowError> {
    let from = version.status;

    if !can_transition(from, to) {
        return Err(WorkflowError::IllegalTransition {
            id: version.version_id.clone(),
            from,
            to,
        });
    }

    version.status = to;

    if matches!(to, VersionStatus::Approved | VersionStatus::Rejected) {
        version.decided_at = Some(TimeStamp::new());
        version.decision_reason = reason.clone();
    }

    Ok(AuditEntry::new(
        entry_id,
        &version.version_id,
        AuditPhase::Transitioned,
        Some(from),
        Some(to),
        actor_id,
        reason,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ApprovalTier, VersionStatus::*};

    fn version(status: VersionStatus) -> TokenVersion {
        TokenVersion {
            version_id: "ver1test".into(),
            token_id: "tok1test".into(),
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

    #[test]
    fn happy_path_edges_are_legal() {
        assert!(can_transition(Created, PendingApproval));
        assert!(can_transition(PendingApproval, Approved));
        assert!(can_transition(Approved, Active));
        assert!(can_transition(Active, Replaced));
        assert!(can_transition(Replaced, Archived));
    }

    #[test]
    fn archived_is_terminal() {
        for to in [
            Created,
            PendingApproval,
            Approved,
            Active,
            Rejected,
            Replaced,
            Expired,
            Archived,
        ] {
            assert!(!can_transition(Archived, to));
        }
    }

    #[test]
    fn rollback_edge_is_not_public() {
        assert!(!can_transition(Active, PendingApproval));
    }

    #[test]
    fn illegal_transition_leaves_version_untouched() {
        let mut v = version(Created);

        let err = apply_transition(&mut v, Active, "actor", None, 1).unwrap_err();

        assert!(matches!(err, WorkflowError::IllegalTransition { .. }));
        assert_eq!(v.status, Created);
        assert!(v.decided_at.is_none());
    }

    #[test]
    fn rejection_stamps_decision_metadata() {
        let mut v = version(PendingApproval);

        let entry =
            apply_transition(&mut v, Rejected, "actor", Some("quorum lost".into()), 7).unwrap();

        assert_eq!(v.status, Rejected);
        assert!(v.decided_at.is_some());
        assert_eq!(v.decision_reason.as_deref(), Some("quorum lost"));
        assert_eq!(entry.prev_status, Some(PendingApproval));
        assert_eq!(entry.new_status, Some(Rejected));
        assert_eq!(entry.phase, AuditPhase::Transitioned);
    }
}
