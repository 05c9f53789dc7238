//! Append-only audit trail records.
//!
//! Every committed phase of a version's life produces exactly one entry,
//! written in the same atomic batch as the state change it documents. Entries
//! are never updated or deleted; ordering per version is the monotonic
//! sequence number.

use chrono::Utc;

use crate::types::{TimeStamp, VersionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum AuditPhase {
    #[n(0)]
    Drafted,
    #[n(1)]
    Submitted,
    #[n(2)]
    VoteCast,
    #[n(3)]
    LateVote,
    #[n(4)]
    Transitioned,
    #[n(5)]
    CascadeApplied,
    #[n(6)]
    RolledBack,
}

#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct AuditEntry {
    #[n(0)]
    pub entry_id: u64, // monotonic sequence, also the storage sort key
    #[n(1)]
    pub version_id: String,
    #[n(2)]
    pub phase: AuditPhase,
    #[n(3)]
    pub prev_status: Option<VersionStatus>,
    #[n(4)]
    pub new_status: Option<VersionStatus>,
    #[n(5)]
    pub actor_id: String,
    #[n(6)]
    pub recorded_at: TimeStamp<Utc>,
    #[n(7)]
    pub detail: Option<String>,
}

impl AuditEntry {
    pub fn new(
        entry_id: u64,
        version_id: &str,
        phase: AuditPhase,
        prev_status: Option<VersionStatus>,
        new_status: Option<VersionStatus>,
        actor_id: &str,
        detail: Option<String>,
    ) -> Self {
        Self {
            entry_id,
            version_id: version_id.to_string(),
            phase,
            prev_status,
            new_status,
            actor_id: actor_id.to_string(),
            recorded_at: TimeStamp::new(),
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_encoding_round_trip() {
        let entry = AuditEntry::new(
            42,
            "ver1abc",
            AuditPhase::Transitioned,
            Some(VersionStatus::PendingApproval),
            Some(VersionStatus::Approved),
            "vvb1actor",
            Some("quorum reached".into()),
        );

        let encoding = minicbor::to_vec(&entry).unwrap();
        let decode: AuditEntry = minicbor::decode(&encoding).unwrap();

        assert_eq!(entry, decode);
    }
}
