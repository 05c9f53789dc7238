//! Core records: timestamps, token versions, tiers and votes.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use crate::error::WorkflowError;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }

    pub fn from_nanos(nanos: i64) -> Self {
        Self(DateTime::from_timestamp_nanos(nanos))
    }

    /// Nanoseconds since the epoch. Saturates at `i64::MAX` far past the
    /// representable range (year 2262), which keeps index keys orderable.
    pub fn as_nanos(&self) -> i64 {
        self.0.timestamp_nanos_opt().unwrap_or(i64::MAX)
    }

    pub fn advanced_by(&self, delta: TimeDelta) -> Self {
        Self(self.0 + delta)
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// The seven-plus-one lifecycle states of a token version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum VersionStatus {
    #[n(0)]
    Created,
    #[n(1)]
    PendingApproval,
    #[n(2)]
    Approved,
    #[n(3)]
    Active,
    #[n(4)]
    Rejected,
    #[n(5)]
    Replaced,
    #[n(6)]
    Expired,
    #[n(7)]
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
pub enum ApprovalTier {
    #[n(0)]
    Standard,
    #[n(1)]
    Elevated,
    #[n(2)]
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum VoteDecision {
    #[n(0)]
    Approve,
    #[n(1)]
    Reject,
}

/// A single recorded vote. Immutable once appended to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Vote {
    #[n(0)]
    pub validator_id: String,
    #[n(1)]
    pub decision: VoteDecision,
    #[n(2)]
    pub cast_at: TimeStamp<Utc>,
}

/// One immutable version of a token. The status field is only ever mutated
/// through the state machine; the vote ledger is append-only.
#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct TokenVersion {
    #[n(0)]
    pub version_id: String, // uuid7, bech32 encoded
    #[n(1)]
    pub token_id: String,
    #[n(2)]
    pub version_number: u64, // strictly increasing per token
    #[n(3)]
    pub payload: Vec<u8>, // opaque content
    #[n(4)]
    pub content_digest: Option<String>, // set at activation by the hasher
    #[n(5)]
    pub prev_version_id: Option<String>, // chain predecessor, None for the first
    #[n(6)]
    pub status: VersionStatus,
    #[n(7)]
    pub tier: ApprovalTier,
    #[n(8)]
    pub votes: Vec<Vote>,
    #[n(9)]
    pub submitted_at: Option<TimeStamp<Utc>>,
    #[n(10)]
    pub deadline: Option<TimeStamp<Utc>>,
    #[n(11)]
    pub decided_at: Option<TimeStamp<Utc>>,
    #[n(12)]
    pub decision_reason: Option<String>,
    #[n(13)]
    pub replaced_by: Option<String>,
    #[n(14)]
    pub replaced_at: Option<TimeStamp<Utc>>,
}

impl TokenVersion {
    pub fn vote_by(&self, validator_id: &str) -> Option<&Vote> {
        self.votes.iter().find(|v| v.validator_id == validator_id)
    }
}

/// Quorum policy for one tier. Pure data, loaded at startup; new tiers are a
/// table row, not a code change.
#[derive(Debug, Clone)]
pub struct TierConfig {
    pub tier: ApprovalTier,
    pub validators_required: u32,
    pub quorum_num: u32,
    pub quorum_den: u32,
    pub timeout: TimeDelta,
}

#[derive(Debug, Clone)]
pub struct TierTable {
    entries: Vec<TierConfig>,
}

impl TierTable {
    pub fn new(entries: Vec<TierConfig>) -> Self {
        Self { entries }
    }

    pub fn lookup(&self, tier: ApprovalTier) -> Result<&TierConfig, WorkflowError> {
        self.entries
            .iter()
            .find(|c| c.tier == tier)
            .ok_or(WorkflowError::InvalidTier(tier))
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self::new(vec![
            TierConfig {
                tier: ApprovalTier::Standard,
                validators_required: 1,
                quorum_num: 1,
                quorum_den: 1,
                timeout: TimeDelta::hours(72),
            },
            TierConfig {
                tier: ApprovalTier::Elevated,
                validators_required: 3,
                quorum_num: 2,
                quorum_den: 3,
                timeout: TimeDelta::hours(48),
            },
            TierConfig {
                tier: ApprovalTier::Critical,
                validators_required: 4,
                quorum_num: 3,
                quorum_den: 4,
                timeout: TimeDelta::hours(24),
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(&original).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn nanos_order_tracks_wall_clock_order() {
        let early = TimeStamp::new();
        let late = early.advanced_by(TimeDelta::hours(1));

        assert!(early.as_nanos() < late.as_nanos());
        assert_eq!(late.as_nanos() - early.as_nanos(), 3_600_000_000_000);
    }

    #[test]
    fn version_encoding_round_trip() {
        let version = TokenVersion {
            version_id: "ver1abc".into(),
            token_id: "tok1abc".into(),
            version_number: 3,
            payload: b"token content".to_vec(),
            content_digest: None,
            prev_version_id: Some("ver1prev".into()),
            status: VersionStatus::PendingApproval,
            tier: ApprovalTier::Elevated,
            votes: vec![Vote {
                validator_id: "vvb1a".into(),
                decision: VoteDecision::Approve,
                cast_at: TimeStamp::new(),
            }],
            submitted_at: Some(TimeStamp::new()),
            deadline: Some(TimeStamp::new().advanced_by(TimeDelta::hours(48))),
            decided_at: None,
            decision_reason: None,
            replaced_by: None,
            replaced_at: None,
        };

        let encoding = minicbor::to_vec(&version).unwrap();
        let decode: TokenVersion = minicbor::decode(&encoding).unwrap();

        assert_eq!(version, decode);
    }

    #[test]
    fn default_tier_table_has_all_tiers() {
        let table = TierTable::default();

        let elevated = table.lookup(ApprovalTier::Elevated).unwrap();
        assert_eq!(elevated.validators_required, 3);
        assert_eq!((elevated.quorum_num, elevated.quorum_den), (2, 3));

        let critical = table.lookup(ApprovalTier::Critical).unwrap();
        assert_eq!((critical.quorum_num, critical.quorum_den), (3, 4));
    }

    #[test]
    fn missing_tier_is_an_error() {
        let table = TierTable::new(vec![]);
        assert!(table.lookup(ApprovalTier::Standard).is_err());
    }
}
