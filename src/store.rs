//! Version Store boundary and the sled-backed implementation.
//!
//! Everything lives in sled's default tree under prefixed keys so that one
//! `sled::Batch` covers a whole atomic unit: the version record, its audit
//! entries and every index touched by the change commit together or not at
//! all.
//!
//! Key layout:
//! - `v/{version_id}`                 CBOR TokenVersion
//! - `a/{version_id}/{seq:be64}`      CBOR AuditEntry, scan-ordered
//! - `c/{prev_id}/{version_id}`       dependents index (value = version id)
//! - `d/{deadline:be64}/{version_id}` deadline index, present only while
//!                                    the version is pending approval
//! - `t/{token_id}/{number:be64}`     versions of a token, in order
//! - `n/{token_id}`                   latest version number (be64)

use std::sync::Arc;

use chrono::Utc;

use crate::audit::AuditEntry;
use crate::error::StoreError;
use crate::types::{TimeStamp, TokenVersion, VersionStatus};

pub trait VersionStore: Send + Sync {
    fn load(&self, version_id: &str) -> Result<TokenVersion, StoreError>;

    /// Persist a version and its new audit entries in one atomic unit.
    fn save(&self, version: &TokenVersion, audit: &[AuditEntry]) -> Result<(), StoreError>;

    /// Versions whose chain predecessor is `version_id`.
    fn find_dependents(&self, version_id: &str) -> Result<Vec<TokenVersion>, StoreError>;

    /// Pending-approval versions of a token, oldest first.
    fn find_pending_by_token(&self, token_id: &str) -> Result<Vec<TokenVersion>, StoreError>;

    /// Up to `limit` pending versions whose deadline elapsed before `cutoff`.
    fn find_expired_before(
        &self,
        cutoff: &TimeStamp<Utc>,
        limit: usize,
    ) -> Result<Vec<TokenVersion>, StoreError>;

    /// The ordered audit trail of a version.
    fn audit_trail(&self, version_id: &str) -> Result<Vec<AuditEntry>, StoreError>;

    /// Highest version number recorded for a token, 0 when none.
    fn latest_version_number(&self, token_id: &str) -> Result<u64, StoreError>;

    /// Next value of the monotonic audit sequence.
    fn next_sequence(&self) -> Result<u64, StoreError>;
}

pub struct SledStore {
    instance: Arc<sled::Db>,
}

fn version_key(id: &str) -> Vec<u8> {
    [b"v/", id.as_bytes()].concat()
}

fn audit_key(id: &str, seq: u64) -> Vec<u8> {
    [b"a/", id.as_bytes(), b"/", &seq.to_be_bytes()[..]].concat()
}

fn audit_prefix(id: &str) -> Vec<u8> {
    [b"a/", id.as_bytes(), b"/"].concat()
}

fn dependents_key(prev: &str, id: &str) -> Vec<u8> {
    [b"c/", prev.as_bytes(), b"/", id.as_bytes()].concat()
}

fn dependents_prefix(prev: &str) -> Vec<u8> {
    [b"c/", prev.as_bytes(), b"/"].concat()
}

// sign-flip so negative nanos still sort before positive ones bytewise
fn deadline_bytes(nanos: i64) -> [u8; 8] {
    ((nanos as u64) ^ (1 << 63)).to_be_bytes()
}

fn deadline_key(nanos: i64, id: &str) -> Vec<u8> {
    [b"d/", &deadline_bytes(nanos)[..], b"/", id.as_bytes()].concat()
}

fn token_key(token_id: &str, number: u64) -> Vec<u8> {
    [b"t/", token_id.as_bytes(), b"/", &number.to_be_bytes()[..]].concat()
}

fn token_prefix(token_id: &str) -> Vec<u8> {
    [b"t/", token_id.as_bytes(), b"/"].concat()
}

fn counter_key(token_id: &str) -> Vec<u8> {
    [b"n/", token_id.as_bytes()].concat()
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, StoreError> {
    minicbor::to_vec(value).map_err(|e| StoreError::Codec(e.to_string()))
}

fn decode<T: for<'b> minicbor::Decode<'b, ()>>(bytes: &[u8]) -> Result<T, StoreError> {
    minicbor::decode(bytes).map_err(|e| StoreError::Codec(e.to_string()))
}

fn id_from_index(value: &[u8]) -> Result<String, StoreError> {
    String::from_utf8(value.to_vec()).map_err(|e| StoreError::Codec(e.to_string()))
}

impl SledStore {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self { instance }
    }
}

impl VersionStore for SledStore {
    fn load(&self, version_id: &str) -> Result<TokenVersion, StoreError> {
        match self.instance.get(version_key(version_id))? {
            Some(bytes) => decode(&bytes),
            None => Err(StoreError::NotFound(version_id.to_string())),
        }
    }

    fn save(&self, version: &TokenVersion, audit: &[AuditEntry]) -> Result<(), StoreError> {
        let mut batch = sled::Batch::default();

        batch.insert(version_key(&version.version_id), encode(version)?);

        for entry in audit {
            batch.insert(
                audit_key(&version.version_id, entry.entry_id),
                encode(entry)?,
            );
        }

        if let Some(prev) = &version.prev_version_id {
            batch.insert(
                dependents_key(prev, &version.version_id),
                version.version_id.as_bytes(),
            );
        }

        batch.insert(
            token_key(&version.token_id, version.version_number),
            version.version_id.as_bytes(),
        );

        // the deadline index only tracks versions still awaiting a decision
        if let Some(deadline) = &version.deadline {
            let key = deadline_key(deadline.as_nanos(), &version.version_id);
            if version.status == VersionStatus::PendingApproval {
                batch.insert(key, version.version_id.as_bytes());
            } else {
                batch.remove(key);
            }
        }

        if version.version_number > self.latest_version_number(&version.token_id)? {
            batch.insert(
                counter_key(&version.token_id),
                &version.version_number.to_be_bytes()[..],
            );
        }

        self.instance.apply_batch(batch)?;
        Ok(())
    }

    fn find_dependents(&self, version_id: &str) -> Result<Vec<TokenVersion>, StoreError> {
        let mut out = vec![];

        for item in self.instance.scan_prefix(dependents_prefix(version_id)) {
            let (_, value) = item?;
            out.push(self.load(&id_from_index(&value)?)?);
        }

        Ok(out)
    }

    fn find_pending_by_token(&self, token_id: &str) -> Result<Vec<TokenVersion>, StoreError> {
        let mut out = vec![];

        for item in self.instance.scan_prefix(token_prefix(token_id)) {
            let (_, value) = item?;
            let version = self.load(&id_from_index(&value)?)?;
            if version.status == VersionStatus::PendingApproval {
                out.push(version);
            }
        }

        Ok(out)
    }

    fn find_expired_before(
        &self,
        cutoff: &TimeStamp<Utc>,
        limit: usize,
    ) -> Result<Vec<TokenVersion>, StoreError> {
        let lower = b"d/".to_vec();
        let upper = [b"d/", &deadline_bytes(cutoff.as_nanos())[..]].concat();

        let mut out = vec![];
        for item in self.instance.range(lower..upper) {
            let (_, value) = item?;
            out.push(self.load(&id_from_index(&value)?)?);
            if out.len() >= limit {
                break;
            }
        }

        Ok(out)
    }

    fn audit_trail(&self, version_id: &str) -> Result<Vec<AuditEntry>, StoreError> {
        let mut out = vec![];

        for item in self.instance.scan_prefix(audit_prefix(version_id)) {
            let (_, value) = item?;
            out.push(decode(&value)?);
        }

        Ok(out)
    }

    fn latest_version_number(&self, token_id: &str) -> Result<u64, StoreError> {
        match self.instance.get(counter_key(token_id))? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| StoreError::Codec("bad version counter width".into()))?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    fn next_sequence(&self) -> Result<u64, StoreError> {
        Ok(self.instance.generate_id()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditPhase;
    use crate::types::ApprovalTier;
    use chrono::TimeDelta;

    fn store() -> (SledStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("store_test.db")).unwrap();
        (SledStore::new(Arc::new(db)), dir)
    }

    fn version(id: &str, token: &str, number: u64, status: VersionStatus) -> TokenVersion {
        TokenVersion {
            version_id: id.to_string(),
            token_id: token.to_string(),
            version_number: number,
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
    fn load_of_unknown_version_is_not_found() {
        let (store, _dir) = store();

        assert!(matches!(
            store.load("ver1missing"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn save_and_load_round_trip() {
        let (store, _dir) = store();
        let v = version("ver1a", "tok1a", 1, VersionStatus::Created);

        store.save(&v, &[]).unwrap();

        assert_eq!(store.load("ver1a").unwrap(), v);
        assert_eq!(store.latest_version_number("tok1a").unwrap(), 1);
    }

    #[test]
    fn pending_by_token_filters_status() {
        let (store, _dir) = store();

        store
            .save(
                &version("ver1a", "tok1a", 1, VersionStatus::Active),
                &[],
            )
            .unwrap();
        store
            .save(
                &version("ver1b", "tok1a", 2, VersionStatus::PendingApproval),
                &[],
            )
            .unwrap();
        store
            .save(
                &version("ver1c", "tok1other", 1, VersionStatus::PendingApproval),
                &[],
            )
            .unwrap();

        let pending = store.find_pending_by_token("tok1a").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].version_id, "ver1b");
    }

    #[test]
    fn dependents_index_follows_predecessor() {
        let (store, _dir) = store();

        store
            .save(&version("ver1a", "tok1a", 1, VersionStatus::Active), &[])
            .unwrap();
        let mut child = version("ver1b", "tok1a", 2, VersionStatus::PendingApproval);
        child.prev_version_id = Some("ver1a".into());
        store.save(&child, &[]).unwrap();

        let dependents = store.find_dependents("ver1a").unwrap();
        assert_eq!(dependents.len(), 1);
        assert_eq!(dependents[0].version_id, "ver1b");
    }

    #[test]
    fn deadline_index_tracks_pending_only() {
        let (store, _dir) = store();
        let now = TimeStamp::new();

        let mut v = version("ver1a", "tok1a", 1, VersionStatus::PendingApproval);
        v.deadline = Some(now.advanced_by(TimeDelta::hours(1)));
        store.save(&v, &[]).unwrap();

        let cutoff = now.advanced_by(TimeDelta::hours(2));
        assert_eq!(store.find_expired_before(&cutoff, 10).unwrap().len(), 1);
        // not yet overdue
        assert!(store.find_expired_before(&now, 10).unwrap().is_empty());

        // a decided version leaves the index
        v.status = VersionStatus::Approved;
        store.save(&v, &[]).unwrap();
        assert!(store.find_expired_before(&cutoff, 10).unwrap().is_empty());
    }

    #[test]
    fn audit_trail_is_ordered_by_sequence() {
        let (store, _dir) = store();
        let v = version("ver1a", "tok1a", 1, VersionStatus::Created);

        let entries: Vec<_> = (0..3)
            .map(|_| {
                AuditEntry::new(
                    store.next_sequence().unwrap(),
                    "ver1a",
                    AuditPhase::VoteCast,
                    None,
                    None,
                    "actor",
                    None,
                )
            })
            .collect();
        store.save(&v, &entries).unwrap();

        let trail = store.audit_trail("ver1a").unwrap();
        assert_eq!(trail.len(), 3);
        for pair in trail.windows(2) {
            assert!(pair[0].entry_id < pair[1].entry_id);
        }
    }
}
