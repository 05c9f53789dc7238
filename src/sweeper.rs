//! Periodic expiry of versions whose approval deadline has elapsed.
//!
//! The sweep is idempotent and safe against concurrent voting: the deadline
//! index is scanned in batches, each candidate is re-checked under its
//! per-version lock, and a version that got decided (or locked) in the
//! meantime is skipped, never corrupted. Whoever takes the lock first wins.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::WorkflowError;
use crate::events::{ApprovalEvent, EventDispatcher};
use crate::locks::LockArena;
use crate::state_machine;
use crate::store::VersionStore;
use crate::types::{TimeStamp, VersionStatus};

#[derive(Debug, Default)]
pub struct SweepReport {
    pub expired: Vec<String>,
    pub skipped: usize,
    pub scanned: usize,
}

pub struct TimeoutSweeper {
    store: Arc<dyn VersionStore>,
    locks: Arc<LockArena>,
    dispatcher: Arc<EventDispatcher>,
    batch_size: usize,
    lock_wait: Duration,
}

impl TimeoutSweeper {
    pub fn new(
        store: Arc<dyn VersionStore>,
        locks: Arc<LockArena>,
        dispatcher: Arc<EventDispatcher>,
        batch_size: usize,
        lock_wait: Duration,
    ) -> Self {
        Self {
            store,
            locks,
            dispatcher,
            batch_size,
            lock_wait,
        }
    }

    /// One sweep pass over everything whose deadline elapsed before `now`.
    /// Each expiry is two transitions (EXPIRED then ARCHIVED) with two audit
    /// entries, committed as one atomic unit.
    pub fn sweep(&self, now: &TimeStamp<Utc>) -> Result<SweepReport, WorkflowError> {
        let mut report = SweepReport::default();
        let mut seen = HashSet::new();

        loop {
            let batch = self.store.find_expired_before(now, self.batch_size)?;
            let fresh: Vec<_> = batch
                .into_iter()
                .filter(|v| seen.insert(v.version_id.clone()))
                .collect();
            if fresh.is_empty() {
                break;
            }

            for candidate in fresh {
                report.scanned += 1;
                let id = candidate.version_id.clone();

                let result = self.locks.with_lock(&id, self.lock_wait, || {
                    let mut version = self.store.load(&id)?;

                    // a final vote may have won the race for this version
                    let still_pending = version.status == VersionStatus::PendingApproval
                        && version
                            .deadline
                            .as_ref()
                            .is_some_and(|d| d.as_nanos() < now.as_nanos());
                    if !still_pending {
                        debug!(version = %id, status = ?version.status, "candidate no longer expirable, skipping");
                        return Ok(false);
                    }

                    let expired = state_machine::apply_transition(
                        &mut version,
                        VersionStatus::Expired,
                        "sweeper",
                        Some("approval deadline elapsed".to_string()),
                        self.store.next_sequence()?,
                    )?;
                    let archived = state_machine::apply_transition(
                        &mut version,
                        VersionStatus::Archived,
                        "sweeper",
                        None,
                        self.store.next_sequence()?,
                    )?;
                    self.store.save(&version, &[expired, archived])?;
                    Ok(true)
                });

                match result {
                    Ok(true) => {
                        info!(version = %id, "pending version expired");
                        self.dispatcher.publish(&[ApprovalEvent::VersionExpired {
                            version_id: id.clone(),
                            at: TimeStamp::new(),
                        }]);
                        report.expired.push(id);
                    }
                    Ok(false) => report.skipped += 1,
                    Err(WorkflowError::ContentionTimeout(_)) => {
                        warn!(version = %id, "skipping contended version, next sweep will retry");
                        report.skipped += 1;
                    }
                    Err(other) => return Err(other),
                }
            }
        }

        Ok(report)
    }
}
