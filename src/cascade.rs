//! Decision propagation through the version chain.
//!
//! Cascading is best effort: the root decision has already committed and is
//! externally observable by the time these run, so a cascade failure is
//! logged and reported in the outcome, never turned into a rollback.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::WorkflowError;
use crate::events::ApprovalEvent;
use crate::locks::LockArena;
use crate::state_machine;
use crate::store::VersionStore;
use crate::types::{TimeStamp, TokenVersion, VersionStatus};

/// What a cascade pass did, distinguishable without inspecting errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CascadeOutcome {
    Applied { targets: Vec<String> },
    SkippedActiveChildren { predecessor: String, active_children: usize },
    DepthLimitReached { targets: Vec<String> },
    NoPredecessor,
    Failed { reason: String },
}

pub struct CascadePropagator {
    store: Arc<dyn VersionStore>,
    locks: Arc<LockArena>,
    max_depth: u32,
    lock_wait: Duration,
}

impl CascadePropagator {
    pub fn new(
        store: Arc<dyn VersionStore>,
        locks: Arc<LockArena>,
        max_depth: u32,
        lock_wait: Duration,
    ) -> Self {
        Self {
            store,
            locks,
            max_depth,
            lock_wait,
        }
    }

    /// Rejection cascade: pending dependents of a rejected version are
    /// rejected in turn, each with its own audit entry, down to `max_depth`
    /// hops from the original rejection.
    pub fn cascade_rejection(
        &self,
        root: &TokenVersion,
        events: &mut Vec<ApprovalEvent>,
    ) -> CascadeOutcome {
        let mut targets = vec![];
        let mut hit_limit = false;

        if let Err(err) = self.reject_dependents_of(
            &root.version_id,
            &root.version_id,
            1,
            &mut targets,
            &mut hit_limit,
            events,
        ) {
            warn!(root = %root.version_id, error = %err, "rejection cascade failed part-way");
            return CascadeOutcome::Failed {
                reason: err.to_string(),
            };
        }

        if hit_limit {
            info!(root = %root.version_id, depth = self.max_depth, "rejection cascade stopped at depth limit");
            CascadeOutcome::DepthLimitReached { targets }
        } else {
            CascadeOutcome::Applied { targets }
        }
    }

    fn reject_dependents_of(
        &self,
        origin: &str,
        parent_id: &str,
        depth: u32,
        targets: &mut Vec<String>,
        hit_limit: &mut bool,
        events: &mut Vec<ApprovalEvent>,
    ) -> Result<(), WorkflowError> {
        if depth > self.max_depth {
            *hit_limit = true;
            return Ok(());
        }

        let dependents = self.store.find_dependents(parent_id)?;

        for dependent in dependents {
            if dependent.status != VersionStatus::PendingApproval {
                continue;
            }

            let id = dependent.version_id.clone();
            let rejected = self.locks.with_lock(&id, self.lock_wait, || {
                let mut version = self.store.load(&id)?;
                // a vote may have decided it between the scan and the lock
                if version.status != VersionStatus::PendingApproval {
                    debug!(version = %id, "dependent decided before cascade reached it, skipping");
                    return Ok(false);
                }

                let seq = self.store.next_sequence()?;
                let entry = state_machine::apply_transition(
                    &mut version,
                    VersionStatus::Rejected,
                    "cascade",
                    Some(format!("rejected in cascade from {origin}")),
                    seq,
                )?;
                self.store.save(&version, &[entry])?;
                Ok(true)
            })?;

            if rejected {
                info!(version = %id, origin = %origin, depth, "cascaded rejection");
                events.push(ApprovalEvent::CascadeApplied {
                    root_version_id: origin.to_string(),
                    target_version_id: id.clone(),
                    new_status: VersionStatus::Rejected,
                    at: TimeStamp::new(),
                });
                targets.push(id.clone());

                self.reject_dependents_of(origin, &id, depth + 1, targets, hit_limit, events)?;
            }
        }

        Ok(())
    }

    /// Replacement cascade: when `activated` has a predecessor, retire that
    /// predecessor unless other versions still depend on it being active.
    pub fn cascade_replacement(
        &self,
        activated: &TokenVersion,
        events: &mut Vec<ApprovalEvent>,
    ) -> CascadeOutcome {
        let Some(prev_id) = activated.prev_version_id.clone() else {
            return CascadeOutcome::NoPredecessor;
        };

        let result = self.locks.with_lock(&prev_id, self.lock_wait, || {
            let predecessor = self.store.load(&prev_id)?;

            if predecessor.status != VersionStatus::Active {
                debug!(predecessor = %prev_id, status = ?predecessor.status, "predecessor not active, nothing to replace");
                return Ok(CascadeOutcome::Applied { targets: vec![] });
            }

            let active_children = self
                .store
                .find_dependents(&prev_id)?
                .iter()
                .filter(|v| {
                    v.status == VersionStatus::Active && v.version_id != activated.version_id
                })
                .count();

            if active_children > 0 {
                info!(predecessor = %prev_id, active_children, "predecessor still has active dependents, skipping replacement");
                return Ok(CascadeOutcome::SkippedActiveChildren {
                    predecessor: prev_id.clone(),
                    active_children,
                });
            }

            let mut predecessor = predecessor;
            let seq = self.store.next_sequence()?;
            let entry = state_machine::apply_transition(
                &mut predecessor,
                VersionStatus::Replaced,
                "cascade",
                Some(format!("replaced by {}", activated.version_id)),
                seq,
            )?;
            predecessor.replaced_by = Some(activated.version_id.clone());
            predecessor.replaced_at = Some(TimeStamp::new());
            self.store.save(&predecessor, &[entry])?;

            info!(predecessor = %prev_id, replacement = %activated.version_id, "predecessor replaced");
            events.push(ApprovalEvent::CascadeApplied {
                root_version_id: activated.version_id.clone(),
                target_version_id: prev_id.clone(),
                new_status: VersionStatus::Replaced,
                at: TimeStamp::new(),
            });

            Ok(CascadeOutcome::Applied {
                targets: vec![prev_id.clone()],
            })
        });

        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(predecessor = %prev_id, error = %err, "replacement cascade failed");
                CascadeOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }
}
