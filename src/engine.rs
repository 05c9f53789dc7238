//! Approval workflow engine.
//!
//! Owns the orchestration sequence: validate, evaluate quorum, transition,
//! cascade, audit, emit. Every mutating operation runs under the per-version
//! (or per-token, for submission) lock, persists through one atomic store
//! save, and only publishes events after that save has committed. Cascades
//! run after the root lock is released so a cascade can never deadlock
//! against its own root.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::audit::{AuditEntry, AuditPhase};
use crate::builder::VersionDraft;
use crate::cascade::{CascadeOutcome, CascadePropagator};
use crate::error::{DraftError, StoreError, WorkflowError};
use crate::events::{ApprovalEvent, EventDispatcher};
use crate::locks::LockArena;
use crate::policy::{ChangePolicy, DefaultChangePolicy};
use crate::quorum::{self, QuorumOutcome, VoteTally};
use crate::state_machine;
use crate::store::VersionStore;
use crate::types::{TierTable, TimeStamp, TokenVersion, Vote, VoteDecision, VersionStatus};
use crate::utils;

/// Content-integrity collaborator, invoked at activation. Failure is
/// retryable and never reverts the approved state.
pub trait ContentHasher: Send + Sync {
    fn hash(&self, payload: &[u8]) -> anyhow::Result<String>;
}

pub struct Sha256Hasher;

impl ContentHasher for Sha256Hasher {
    fn hash(&self, payload: &[u8]) -> anyhow::Result<String> {
        Ok(sha256::digest(payload))
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_cascade_depth: u32,
    pub lock_wait: std::time::Duration,
    pub sweep_batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cascade_depth: 3,
            lock_wait: std::time::Duration::from_secs(5),
            sweep_batch_size: 64,
        }
    }
}

/// Result of a vote: the updated record, the tally that produced the
/// outcome, and whether the vote arrived after the decision was final.
#[derive(Debug)]
pub struct VoteOutcome {
    pub version: TokenVersion,
    pub tally: VoteTally,
    pub outcome: QuorumOutcome,
    pub late: bool,
}

pub struct ApprovalEngine {
    store: Arc<dyn VersionStore>,
    tiers: TierTable,
    policy: Arc<dyn ChangePolicy>,
    hasher: Arc<dyn ContentHasher>,
    locks: Arc<LockArena>,
    dispatcher: Arc<EventDispatcher>,
    cascade: CascadePropagator,
    config: EngineConfig,
}

impl ApprovalEngine {
    pub fn new(
        store: Arc<dyn VersionStore>,
        tiers: TierTable,
        policy: Arc<dyn ChangePolicy>,
        hasher: Arc<dyn ContentHasher>,
        config: EngineConfig,
    ) -> Self {
        let locks = Arc::new(LockArena::new());
        let cascade = CascadePropagator::new(
            store.clone(),
            locks.clone(),
            config.max_cascade_depth,
            config.lock_wait,
        );

        Self {
            store,
            tiers,
            policy,
            hasher,
            locks,
            dispatcher: Arc::new(EventDispatcher::new()),
            cascade,
            config,
        }
    }

    /// Default tier table, classification policy and hasher.
    pub fn with_defaults(store: Arc<dyn VersionStore>) -> Self {
        Self::new(
            store,
            TierTable::default(),
            Arc::new(DefaultChangePolicy),
            Arc::new(Sha256Hasher),
            EngineConfig::default(),
        )
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn sweeper(&self) -> crate::sweeper::TimeoutSweeper {
        crate::sweeper::TimeoutSweeper::new(
            self.store.clone(),
            self.locks.clone(),
            self.dispatcher.clone(),
            self.config.sweep_batch_size,
            self.config.lock_wait,
        )
    }

    fn load(&self, version_id: &str) -> Result<TokenVersion, WorkflowError> {
        self.store.load(version_id).map_err(|e| match e {
            StoreError::NotFound(id) => WorkflowError::VersionNotFound(id),
            other => WorkflowError::Store(other),
        })
    }

    fn mint_version_id() -> Result<String, WorkflowError> {
        utils::new_uuid_to_bech32(utils::VERSION_HRP)
            .map_err(|e| WorkflowError::IdMint(e.to_string()))
    }

    fn new_version(
        &self,
        draft: VersionDraft,
    ) -> Result<(TokenVersion, crate::types::TierConfig), WorkflowError> {
        let finalised = draft.finalise()?;

        let tier = match (finalised.tier, &finalised.change) {
            (Some(tier), _) => tier,
            (None, Some(change)) => self.policy.classify(change),
            (None, None) => return Err(DraftError::MissingChangeKind.into()),
        };
        let cfg = self.tiers.lookup(tier)?.clone();

        let version = TokenVersion {
            version_id: Self::mint_version_id()?,
            token_id: finalised.token_id,
            version_number: 0, // assigned under the token lock
            payload: finalised.payload,
            content_digest: None,
            prev_version_id: finalised.prev_version_id,
            status: VersionStatus::Created,
            tier,
            votes: vec![],
            submitted_at: None,
            deadline: None,
            decided_at: None,
            decision_reason: None,
            replaced_by: None,
            replaced_at: None,
        };

        Ok((version, cfg))
    }

    /// Create a version in CREATED without submitting it for approval, e.g.
    /// for the direct-discard path.
    pub fn create(&self, draft: VersionDraft, actor_id: &str) -> Result<TokenVersion, WorkflowError> {
        let (mut version, _cfg) = self.new_version(draft)?;
        let token_id = version.token_id.clone();

        self.locks.with_lock(&token_id, self.config.lock_wait, || {
            if let Some(prev) = &version.prev_version_id {
                self.load(prev)?;
            }
            version.version_number = self.store.latest_version_number(&token_id)? + 1;

            let entry = AuditEntry::new(
                self.store.next_sequence()?,
                &version.version_id,
                AuditPhase::Drafted,
                None,
                Some(VersionStatus::Created),
                actor_id,
                Some(format!("tier {:?}", version.tier)),
            );
            self.store.save(&version, &[entry])?;

            debug!(version = %version.version_id, token = %token_id, "version drafted");
            Ok(version.clone())
        })
    }

    /// Create and submit in one atomic unit: the version lands in
    /// PENDING_APPROVAL with its decision deadline set from the tier timeout.
    pub fn submit(&self, draft: VersionDraft, actor_id: &str) -> Result<TokenVersion, WorkflowError> {
        let (mut version, cfg) = self.new_version(draft)?;
        let token_id = version.token_id.clone();

        let version = self.locks.with_lock(&token_id, self.config.lock_wait, || {
            if let Some(prev) = &version.prev_version_id {
                self.load(prev)?;
            }
            version.version_number = self.store.latest_version_number(&token_id)? + 1;

            let now = TimeStamp::new();
            version.submitted_at = Some(now.clone());
            version.deadline = Some(now.advanced_by(cfg.timeout));

            let submitted = AuditEntry::new(
                self.store.next_sequence()?,
                &version.version_id,
                AuditPhase::Submitted,
                None,
                Some(VersionStatus::Created),
                actor_id,
                Some(format!("tier {:?}", version.tier)),
            );
            let transitioned = state_machine::apply_transition(
                &mut version,
                VersionStatus::PendingApproval,
                actor_id,
                None,
                self.store.next_sequence()?,
            )?;
            self.store.save(&version, &[submitted, transitioned])?;

            info!(
                version = %version.version_id,
                token = %token_id,
                tier = ?version.tier,
                number = version.version_number,
                "version submitted for approval"
            );
            Ok(version.clone())
        })?;

        self.dispatcher.publish(&[ApprovalEvent::VersionSubmitted {
            version_id: version.version_id.clone(),
            token_id: version.token_id.clone(),
            tier: version.tier,
            at: TimeStamp::new(),
        }]);

        Ok(version)
    }

    /// Record a vote, re-evaluate the quorum and, when a terminal decision
    /// results, commit the transition in the same atomic unit. The rejection
    /// cascade runs before this returns; events fire after the commit.
    pub fn cast_vote(
        &self,
        version_id: &str,
        validator_id: &str,
        decision: VoteDecision,
    ) -> Result<VoteOutcome, WorkflowError> {
        let mut events = vec![];
        let mut rejected_root: Option<TokenVersion> = None;

        let outcome = self.locks.with_lock(version_id, self.config.lock_wait, || {
            let mut version = self.load(version_id)?;
            let cfg = self.tiers.lookup(version.tier)?.clone();

            match version.status {
                VersionStatus::PendingApproval => {
                    if let Some(existing) = version.vote_by(validator_id) {
                        if existing.decision == decision {
                            // idempotent re-submission, nothing to write
                            let tally =
                                VoteTally::from_votes(&version.votes, cfg.validators_required);
                            return Ok(VoteOutcome {
                                version,
                                tally,
                                outcome: QuorumOutcome::Pending,
                                late: false,
                            });
                        }
                        return Err(WorkflowError::DuplicateVote {
                            id: version_id.to_string(),
                            validator_id: validator_id.to_string(),
                        });
                    }

                    version.votes.push(Vote {
                        validator_id: validator_id.to_string(),
                        decision,
                        cast_at: TimeStamp::new(),
                    });
                    let vote_entry = AuditEntry::new(
                        self.store.next_sequence()?,
                        version_id,
                        AuditPhase::VoteCast,
                        Some(VersionStatus::PendingApproval),
                        Some(VersionStatus::PendingApproval),
                        validator_id,
                        Some(format!("{decision:?}")),
                    );

                    let tally = VoteTally::from_votes(&version.votes, cfg.validators_required);
                    let outcome = quorum::evaluate(&cfg, &tally);

                    match outcome {
                        QuorumOutcome::Pending => {
                            self.store.save(&version, &[vote_entry])?;
                            debug!(version = %version_id, validator = %validator_id, "vote recorded, quorum still pending");
                        }
                        QuorumOutcome::Approved | QuorumOutcome::Rejected => {
                            let (to, reason) = if outcome == QuorumOutcome::Approved {
                                (VersionStatus::Approved, "approval quorum reached")
                            } else {
                                (VersionStatus::Rejected, "rejection is mathematically certain")
                            };
                            let transitioned = state_machine::apply_transition(
                                &mut version,
                                to,
                                validator_id,
                                Some(reason.to_string()),
                                self.store.next_sequence()?,
                            )?;
                            self.store.save(&version, &[vote_entry, transitioned])?;

                            info!(
                                version = %version_id,
                                outcome = ?to,
                                approvals = tally.approvals,
                                rejections = tally.rejections,
                                "quorum decision reached"
                            );
                            events.push(ApprovalEvent::DecisionReached {
                                version_id: version_id.to_string(),
                                outcome: to,
                                approvals: tally.approvals,
                                rejections: tally.rejections,
                                at: TimeStamp::new(),
                            });
                            if to == VersionStatus::Rejected {
                                rejected_root = Some(version.clone());
                            }
                        }
                    }

                    Ok(VoteOutcome {
                        version,
                        tally,
                        outcome,
                        late: false,
                    })
                }
                VersionStatus::Approved | VersionStatus::Rejected => {
                    // the decision is final; late votes are kept for audit
                    // but can neither change the outcome nor re-fire events
                    let final_outcome = if version.status == VersionStatus::Approved {
                        QuorumOutcome::Approved
                    } else {
                        QuorumOutcome::Rejected
                    };

                    if let Some(existing) = version.vote_by(validator_id) {
                        if existing.decision == decision {
                            let tally =
                                VoteTally::from_votes(&version.votes, cfg.validators_required);
                            return Ok(VoteOutcome {
                                version,
                                tally,
                                outcome: final_outcome,
                                late: true,
                            });
                        }
                        return Err(WorkflowError::DuplicateVote {
                            id: version_id.to_string(),
                            validator_id: validator_id.to_string(),
                        });
                    }

                    version.votes.push(Vote {
                        validator_id: validator_id.to_string(),
                        decision,
                        cast_at: TimeStamp::new(),
                    });
                    let entry = AuditEntry::new(
                        self.store.next_sequence()?,
                        version_id,
                        AuditPhase::LateVote,
                        Some(version.status),
                        Some(version.status),
                        validator_id,
                        Some(format!("{decision:?}")),
                    );
                    self.store.save(&version, &[entry])?;

                    debug!(version = %version_id, validator = %validator_id, "late vote recorded after final decision");
                    let tally = VoteTally::from_votes(&version.votes, cfg.validators_required);
                    Ok(VoteOutcome {
                        version,
                        tally,
                        outcome: final_outcome,
                        late: true,
                    })
                }
                status => Err(WorkflowError::NotPending {
                    id: version_id.to_string(),
                    status,
                }),
            }
        })?;

        if let Some(root) = &rejected_root {
            self.cascade.cascade_rejection(root, &mut events);
        }
        self.dispatcher.publish(&events);

        Ok(outcome)
    }

    /// Activation: hash the content, transition APPROVED -> ACTIVE, then run
    /// the replacement cascade. A hasher failure leaves the version APPROVED
    /// and is safe to retry.
    pub fn activate(
        &self,
        version_id: &str,
        actor_id: &str,
    ) -> Result<(TokenVersion, CascadeOutcome), WorkflowError> {
        let version = self.locks.with_lock(version_id, self.config.lock_wait, || {
            let mut version = self.load(version_id)?;

            if version.status != VersionStatus::Approved {
                return Err(WorkflowError::IllegalTransition {
                    id: version_id.to_string(),
                    from: version.status,
                    to: VersionStatus::Active,
                });
            }

            let digest =
                self.hasher
                    .hash(&version.payload)
                    .map_err(|e| WorkflowError::Hashing {
                        id: version_id.to_string(),
                        reason: e.to_string(),
                    })?;
            version.content_digest = Some(digest);

            let entry = state_machine::apply_transition(
                &mut version,
                VersionStatus::Active,
                actor_id,
                None,
                self.store.next_sequence()?,
            )?;
            self.store.save(&version, &[entry])?;

            info!(version = %version_id, "version activated");
            Ok(version)
        })?;

        let mut events = vec![];
        let outcome = self.cascade.cascade_replacement(&version, &mut events);
        let replaced = match &outcome {
            CascadeOutcome::Applied { targets } => targets.first().cloned(),
            _ => None,
        };
        events.push(ApprovalEvent::VersionActivated {
            version_id: version.version_id.clone(),
            replaced,
            at: TimeStamp::new(),
        });
        self.dispatcher.publish(&events);

        Ok((version, outcome))
    }

    /// Administrative reversal of an active version back to voting. Clears
    /// the ledger and decision metadata and restarts the approval deadline.
    /// Authorization is the caller's responsibility.
    pub fn rollback(
        &self,
        version_id: &str,
        reason: &str,
        actor_id: &str,
    ) -> Result<TokenVersion, WorkflowError> {
        self.locks.with_lock(version_id, self.config.lock_wait, || {
            let mut version = self.load(version_id)?;

            if version.status != VersionStatus::Active {
                return Err(WorkflowError::InvalidRollbackState {
                    id: version_id.to_string(),
                    status: version.status,
                });
            }
            let cfg = self.tiers.lookup(version.tier)?;

            version.status = VersionStatus::PendingApproval;
            version.votes.clear();
            version.decided_at = None;
            version.decision_reason = None;
            version.content_digest = None;
            version.replaced_by = None;
            version.replaced_at = None;

            let now = TimeStamp::new();
            version.submitted_at = Some(now.clone());
            version.deadline = Some(now.advanced_by(cfg.timeout));

            let entry = AuditEntry::new(
                self.store.next_sequence()?,
                version_id,
                AuditPhase::RolledBack,
                Some(VersionStatus::Active),
                Some(VersionStatus::PendingApproval),
                actor_id,
                Some(reason.to_string()),
            );
            self.store.save(&version, &[entry])?;

            warn!(version = %version_id, actor = %actor_id, reason = %reason, "active version rolled back to voting");
            Ok(version)
        })
    }

    /// Direct discard of a never-submitted version (CREATED -> ARCHIVED).
    pub fn discard(
        &self,
        version_id: &str,
        actor_id: &str,
        reason: Option<String>,
    ) -> Result<TokenVersion, WorkflowError> {
        self.locks.with_lock(version_id, self.config.lock_wait, || {
            let mut version = self.load(version_id)?;
            let entry = state_machine::apply_transition(
                &mut version,
                VersionStatus::Archived,
                actor_id,
                reason.clone(),
                self.store.next_sequence()?,
            )?;
            self.store.save(&version, &[entry])?;
            Ok(version)
        })
    }

    /// Retention path: archive a REJECTED, REPLACED or EXPIRED version.
    pub fn archive(
        &self,
        version_id: &str,
        actor_id: &str,
    ) -> Result<TokenVersion, WorkflowError> {
        self.locks.with_lock(version_id, self.config.lock_wait, || {
            let mut version = self.load(version_id)?;
            let entry = state_machine::apply_transition(
                &mut version,
                VersionStatus::Archived,
                actor_id,
                Some("retention period elapsed".to_string()),
                self.store.next_sequence()?,
            )?;
            self.store.save(&version, &[entry])?;
            Ok(version)
        })
    }

    /// Operational-lifetime expiry of an ACTIVE version: EXPIRED then
    /// ARCHIVED immediately, two transitions in one atomic unit.
    pub fn expire(
        &self,
        version_id: &str,
        actor_id: &str,
        reason: Option<String>,
    ) -> Result<TokenVersion, WorkflowError> {
        let version = self.locks.with_lock(version_id, self.config.lock_wait, || {
            let mut version = self.load(version_id)?;
            let expired = state_machine::apply_transition(
                &mut version,
                VersionStatus::Expired,
                actor_id,
                reason.clone(),
                self.store.next_sequence()?,
            )?;
            let archived = state_machine::apply_transition(
                &mut version,
                VersionStatus::Archived,
                actor_id,
                None,
                self.store.next_sequence()?,
            )?;
            self.store.save(&version, &[expired, archived])?;
            Ok(version)
        })?;

        self.dispatcher.publish(&[ApprovalEvent::VersionExpired {
            version_id: version.version_id.clone(),
            at: TimeStamp::new(),
        }]);

        Ok(version)
    }

    pub fn get(&self, version_id: &str) -> Result<TokenVersion, WorkflowError> {
        self.load(version_id)
    }

    /// Versions of a token still awaiting quorum, oldest first.
    pub fn pending_for_token(&self, token_id: &str) -> Result<Vec<TokenVersion>, WorkflowError> {
        Ok(self.store.find_pending_by_token(token_id)?)
    }

    /// Read-only ordered audit trail for a version.
    pub fn audit_trail(&self, version_id: &str) -> Result<Vec<AuditEntry>, WorkflowError> {
        Ok(self.store.audit_trail(version_id)?)
    }
}
