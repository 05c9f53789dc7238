use crate::types::{ApprovalTier, VersionStatus};

/// Every failure mode the workflow can surface. Callers match on the variant
/// to decide whether a retry is safe (`ContentionTimeout`, `Store`, `Hashing`)
/// or the request is permanently invalid (everything else).
#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error("version not found: {0}")]
    VersionNotFound(String),
    #[error("version {id} is not pending approval (status: {status:?})")]
    NotPending { id: String, status: VersionStatus },
    #[error("validator {validator_id} already voted on {id} with a different decision")]
    DuplicateVote { id: String, validator_id: String },
    #[error("tier {0:?} is not configured")]
    InvalidTier(ApprovalTier),
    #[error("rollback requires an active version, {id} is {status:?}")]
    InvalidRollbackState { id: String, status: VersionStatus },
    #[error("illegal transition {from:?} -> {to:?} for {id}")]
    IllegalTransition {
        id: String,
        from: VersionStatus,
        to: VersionStatus,
    },
    #[error("timed out waiting for the lock on {0}")]
    ContentionTimeout(String),
    #[error("content hashing failed for {id}: {reason}")]
    Hashing { id: String, reason: String },
    #[error("id minting failed: {0}")]
    IdMint(String),
    #[error(transparent)]
    Draft(#[from] DraftError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(thiserror::Error, Debug)]
pub enum DraftError {
    #[error("draft is missing a token id")]
    MissingTokenId,
    #[error("draft payload is empty")]
    EmptyPayload,
    #[error("draft needs a change kind or an explicit tier")]
    MissingChangeKind,
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("version not found: {0}")]
    NotFound(String),
    #[error("codec failure: {0}")]
    Codec(String),
    #[error("sled failure: {0}")]
    Backend(#[from] sled::Error),
}
