//! Change-type classification: which tier does a mutation need?

use tracing::warn;

use crate::types::ApprovalTier;

/// The kinds of token mutation a submission can carry. `Custom` covers
/// change types this crate does not know about; the default policy fails
/// safe and routes those to the most restrictive tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Creation,
    Transfer,
    OwnershipChange,
    Retirement,
    Custom(String),
}

/// Injected, pure classification policy. Implementations must be total:
/// every input maps to some tier, unrecognized input to the most restrictive.
pub trait ChangePolicy: Send + Sync {
    fn classify(&self, change: &ChangeKind) -> ApprovalTier;
}

/// Default mapping used when the caller does not inject a policy.
pub struct DefaultChangePolicy;

impl ChangePolicy for DefaultChangePolicy {
    fn classify(&self, change: &ChangeKind) -> ApprovalTier {
        match change {
            ChangeKind::Creation => ApprovalTier::Standard,
            ChangeKind::Transfer => ApprovalTier::Elevated,
            ChangeKind::OwnershipChange => ApprovalTier::Elevated,
            ChangeKind::Retirement => ApprovalTier::Critical,
            ChangeKind::Custom(name) => {
                warn!(change = %name, "unrecognized change kind, failing safe to critical tier");
                ApprovalTier::Critical
            }
        }
    }
}
