//! Draft builder for version submissions.

use crate::error::DraftError;
use crate::policy::ChangeKind;
use crate::types::ApprovalTier;

// used for constructing drafts before they are handed to the engine
#[derive(Default)]
pub struct VersionDraft {
    token_id: Option<String>,
    payload: Vec<u8>,
    prev_version_id: Option<String>,
    change: Option<ChangeKind>,
    tier: Option<ApprovalTier>,
}

/// A validated draft, ready for `ApprovalEngine::submit` or `create`.
#[derive(Debug)]
pub struct FinalisedDraft {
    pub token_id: String,
    pub payload: Vec<u8>,
    pub prev_version_id: Option<String>,
    pub change: Option<ChangeKind>,
    pub tier: Option<ApprovalTier>,
}

impl VersionDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_token(mut self, token_id: impl Into<String>) -> Self {
        self.token_id = Some(token_id.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Chain this version onto a predecessor. The engine verifies the
    /// predecessor exists before anything persists.
    pub fn follows(mut self, prev_version_id: impl Into<String>) -> Self {
        self.prev_version_id = Some(prev_version_id.into());
        self
    }

    pub fn change_kind(mut self, change: ChangeKind) -> Self {
        self.change = Some(change);
        self
    }

    /// Pin the tier explicitly instead of going through the classification
    /// policy.
    pub fn with_tier(mut self, tier: ApprovalTier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn finalise(self) -> Result<FinalisedDraft, DraftError> {
        let token_id = self.token_id.ok_or(DraftError::MissingTokenId)?;

        if self.payload.is_empty() {
            return Err(DraftError::EmptyPayload);
        }
        if self.change.is_none() && self.tier.is_none() {
            return Err(DraftError::MissingChangeKind);
        }

        Ok(FinalisedDraft {
            token_id,
            payload: self.payload,
            prev_version_id: self.prev_version_id,
            change: self.change,
            tier: self.tier,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalise_requires_token_id() {
        let err = VersionDraft::new()
            .with_payload(b"x".to_vec())
            .change_kind(ChangeKind::Creation)
            .finalise()
            .unwrap_err();

        assert!(matches!(err, DraftError::MissingTokenId));
    }

    #[test]
    fn finalise_rejects_empty_payload() {
        let err = VersionDraft::new()
            .for_token("tok1abc")
            .change_kind(ChangeKind::Creation)
            .finalise()
            .unwrap_err();

        assert!(matches!(err, DraftError::EmptyPayload));
    }

    #[test]
    fn explicit_tier_stands_in_for_change_kind() {
        let draft = VersionDraft::new()
            .for_token("tok1abc")
            .with_payload(b"x".to_vec())
            .with_tier(ApprovalTier::Critical)
            .finalise()
            .unwrap();

        assert_eq!(draft.tier, Some(ApprovalTier::Critical));
        assert!(draft.change.is_none());
    }
}
