use thiserror::Error;

use crate::gallery::{GalleryError, Snapshot};
use crate::metric::DecisionPolicy;
use crate::types::{DimensionMismatch, Embedding, IdentityId, MatchResult};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VerifyError {
    #[error("identity '{0}' is not enrolled")]
    UnknownIdentity(IdentityId),
    #[error(transparent)]
    DimensionMismatch(#[from] DimensionMismatch),
    #[error("corrupt gallery: {0}")]
    CorruptGallery(String),
}

impl From<GalleryError> for VerifyError {
    fn from(err: GalleryError) -> Self {
        match err {
            GalleryError::DimensionMismatch(m) => VerifyError::DimensionMismatch(m),
            other => VerifyError::CorruptGallery(other.to_string()),
        }
    }
}

/// 1:1 comparison of a probe against one enrolled identity.
#[derive(Debug, Clone, Copy)]
pub struct VerificationEngine {
    policy: DecisionPolicy,
}

impl VerificationEngine {
    pub fn new(policy: DecisionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &DecisionPolicy {
        &self.policy
    }

    pub fn verify(
        &self,
        snapshot: &Snapshot<'_>,
        probe: &Embedding,
        identity_id: &IdentityId,
    ) -> Result<MatchResult, VerifyError> {
        let reference = snapshot
            .get(identity_id)
            .ok_or_else(|| VerifyError::UnknownIdentity(identity_id.clone()))?;
        snapshot.check_probe(probe)?;
        snapshot.check_entry(reference)?;

        let score = self.policy.score(probe, &reference.embedding)?;
        let matched = self.policy.accepts(score);
        tracing::debug!(identity = %identity_id, score, matched, "verify");

        Ok(MatchResult {
            matched,
            identity_id: matched.then(|| identity_id.clone()),
            score,
            metric: self.policy.metric,
            compared: 1,
        })
    }
}
