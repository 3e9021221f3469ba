//! [`FaceMatcher`]: the gallery plus both engines and the enrollment manager,
//! behind the four operations the outer service layer calls.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::enrollment::{EnrollError, EnrollmentManager};
use crate::extractor::{EmbeddingExtractor, ExtractionError};
use crate::gallery::{Gallery, GalleryError, RestoreReport};
use crate::identification::{IdentificationEngine, IdentifyError, LinearScan, Matcher};
use crate::metric::{Comparison, DecisionPolicy, Metric, Polarity};
use crate::store::{GalleryStore, StoreError};
use crate::types::{Candidate, DimensionMismatch, Embedding, IdentityId, MatchResult, ReferenceEntry};
use crate::verification::{VerificationEngine, VerifyError};

/// Failure of an image-driven operation: either extraction or matching.
#[derive(Error, Debug)]
pub enum ImageMatchError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Enroll(#[from] EnrollError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error(transparent)]
    Identify(#[from] IdentifyError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub metric: Metric,
    pub polarity: Polarity,
    pub threshold: f32,
    pub dimension: Option<usize>,
    pub enrolled: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentitySummary {
    pub identity_id: IdentityId,
    pub enrolled_at: DateTime<Utc>,
}

pub struct FaceMatcher<M = LinearScan> {
    gallery: Arc<Gallery>,
    enrollment: EnrollmentManager,
    verification: VerificationEngine,
    identification: IdentificationEngine<M>,
}

impl FaceMatcher<LinearScan> {
    /// Load the gallery from `store` and build a matcher around it.
    ///
    /// Corrupt rows are skipped and listed in the returned [`RestoreReport`].
    pub fn open(
        policy: DecisionPolicy,
        pinned_dimension: Option<usize>,
        mut store: Box<dyn GalleryStore>,
    ) -> Result<(Self, RestoreReport), StoreError> {
        let rows = store.load()?;
        let (gallery, report) = Gallery::restore(pinned_dimension, rows);
        let matcher = Self::with_matcher(policy, Arc::new(gallery), store, LinearScan);
        Ok((matcher, report))
    }
}

impl<M: Matcher> FaceMatcher<M> {
    pub fn with_matcher(
        policy: DecisionPolicy,
        gallery: Arc<Gallery>,
        store: Box<dyn GalleryStore>,
        matcher: M,
    ) -> Self {
        Self {
            enrollment: EnrollmentManager::new(Arc::clone(&gallery), store),
            gallery,
            verification: VerificationEngine::new(policy),
            identification: IdentificationEngine::with_matcher(policy, matcher),
        }
    }

    pub fn policy(&self) -> &DecisionPolicy {
        self.verification.policy()
    }

    pub fn gallery(&self) -> &Arc<Gallery> {
        &self.gallery
    }

    pub fn enroll(
        &self,
        identity_id: IdentityId,
        embedding: Embedding,
    ) -> Result<ReferenceEntry, EnrollError> {
        self.enrollment.enroll(identity_id, embedding)
    }

    pub fn revoke(&self, identity_id: &IdentityId) -> Result<bool, EnrollError> {
        self.enrollment.revoke(identity_id)
    }

    pub fn verify(
        &self,
        probe: &Embedding,
        identity_id: &IdentityId,
    ) -> Result<MatchResult, VerifyError> {
        let snapshot = self.gallery.snapshot()?;
        self.verification.verify(&snapshot, probe, identity_id)
    }

    pub fn identify(&self, probe: &Embedding) -> Result<MatchResult, IdentifyError> {
        let snapshot = self.gallery.snapshot()?;
        self.identification.identify(&snapshot, probe)
    }

    pub fn rank(&self, probe: &Embedding, k: usize) -> Result<Vec<Candidate>, IdentifyError> {
        let snapshot = self.gallery.snapshot()?;
        self.identification.rank(&snapshot, probe, k)
    }

    /// Score two embeddings directly against the configured policy.
    pub fn compare(&self, a: &Embedding, b: &Embedding) -> Result<Comparison, DimensionMismatch> {
        self.policy().compare(a, b)
    }

    pub fn status(&self) -> Result<Status, GalleryError> {
        let snapshot = self.gallery.snapshot()?;
        let policy = self.policy();
        Ok(Status {
            metric: policy.metric,
            polarity: policy.polarity(),
            threshold: policy.threshold,
            dimension: snapshot.dimension(),
            enrolled: snapshot.len(),
        })
    }

    pub fn identities(&self) -> Result<Vec<IdentitySummary>, GalleryError> {
        let snapshot = self.gallery.snapshot()?;
        Ok(snapshot
            .iter()
            .map(|e| IdentitySummary {
                identity_id: e.identity_id.clone(),
                enrolled_at: e.enrolled_at,
            })
            .collect())
    }

    pub fn enroll_image(
        &self,
        extractor: &dyn EmbeddingExtractor,
        identity_id: IdentityId,
        image: &[u8],
    ) -> Result<ReferenceEntry, ImageMatchError> {
        let embedding = extractor.extract(image)?;
        Ok(self.enroll(identity_id, embedding)?)
    }

    pub fn verify_image(
        &self,
        extractor: &dyn EmbeddingExtractor,
        image: &[u8],
        identity_id: &IdentityId,
    ) -> Result<MatchResult, ImageMatchError> {
        let probe = extractor.extract(image)?;
        Ok(self.verify(&probe, identity_id)?)
    }

    pub fn identify_image(
        &self,
        extractor: &dyn EmbeddingExtractor,
        image: &[u8],
    ) -> Result<MatchResult, ImageMatchError> {
        let probe = extractor.extract(image)?;
        Ok(self.identify(&probe)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn id(s: &str) -> IdentityId {
        IdentityId::new(s).unwrap()
    }

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec()).unwrap()
    }

    fn matcher(threshold: f32) -> FaceMatcher {
        let policy = DecisionPolicy::new(Metric::Cosine, threshold);
        FaceMatcher::open(policy, None, Box::new(MemoryStore::new()))
            .unwrap()
            .0
    }

    /// Treats the image bytes as little-endian f32 values; empty input has no face.
    fn byte_extractor(image: &[u8]) -> Result<Embedding, ExtractionError> {
        if image.is_empty() {
            return Err(ExtractionError::NoFaceDetected);
        }
        if image.len() % 4 != 0 {
            return Err(ExtractionError::MalformedImage(format!("{} bytes", image.len())));
        }
        let values = image
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Embedding::new(values).map_err(|e| ExtractionError::Backend(e.to_string()))
    }

    fn image(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_status_reports_policy_and_size() {
        let m = matcher(0.6);
        m.enroll(id("a"), emb(&[1.0, 0.0])).unwrap();
        let status = m.status().unwrap();
        assert_eq!(status.metric, Metric::Cosine);
        assert_eq!(status.polarity, Polarity::HigherIsBetter);
        assert_eq!(status.dimension, Some(2));
        assert_eq!(status.enrolled, 1);
    }

    #[test]
    fn test_open_restores_from_store() {
        let mut store = MemoryStore::new();
        store
            .save(&ReferenceEntry::new(id("a"), emb(&[1.0, 0.0])))
            .unwrap();
        let policy = DecisionPolicy::new(Metric::Cosine, 0.9);
        let (m, report) = FaceMatcher::open(policy, None, Box::new(store)).unwrap();
        assert_eq!(report.restored, 1);
        assert!(m.verify(&emb(&[1.0, 0.0]), &id("a")).unwrap().matched);
    }

    #[test]
    fn test_image_operations_use_extractor() {
        let m = matcher(0.9);
        m.enroll_image(&byte_extractor, id("a"), &image(&[1.0, 0.0]))
            .unwrap();

        let hit = m.identify_image(&byte_extractor, &image(&[1.0, 0.0])).unwrap();
        assert_eq!(hit.identity_id, Some(id("a")));

        let verified = m
            .verify_image(&byte_extractor, &image(&[0.0, 1.0]), &id("a"))
            .unwrap();
        assert!(!verified.matched);
    }

    #[test]
    fn test_extraction_errors_surface_unchanged() {
        let m = matcher(0.9);
        let err = m.identify_image(&byte_extractor, &[]).unwrap_err();
        assert!(matches!(
            err,
            ImageMatchError::Extraction(ExtractionError::NoFaceDetected)
        ));

        let err = m.enroll_image(&byte_extractor, id("a"), &[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            ImageMatchError::Extraction(ExtractionError::MalformedImage(_))
        ));
        assert_eq!(m.status().unwrap().enrolled, 0);
    }

    #[test]
    fn test_identities_listed_in_order() {
        let m = matcher(0.9);
        m.enroll(id("b"), emb(&[1.0])).unwrap();
        m.enroll(id("a"), emb(&[1.0])).unwrap();
        let ids: Vec<String> = m
            .identities()
            .unwrap()
            .into_iter()
            .map(|s| s.identity_id.to_string())
            .collect();
        assert_eq!(ids, ["a", "b"]);
    }
}
