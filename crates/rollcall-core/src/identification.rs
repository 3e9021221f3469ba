//! 1:N identification across the whole gallery.

use std::cmp::Ordering;

use thiserror::Error;

use crate::gallery::{GalleryError, Snapshot};
use crate::metric::DecisionPolicy;
use crate::types::{Candidate, DimensionMismatch, Embedding, MatchResult, ReferenceEntry};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IdentifyError {
    #[error(transparent)]
    DimensionMismatch(#[from] DimensionMismatch),
    #[error("corrupt gallery: {0}")]
    CorruptGallery(String),
}

impl From<GalleryError> for IdentifyError {
    fn from(err: GalleryError) -> Self {
        match err {
            GalleryError::DimensionMismatch(m) => IdentifyError::DimensionMismatch(m),
            other => IdentifyError::CorruptGallery(other.to_string()),
        }
    }
}

/// Strategy for searching a gallery snapshot for a probe.
///
/// Implementations must return the same result as [`LinearScan`] whenever the
/// probe equals a stored embedding, including the lower-identity tie-break.
/// The probe has already been checked against the gallery dimension.
pub trait Matcher: Send + Sync {
    fn best_match(
        &self,
        probe: &Embedding,
        snapshot: &Snapshot<'_>,
        policy: &DecisionPolicy,
    ) -> Result<MatchResult, IdentifyError>;

    /// Top `k` candidates, best first.
    fn rank(
        &self,
        probe: &Embedding,
        snapshot: &Snapshot<'_>,
        policy: &DecisionPolicy,
        k: usize,
    ) -> Result<Vec<Candidate>, IdentifyError>;
}

/// Exhaustive scan in ascending identity order. O(N·D) per query.
///
/// Always scores every entry; there is no early exit on a good-enough match.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearScan;

impl LinearScan {
    fn score_entry(
        probe: &Embedding,
        snapshot: &Snapshot<'_>,
        policy: &DecisionPolicy,
        entry: &ReferenceEntry,
    ) -> Result<f32, IdentifyError> {
        snapshot.check_entry(entry)?;
        policy.score(probe, &entry.embedding).map_err(|m| {
            IdentifyError::CorruptGallery(format!("entry '{}': {m}", entry.identity_id))
        })
    }
}

impl Matcher for LinearScan {
    fn best_match(
        &self,
        probe: &Embedding,
        snapshot: &Snapshot<'_>,
        policy: &DecisionPolicy,
    ) -> Result<MatchResult, IdentifyError> {
        let mut best: Option<(&ReferenceEntry, f32)> = None;
        let mut compared = 0usize;

        for entry in snapshot.iter() {
            let score = Self::score_entry(probe, snapshot, policy, entry)?;
            compared += 1;
            let is_better = match best {
                None => true,
                Some((_, best_score)) => policy.is_better(score, best_score),
            };
            if is_better {
                best = Some((entry, score));
            }
        }

        Ok(match best {
            Some((entry, score)) if policy.accepts(score) => MatchResult {
                matched: true,
                identity_id: Some(entry.identity_id.clone()),
                score,
                metric: policy.metric,
                compared,
            },
            Some((_, score)) => MatchResult {
                matched: false,
                identity_id: None,
                score,
                metric: policy.metric,
                compared,
            },
            None => MatchResult::empty(policy.metric),
        })
    }

    fn rank(
        &self,
        probe: &Embedding,
        snapshot: &Snapshot<'_>,
        policy: &DecisionPolicy,
        k: usize,
    ) -> Result<Vec<Candidate>, IdentifyError> {
        let mut candidates = snapshot
            .iter()
            .map(|entry| {
                Ok(Candidate {
                    identity_id: entry.identity_id.clone(),
                    score: Self::score_entry(probe, snapshot, policy, entry)?,
                })
            })
            .collect::<Result<Vec<_>, IdentifyError>>()?;

        // Stable sort: equal scores keep ascending identity order.
        candidates.sort_by(|a, b| {
            if policy.is_better(a.score, b.score) {
                Ordering::Less
            } else if policy.is_better(b.score, a.score) {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        });
        candidates.truncate(k);
        Ok(candidates)
    }
}

/// 1:N search over a gallery snapshot using a pluggable [`Matcher`].
#[derive(Debug, Clone)]
pub struct IdentificationEngine<M = LinearScan> {
    policy: DecisionPolicy,
    matcher: M,
}

impl IdentificationEngine<LinearScan> {
    pub fn new(policy: DecisionPolicy) -> Self {
        Self::with_matcher(policy, LinearScan)
    }
}

impl<M: Matcher> IdentificationEngine<M> {
    pub fn with_matcher(policy: DecisionPolicy, matcher: M) -> Self {
        Self { policy, matcher }
    }

    pub fn policy(&self) -> &DecisionPolicy {
        &self.policy
    }

    pub fn identify(
        &self,
        snapshot: &Snapshot<'_>,
        probe: &Embedding,
    ) -> Result<MatchResult, IdentifyError> {
        snapshot.check_probe(probe)?;
        if snapshot.is_empty() {
            tracing::debug!("identify: gallery empty");
            return Ok(MatchResult::empty(self.policy.metric));
        }

        let result = self.matcher.best_match(probe, snapshot, &self.policy)?;
        tracing::debug!(
            matched = result.matched,
            identity = ?result.identity_id,
            score = result.score,
            compared = result.compared,
            "identify"
        );
        Ok(result)
    }

    pub fn rank(
        &self,
        snapshot: &Snapshot<'_>,
        probe: &Embedding,
        k: usize,
    ) -> Result<Vec<Candidate>, IdentifyError> {
        snapshot.check_probe(probe)?;
        self.matcher.rank(probe, snapshot, &self.policy, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::Gallery;
    use crate::metric::Metric;
    use crate::types::IdentityId;

    fn id(s: &str) -> IdentityId {
        IdentityId::new(s).unwrap()
    }

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec()).unwrap()
    }

    fn gallery(entries: &[(&str, &[f32])]) -> Gallery {
        let g = Gallery::new();
        for (name, values) in entries {
            g.insert(ReferenceEntry::new(id(name), emb(values))).unwrap();
        }
        g
    }

    fn cosine(threshold: f32) -> IdentificationEngine {
        IdentificationEngine::new(DecisionPolicy::new(Metric::Cosine, threshold))
    }

    #[test]
    fn test_identify_empty_gallery() {
        let g = Gallery::new();
        let result = cosine(0.5)
            .identify(&g.snapshot().unwrap(), &emb(&[1.0, 0.0]))
            .unwrap();
        assert!(!result.matched);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.compared, 0);
        assert!(result.identity_id.is_none());
    }

    #[test]
    fn test_identify_scans_all_entries() {
        // Best match is the last entry in iteration order.
        let g = gallery(&[
            ("1", &[0.0, 1.0, 0.0]),
            ("2", &[0.0, 0.0, 1.0]),
            ("3", &[1.0, 0.0, 0.0]),
        ]);
        let result = cosine(0.5)
            .identify(&g.snapshot().unwrap(), &emb(&[1.0, 0.0, 0.0]))
            .unwrap();
        assert!(result.matched);
        assert_eq!(result.identity_id, Some(id("3")));
        assert_eq!(result.score, 1.0);
        assert_eq!(result.compared, 3);
    }

    #[test]
    fn test_identify_two_identity_scenario() {
        let g = gallery(&[("A", &[1.0, 0.0]), ("B", &[0.0, 1.0])]);
        let engine = cosine(0.9);
        let snapshot = g.snapshot().unwrap();

        let hit = engine.identify(&snapshot, &emb(&[1.0, 0.0])).unwrap();
        assert!(hit.matched);
        assert_eq!(hit.identity_id, Some(id("A")));
        assert_eq!(hit.score, 1.0);

        let miss = engine.identify(&snapshot, &emb(&[0.7, 0.7])).unwrap();
        assert!(!miss.matched);
        assert!(miss.identity_id.is_none());
        assert!((miss.score - 0.7071).abs() < 1e-3);
        assert!(miss.below_threshold());
    }

    #[test]
    fn test_identify_tie_prefers_lower_identity() {
        let g = gallery(&[("zed", &[0.6, 0.8]), ("amy", &[0.6, 0.8]), ("kim", &[0.6, 0.8])]);
        let engine = cosine(0.5);
        for _ in 0..10 {
            let result = engine
                .identify(&g.snapshot().unwrap(), &emb(&[0.6, 0.8]))
                .unwrap();
            assert_eq!(result.identity_id, Some(id("amy")));
        }
    }

    #[test]
    fn test_identify_threshold_monotonic() {
        let g = gallery(&[("a", &[1.0, 0.2]), ("b", &[0.1, 1.0]), ("c", &[-1.0, 0.3])]);
        let snapshot = g.snapshot().unwrap();
        let probes = [emb(&[1.0, 0.0]), emb(&[0.5, 0.5]), emb(&[-0.2, 1.0])];
        for probe in &probes {
            let mut was_matched = true;
            for step in 0..=40 {
                let threshold = -1.0 + step as f32 * 0.05;
                let matched = cosine(threshold).identify(&snapshot, probe).unwrap().matched;
                assert!(was_matched || !matched, "match reappeared at threshold {threshold}");
                was_matched = matched;
            }
        }
    }

    #[test]
    fn test_identify_dimension_mismatch() {
        let g = gallery(&[("a", &[1.0, 0.0])]);
        let err = cosine(0.5)
            .identify(&g.snapshot().unwrap(), &emb(&[1.0]))
            .unwrap_err();
        assert_eq!(
            err,
            IdentifyError::DimensionMismatch(DimensionMismatch { expected: 2, actual: 1 })
        );
    }

    #[test]
    fn test_identify_dimension_mismatch_on_emptied_gallery() {
        let g = gallery(&[("a", &[1.0, 0.0])]);
        g.remove(&id("a")).unwrap();
        assert!(cosine(0.5)
            .identify(&g.snapshot().unwrap(), &emb(&[1.0, 0.0, 0.0]))
            .is_err());
    }

    #[test]
    fn test_identify_euclidean_picks_smallest_distance() {
        let g = gallery(&[("a", &[-1.0, -1.0]), ("b", &[1.0, 1.0])]);
        let engine = IdentificationEngine::new(DecisionPolicy::new(Metric::Euclidean, 0.6));
        let result = engine
            .identify(&g.snapshot().unwrap(), &emb(&[0.9, 0.8]))
            .unwrap();
        assert!(result.matched);
        assert_eq!(result.identity_id, Some(id("b")));
    }

    #[test]
    fn test_rank_orders_best_first_with_tie_break() {
        let g = gallery(&[("c", &[1.0, 0.0]), ("a", &[1.0, 0.0]), ("b", &[0.0, 1.0])]);
        let ranked = cosine(0.9)
            .rank(&g.snapshot().unwrap(), &emb(&[1.0, 0.0]), 2)
            .unwrap();
        let ids: Vec<&str> = ranked.iter().map(|c| c.identity_id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);
    }
}
