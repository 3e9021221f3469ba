//! Similarity metrics and the accept/reject decision policy.
//!
//! A deployment selects exactly one [`Metric`]. Its [`Polarity`] travels with
//! it inside [`DecisionPolicy`], so callers never decide comparison direction
//! themselves.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{DimensionMismatch, Embedding};

/// Whether larger or smaller scores mean "more alike".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Similarity: accept when `score >= threshold`.
    HigherIsBetter,
    /// Distance: accept when `score <= threshold`.
    LowerIsBetter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Cosine similarity in [-1, 1]. 1.0 = identical direction.
    #[default]
    Cosine,
    /// Euclidean (L2) distance in [0, inf). 0.0 = identical vectors.
    Euclidean,
}

impl Metric {
    pub fn polarity(self) -> Polarity {
        match self {
            Metric::Cosine => Polarity::HigherIsBetter,
            Metric::Euclidean => Polarity::LowerIsBetter,
        }
    }

    /// Score reached when an embedding is compared with itself.
    pub fn best_score(self) -> f32 {
        match self {
            Metric::Cosine => 1.0,
            Metric::Euclidean => 0.0,
        }
    }

    /// Score two embeddings. Symmetric in its arguments.
    pub fn score(self, a: &Embedding, b: &Embedding) -> Result<f32, DimensionMismatch> {
        b.check_dimension(a.dimension())?;
        Ok(match self {
            Metric::Cosine => cosine_similarity(a.values(), b.values()),
            Metric::Euclidean => euclidean_distance(a.values(), b.values()),
        })
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Cosine => f.write_str("cosine"),
            Metric::Euclidean => f.write_str("euclidean"),
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Metric::Cosine),
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            other => Err(format!("unknown metric '{other}' (expected cosine or euclidean)")),
        }
    }
}

/// Cosine similarity of two equal-length slices, in [-1, 1].
///
/// Accumulates in f64 so that `cosine_similarity(a, a)` is exactly 1.0 for
/// any non-zero `a`. [`Embedding`] never holds a zero vector; a zero-norm
/// slice scores 0.0.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = (norm_a * norm_b).sqrt();
    if denom > 0.0 {
        (dot / denom).clamp(-1.0, 1.0) as f32
    } else {
        0.0
    }
}

/// L2 distance, saturating at `f32::MAX` so scores always serialize as numbers.
fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x as f64 - y as f64).powi(2))
        .sum::<f64>()
        .sqrt()
        .min(f32::MAX as f64) as f32
}

/// Metric plus threshold: turns raw scores into accept/reject decisions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionPolicy {
    pub metric: Metric,
    pub threshold: f32,
}

impl DecisionPolicy {
    pub fn new(metric: Metric, threshold: f32) -> Self {
        Self { metric, threshold }
    }

    pub fn polarity(&self) -> Polarity {
        self.metric.polarity()
    }

    pub fn accepts(&self, score: f32) -> bool {
        match self.polarity() {
            Polarity::HigherIsBetter => score >= self.threshold,
            Polarity::LowerIsBetter => score <= self.threshold,
        }
    }

    /// Whether `candidate` strictly improves on `best`. Ties are not improvements.
    pub fn is_better(&self, candidate: f32, best: f32) -> bool {
        match self.polarity() {
            Polarity::HigherIsBetter => candidate > best,
            Polarity::LowerIsBetter => candidate < best,
        }
    }

    pub fn score(&self, a: &Embedding, b: &Embedding) -> Result<f32, DimensionMismatch> {
        self.metric.score(a, b)
    }

    /// Score two arbitrary embeddings and apply the threshold.
    pub fn compare(&self, a: &Embedding, b: &Embedding) -> Result<Comparison, DimensionMismatch> {
        let score = self.score(a, b)?;
        Ok(Comparison {
            score,
            matched: self.accepts(score),
            metric: self.metric,
        })
    }
}

/// Outcome of comparing two embeddings directly, outside the gallery.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub score: f32,
    pub matched: bool,
    pub metric: Metric,
}
