use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metric::Metric;

/// Two embeddings (or an embedding and the gallery) disagree on length.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("embedding dimension mismatch: expected {expected}, got {actual}")]
pub struct DimensionMismatch {
    pub expected: usize,
    pub actual: usize,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingError {
    #[error("embedding has no values")]
    Empty,
    #[error("embedding value at index {index} is not finite")]
    NonFinite { index: usize },
    #[error("embedding value at index {index} is outside the f32 range")]
    OutOfRange { index: usize },
    #[error("embedding has zero norm")]
    ZeroNorm,
    #[error("identity id must not be empty")]
    EmptyIdentity,
}

/// Face embedding vector as produced by the external recognition model
/// (e.g. 128 values for Facenet, 512 for ArcFace).
///
/// Always non-empty with finite components and at least one non-zero value;
/// construction rejects anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Result<Self, EmbeddingError> {
        if values.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(EmbeddingError::NonFinite { index });
        }
        if values.iter().all(|&v| v == 0.0) {
            return Err(EmbeddingError::ZeroNorm);
        }
        Ok(Self { values })
    }

    /// Build from `f64` values, as carried over D-Bus and JSON.
    pub fn from_f64(values: &[f64]) -> Result<Self, EmbeddingError> {
        if let Some(index) = values
            .iter()
            .position(|v| v.is_finite() && v.abs() > f32::MAX as f64)
        {
            return Err(EmbeddingError::OutOfRange { index });
        }
        Self::new(values.iter().map(|&v| v as f32).collect())
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }

    /// Fail with [`DimensionMismatch`] unless this embedding has `expected` values.
    pub fn check_dimension(&self, expected: usize) -> Result<(), DimensionMismatch> {
        if self.values.len() == expected {
            Ok(())
        } else {
            Err(DimensionMismatch {
                expected,
                actual: self.values.len(),
            })
        }
    }
}

impl TryFrom<Vec<f32>> for Embedding {
    type Error = EmbeddingError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<Embedding> for Vec<f32> {
    fn from(embedding: Embedding) -> Self {
        embedding.values
    }
}

/// Opaque key of an enrolled identity. Ordered by byte-wise string comparison,
/// which is the gallery's iteration and tie-break order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdentityId(String);

impl IdentityId {
    pub fn new(id: impl Into<String>) -> Result<Self, EmbeddingError> {
        let id = id.into();
        if id.is_empty() {
            return Err(EmbeddingError::EmptyIdentity);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for IdentityId {
    type Error = EmbeddingError;

    fn try_from(id: String) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl From<IdentityId> for String {
    fn from(id: IdentityId) -> Self {
        id.0
    }
}

/// An enrolled identity's reference embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub identity_id: IdentityId,
    pub embedding: Embedding,
    pub enrolled_at: DateTime<Utc>,
}

impl ReferenceEntry {
    pub fn new(identity_id: IdentityId, embedding: Embedding) -> Self {
        Self {
            identity_id,
            embedding,
            enrolled_at: Utc::now(),
        }
    }
}

/// Result of matching a probe embedding against one identity or the whole gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub matched: bool,
    /// Matched identity; always `None` when `matched` is false.
    pub identity_id: Option<IdentityId>,
    /// Best score observed. 0.0 when nothing was compared.
    pub score: f32,
    pub metric: Metric,
    /// Number of reference entries scored. Zero means the gallery was empty.
    pub compared: usize,
}

impl MatchResult {
    /// Terminal result for a scan over an empty gallery.
    pub fn empty(metric: Metric) -> Self {
        Self {
            matched: false,
            identity_id: None,
            score: 0.0,
            metric,
            compared: 0,
        }
    }

    /// True when entries were scored but none passed the threshold.
    pub fn below_threshold(&self) -> bool {
        !self.matched && self.compared > 0
    }
}

/// A scored gallery entry, as returned by ranking queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub identity_id: IdentityId,
    pub score: f32,
}
