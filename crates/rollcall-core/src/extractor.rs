//! Contract with the external face embedding model.
//!
//! Image decoding and inference live outside this crate. The matcher only
//! consumes the embeddings an [`EmbeddingExtractor`] produces, and always
//! calls it before taking any gallery lock.

use thiserror::Error;

use crate::types::Embedding;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("no face detected in image")]
    NoFaceDetected,
    #[error("malformed image: {0}")]
    MalformedImage(String),
    #[error("extraction backend failed: {0}")]
    Backend(String),
}

/// Raw image bytes in, one fixed-dimension embedding out.
pub trait EmbeddingExtractor: Send + Sync {
    fn extract(&self, image: &[u8]) -> Result<Embedding, ExtractionError>;
}

impl<F> EmbeddingExtractor for F
where
    F: Fn(&[u8]) -> Result<Embedding, ExtractionError> + Send + Sync,
{
    fn extract(&self, image: &[u8]) -> Result<Embedding, ExtractionError> {
        self(image)
    }
}
