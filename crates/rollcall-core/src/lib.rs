//! rollcall-core — Face embedding matching engine.
//!
//! Holds the gallery of enrolled reference embeddings and answers
//! verification (1:1) and identification (1:N) queries against it.
//! Embedding extraction and durable storage are external collaborators,
//! reached through the [`EmbeddingExtractor`] and [`GalleryStore`] traits.

pub mod enrollment;
pub mod extractor;
pub mod facade;
pub mod gallery;
pub mod identification;
pub mod metric;
pub mod store;
pub mod types;
pub mod verification;

pub use enrollment::{EnrollError, EnrollmentManager};
pub use extractor::{EmbeddingExtractor, ExtractionError};
pub use facade::{FaceMatcher, IdentitySummary, ImageMatchError, Status};
pub use gallery::{Gallery, GalleryError, RestoreReport, Snapshot};
pub use identification::{IdentificationEngine, IdentifyError, LinearScan, Matcher};
pub use metric::{Comparison, DecisionPolicy, Metric, Polarity};
pub use store::{CorruptReference, GalleryStore, MemoryStore, StoreError};
pub use types::{
    Candidate, DimensionMismatch, Embedding, EmbeddingError, IdentityId, MatchResult,
    ReferenceEntry,
};
pub use verification::{VerificationEngine, VerifyError};
