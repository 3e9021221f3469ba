//! Durable storage contract for the gallery.
//!
//! The core only needs load-at-startup and save-on-mutation; the format is
//! up to the implementation. [`MemoryStore`] keeps everything in process.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{IdentityId, ReferenceEntry};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("gallery store backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("gallery store: {0}")]
    Other(String),
}

impl StoreError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::Backend(Box::new(err))
    }
}

/// A stored row that could not be turned into a [`ReferenceEntry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorruptReference {
    pub identity_id: String,
    pub reason: String,
}

/// Persistence backend for reference entries.
///
/// Callers serialize access; implementations need not be `Sync`.
pub trait GalleryStore: Send {
    /// Read every stored row. Rows that fail to decode are returned as
    /// [`CorruptReference`] rather than aborting the whole load.
    fn load(&mut self) -> Result<Vec<Result<ReferenceEntry, CorruptReference>>, StoreError>;

    /// Insert or replace the entry for `entry.identity_id`.
    fn save(&mut self, entry: &ReferenceEntry) -> Result<(), StoreError>;

    /// Remove an entry. Returns whether a row existed.
    fn remove(&mut self, identity_id: &IdentityId) -> Result<bool, StoreError>;
}

/// Non-durable store, for tests and deployments that re-enroll on startup.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<IdentityId, ReferenceEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl GalleryStore for MemoryStore {
    fn load(&mut self) -> Result<Vec<Result<ReferenceEntry, CorruptReference>>, StoreError> {
        Ok(self.entries.values().cloned().map(Ok).collect())
    }

    fn save(&mut self, entry: &ReferenceEntry) -> Result<(), StoreError> {
        self.entries.insert(entry.identity_id.clone(), entry.clone());
        Ok(())
    }

    fn remove(&mut self, identity_id: &IdentityId) -> Result<bool, StoreError> {
        Ok(self.entries.remove(identity_id).is_some())
    }
}
