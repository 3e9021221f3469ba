use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::gallery::{Gallery, GalleryError};
use crate::store::{GalleryStore, StoreError};
use crate::types::{DimensionMismatch, Embedding, IdentityId, ReferenceEntry};

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error(transparent)]
    DimensionMismatch(#[from] DimensionMismatch),
    #[error("failed to persist gallery change: {0}")]
    Store(#[from] StoreError),
    #[error("corrupt gallery: {0}")]
    CorruptGallery(String),
}

impl From<GalleryError> for EnrollError {
    fn from(err: GalleryError) -> Self {
        match err {
            GalleryError::DimensionMismatch(m) => EnrollError::DimensionMismatch(m),
            other => EnrollError::CorruptGallery(other.to_string()),
        }
    }
}

/// The only writer of the gallery.
///
/// Writers are serialized by the mutex around the store. The store is written
/// first and the gallery write lock is held only for the in-memory change, so
/// readers never wait on storage I/O and never see an entry the store rejected.
pub struct EnrollmentManager {
    gallery: Arc<Gallery>,
    store: Mutex<Box<dyn GalleryStore>>,
}

impl EnrollmentManager {
    pub fn new(gallery: Arc<Gallery>, store: Box<dyn GalleryStore>) -> Self {
        Self {
            gallery,
            store: Mutex::new(store),
        }
    }

    pub fn gallery(&self) -> &Arc<Gallery> {
        &self.gallery
    }

    /// Enroll or re-enroll an identity. Re-enrollment replaces the old entry.
    pub fn enroll(
        &self,
        identity_id: IdentityId,
        embedding: Embedding,
    ) -> Result<ReferenceEntry, EnrollError> {
        let mut store = self
            .store
            .lock()
            .map_err(|_| EnrollError::CorruptGallery("writer lock poisoned".into()))?;

        if let Some(d) = self.gallery.dimension()? {
            embedding.check_dimension(d)?;
        }

        let entry = ReferenceEntry::new(identity_id, embedding);
        store.save(&entry)?;
        let replaced = self.gallery.insert(entry.clone())?;

        tracing::info!(
            identity = %entry.identity_id,
            dimension = entry.embedding.dimension(),
            replaced = replaced.is_some(),
            "identity enrolled"
        );
        Ok(entry)
    }

    /// Remove an identity. Revoking an unknown identity is a no-op returning `false`.
    pub fn revoke(&self, identity_id: &IdentityId) -> Result<bool, EnrollError> {
        let mut store = self
            .store
            .lock()
            .map_err(|_| EnrollError::CorruptGallery("writer lock poisoned".into()))?;

        store.remove(identity_id)?;
        let removed = self.gallery.remove(identity_id)?.is_some();

        if removed {
            tracing::info!(identity = %identity_id, "identity revoked");
        } else {
            tracing::debug!(identity = %identity_id, "revoke: identity not enrolled");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CorruptReference, MemoryStore};

    fn id(s: &str) -> IdentityId {
        IdentityId::new(s).unwrap()
    }

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec()).unwrap()
    }

    /// Store that refuses every write.
    struct FailingStore;

    impl GalleryStore for FailingStore {
        fn load(&mut self) -> Result<Vec<Result<ReferenceEntry, CorruptReference>>, StoreError> {
            Ok(Vec::new())
        }

        fn save(&mut self, _entry: &ReferenceEntry) -> Result<(), StoreError> {
            Err(StoreError::Other("disk full".into()))
        }

        fn remove(&mut self, _identity_id: &IdentityId) -> Result<bool, StoreError> {
            Err(StoreError::Other("disk full".into()))
        }
    }

    fn manager() -> EnrollmentManager {
        EnrollmentManager::new(Arc::new(Gallery::new()), Box::new(MemoryStore::new()))
    }

    #[test]
    fn test_reenroll_replaces() {
        let m = manager();
        m.enroll(id("a"), emb(&[1.0, 0.0])).unwrap();
        m.enroll(id("a"), emb(&[0.0, 1.0])).unwrap();

        let snapshot = m.gallery().snapshot().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get(&id("a")).unwrap().embedding.values(), &[0.0, 1.0]);
    }

    #[test]
    fn test_enroll_dimension_mismatch() {
        let m = manager();
        m.enroll(id("a"), emb(&[1.0, 0.0])).unwrap();
        let err = m.enroll(id("b"), emb(&[1.0, 0.0, 0.0])).unwrap_err();
        assert!(matches!(
            err,
            EnrollError::DimensionMismatch(DimensionMismatch { expected: 2, actual: 3 })
        ));
        assert_eq!(m.gallery().len().unwrap(), 1);
    }

    #[test]
    fn test_revoke_is_idempotent() {
        let m = manager();
        m.enroll(id("a"), emb(&[1.0])).unwrap();
        assert!(m.revoke(&id("a")).unwrap());
        assert!(!m.revoke(&id("a")).unwrap());
        assert!(!m.revoke(&id("never")).unwrap());
    }

    #[test]
    fn test_store_failure_leaves_gallery_untouched() {
        let m = EnrollmentManager::new(Arc::new(Gallery::new()), Box::new(FailingStore));
        let err = m.enroll(id("a"), emb(&[1.0, 0.0])).unwrap_err();
        assert!(matches!(err, EnrollError::Store(_)));
        assert_eq!(m.gallery().len().unwrap(), 0);
        assert_eq!(m.gallery().dimension().unwrap(), None);
    }
}
