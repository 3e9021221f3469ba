//! The gallery: enrolled reference embeddings keyed by identity.
//!
//! Readers take a [`Snapshot`] (a read guard) for the duration of one scan, so
//! a concurrent enroll or revoke is never observed half-applied. Mutation is
//! crate-private and goes through [`EnrollmentManager`](crate::EnrollmentManager).

use std::collections::btree_map::Values;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use thiserror::Error;

use crate::store::CorruptReference;
use crate::types::{DimensionMismatch, Embedding, IdentityId, ReferenceEntry};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GalleryError {
    #[error(transparent)]
    DimensionMismatch(#[from] DimensionMismatch),
    #[error("gallery lock poisoned by a panicked writer")]
    Poisoned,
    #[error("gallery entry '{identity_id}' is corrupt: {reason}")]
    Corrupt { identity_id: IdentityId, reason: String },
}

#[derive(Debug, Default)]
struct GalleryState {
    /// Fixed by configuration or by the first accepted entry; never cleared.
    dimension: Option<usize>,
    entries: BTreeMap<IdentityId, ReferenceEntry>,
}

/// Outcome of rebuilding the gallery from durable storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RestoreReport {
    pub restored: usize,
    pub dimension: Option<usize>,
    /// Rows skipped, in ascending identity order.
    pub skipped: Vec<CorruptReference>,
}

#[derive(Debug, Default)]
pub struct Gallery {
    state: RwLock<GalleryState>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty gallery whose dimension is fixed up front.
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            state: RwLock::new(GalleryState {
                dimension: Some(dimension),
                entries: BTreeMap::new(),
            }),
        }
    }

    /// Rebuild a gallery from stored rows.
    ///
    /// Undecodable rows, duplicates and rows whose dimension disagrees with the
    /// gallery are skipped and reported. Without a `pinned` dimension, the most
    /// common dimension among valid rows wins (ties go to the smaller one).
    pub fn restore(
        pinned: Option<usize>,
        rows: impl IntoIterator<Item = Result<ReferenceEntry, CorruptReference>>,
    ) -> (Self, RestoreReport) {
        let mut skipped = Vec::new();
        let mut decoded: BTreeMap<IdentityId, ReferenceEntry> = BTreeMap::new();

        for row in rows {
            match row {
                Ok(entry) => {
                    if decoded.contains_key(&entry.identity_id) {
                        skipped.push(CorruptReference {
                            identity_id: entry.identity_id.to_string(),
                            reason: "duplicate identity in store".into(),
                        });
                    } else {
                        decoded.insert(entry.identity_id.clone(), entry);
                    }
                }
                Err(corrupt) => skipped.push(corrupt),
            }
        }

        let dimension = pinned.or_else(|| majority_dimension(decoded.values()));

        let mut entries = BTreeMap::new();
        for (id, entry) in decoded {
            match dimension.map(|d| entry.embedding.check_dimension(d)) {
                Some(Err(mismatch)) => skipped.push(CorruptReference {
                    identity_id: id.to_string(),
                    reason: mismatch.to_string(),
                }),
                _ => {
                    entries.insert(id, entry);
                }
            }
        }

        skipped.sort_by(|a, b| a.identity_id.cmp(&b.identity_id));
        for s in &skipped {
            tracing::warn!(identity = %s.identity_id, reason = %s.reason, "skipping corrupt reference entry");
        }

        let report = RestoreReport {
            restored: entries.len(),
            dimension,
            skipped,
        };
        tracing::info!(
            restored = report.restored,
            skipped = report.skipped.len(),
            dimension = ?report.dimension,
            "gallery restored"
        );

        let gallery = Self {
            state: RwLock::new(GalleryState { dimension, entries }),
        };
        (gallery, report)
    }

    /// Read-consistent view of the gallery, held until dropped.
    pub fn snapshot(&self) -> Result<Snapshot<'_>, GalleryError> {
        let guard = self.state.read().map_err(|_| GalleryError::Poisoned)?;
        Ok(Snapshot { guard })
    }

    pub fn dimension(&self) -> Result<Option<usize>, GalleryError> {
        Ok(self.snapshot()?.dimension())
    }

    pub fn len(&self) -> Result<usize, GalleryError> {
        Ok(self.snapshot()?.len())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, GalleryState>, GalleryError> {
        self.state.write().map_err(|_| GalleryError::Poisoned)
    }

    /// Insert or replace an entry, pinning the dimension on first insert.
    /// Returns the replaced entry, if any.
    pub(crate) fn insert(&self, entry: ReferenceEntry) -> Result<Option<ReferenceEntry>, GalleryError> {
        let mut state = self.write()?;
        match state.dimension {
            Some(d) => entry.embedding.check_dimension(d)?,
            None => state.dimension = Some(entry.embedding.dimension()),
        }
        Ok(state.entries.insert(entry.identity_id.clone(), entry))
    }

    pub(crate) fn remove(&self, identity_id: &IdentityId) -> Result<Option<ReferenceEntry>, GalleryError> {
        Ok(self.write()?.entries.remove(identity_id))
    }
}

fn majority_dimension<'a>(entries: impl Iterator<Item = &'a ReferenceEntry>) -> Option<usize> {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for entry in entries {
        *counts.entry(entry.embedding.dimension()).or_default() += 1;
    }
    // On equal counts the smaller dimension orders higher.
    counts
        .into_iter()
        .max_by(|(da, ca), (db, cb)| ca.cmp(cb).then(db.cmp(da)))
        .map(|(d, _)| d)
}

/// Read guard over the gallery. Iteration is in ascending identity order.
pub struct Snapshot<'a> {
    guard: RwLockReadGuard<'a, GalleryState>,
}

impl<'a> Snapshot<'a> {
    pub fn dimension(&self) -> Option<usize> {
        self.guard.dimension
    }

    pub fn len(&self) -> usize {
        self.guard.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard.entries.is_empty()
    }

    pub fn get(&self, identity_id: &IdentityId) -> Option<&ReferenceEntry> {
        self.guard.entries.get(identity_id)
    }

    pub fn iter(&self) -> Values<'_, IdentityId, ReferenceEntry> {
        self.guard.entries.values()
    }

    /// Fail unless `probe` has the gallery's dimension. Any probe passes
    /// while the dimension is still unset.
    pub fn check_probe(&self, probe: &Embedding) -> Result<(), DimensionMismatch> {
        match self.guard.dimension {
            Some(d) => probe.check_dimension(d),
            None => Ok(()),
        }
    }

    /// Verify an entry read during a scan still agrees with the gallery dimension.
    pub(crate) fn check_entry(&self, entry: &ReferenceEntry) -> Result<(), GalleryError> {
        match self.guard.dimension {
            Some(d) if entry.embedding.dimension() != d => Err(GalleryError::Corrupt {
                identity_id: entry.identity_id.clone(),
                reason: format!(
                    "stored dimension {} differs from gallery dimension {d}",
                    entry.embedding.dimension()
                ),
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, values: &[f32]) -> ReferenceEntry {
        ReferenceEntry::new(
            IdentityId::new(id).unwrap(),
            Embedding::new(values.to_vec()).unwrap(),
        )
    }

    #[test]
    fn test_insert_pins_dimension() {
        let gallery = Gallery::new();
        assert_eq!(gallery.dimension().unwrap(), None);
        gallery.insert(entry("a", &[1.0, 0.0])).unwrap();
        assert_eq!(gallery.dimension().unwrap(), Some(2));

        let err = gallery.insert(entry("b", &[1.0, 0.0, 0.0])).unwrap_err();
        assert_eq!(
            err,
            GalleryError::DimensionMismatch(DimensionMismatch { expected: 2, actual: 3 })
        );
    }

    #[test]
    fn test_dimension_survives_removal() {
        let gallery = Gallery::new();
        let id = IdentityId::new("a").unwrap();
        gallery.insert(entry("a", &[1.0, 0.0])).unwrap();
        gallery.remove(&id).unwrap();
        assert_eq!(gallery.len().unwrap(), 0);
        assert_eq!(gallery.dimension().unwrap(), Some(2));
        assert!(gallery.insert(entry("a", &[1.0])).is_err());
    }

    #[test]
    fn test_insert_replaces() {
        let gallery = Gallery::new();
        assert!(gallery.insert(entry("a", &[1.0, 0.0])).unwrap().is_none());
        let replaced = gallery.insert(entry("a", &[0.0, 1.0])).unwrap();
        assert_eq!(replaced.unwrap().embedding.values(), &[1.0, 0.0]);
        assert_eq!(gallery.len().unwrap(), 1);
    }

    #[test]
    fn test_snapshot_iterates_ascending() {
        let gallery = Gallery::new();
        for id in ["carol", "alice", "bob"] {
            gallery.insert(entry(id, &[1.0])).unwrap();
        }
        let snapshot = gallery.snapshot().unwrap();
        let ids: Vec<&str> = snapshot.iter().map(|e| e.identity_id.as_str()).collect();
        assert_eq!(ids, ["alice", "bob", "carol"]);
    }

    #[test]
    fn test_restore_skips_corrupt_rows_deterministically() {
        let rows = vec![
            Ok(entry("d", &[1.0, 2.0, 3.0])),
            Err(CorruptReference {
                identity_id: "c".into(),
                reason: "blob length 7 is not a multiple of 4".into(),
            }),
            Ok(entry("b", &[1.0, 0.0])),
            Ok(entry("a", &[0.0, 1.0])),
        ];
        let (gallery, report) = Gallery::restore(None, rows);
        assert_eq!(report.restored, 2);
        assert_eq!(report.dimension, Some(2));
        let skipped: Vec<&str> = report.skipped.iter().map(|s| s.identity_id.as_str()).collect();
        assert_eq!(skipped, ["c", "d"]);
        assert_eq!(gallery.len().unwrap(), 2);
    }

    #[test]
    fn test_restore_honours_pinned_dimension() {
        let rows = vec![Ok(entry("a", &[1.0, 0.0])), Ok(entry("b", &[1.0, 0.0, 0.0]))];
        let (gallery, report) = Gallery::restore(Some(3), rows);
        assert_eq!(report.restored, 1);
        assert_eq!(report.skipped[0].identity_id, "a");
        assert!(gallery.snapshot().unwrap().get(&IdentityId::new("b").unwrap()).is_some());
    }

    #[test]
    fn test_restore_majority_tie_prefers_smaller_dimension() {
        let rows = vec![Ok(entry("a", &[1.0, 0.0, 0.0])), Ok(entry("b", &[1.0, 0.0]))];
        let (_, report) = Gallery::restore(None, rows);
        assert_eq!(report.dimension, Some(2));
    }

    #[test]
    fn test_check_probe_without_dimension() {
        let gallery = Gallery::new();
        let probe = Embedding::new(vec![1.0, 2.0, 3.0]).unwrap();
        assert!(gallery.snapshot().unwrap().check_probe(&probe).is_ok());

        let pinned = Gallery::with_dimension(2);
        assert!(pinned.snapshot().unwrap().check_probe(&probe).is_err());
    }
}
