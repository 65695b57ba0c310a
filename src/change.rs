//! Content-hash change detection.
//!
//! For every scanned path the [`ChangeDetector`] decides whether the file is
//! already fully handled or has to be chunked and uploaded from scratch:
//!
//! | Stored record | Hash | Status | Decision |
//! |---------------|------|--------|----------|
//! | none | – | – | [`Change::New`] (record created `Pending`) |
//! | present | equal | `Uploaded` | [`Change::Unchanged`] (nothing written) |
//! | present | differs | any | [`Change::Modified`] (hash updated, reset to `Pending`) |
//! | present | equal | `Pending` / `Failed` | [`Change::Modified`] (reset to `Pending`) |
//!
//! The old chunk set of a regenerated file is dropped by the same atomic
//! [`replace_chunks`](crate::store::IndexStore::replace_chunks) call that
//! inserts the new one, so a file is never left half old, half new.

use sha2::{Digest, Sha256};

use crate::models::{FileStatus, NewSourceFile, SourceFile};
use crate::store::{IndexStore, StoreResult};

/// Lowercase hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Outcome of [`ChangeDetector::detect`].
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// First sighting of this path.
    New(SourceFile),
    /// Content or status requires regeneration.
    Modified(SourceFile),
    /// Same hash and already uploaded; skip entirely.
    Unchanged(SourceFile),
}

impl Change {
    pub fn needs_upload(&self) -> bool {
        !matches!(self, Change::Unchanged(_))
    }

    pub fn file(&self) -> &SourceFile {
        match self {
            Change::New(f) | Change::Modified(f) | Change::Unchanged(f) => f,
        }
    }

    pub fn into_file(self) -> SourceFile {
        match self {
            Change::New(f) | Change::Modified(f) | Change::Unchanged(f) => f,
        }
    }
}

pub struct ChangeDetector<'a> {
    store: &'a dyn IndexStore,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(store: &'a dyn IndexStore) -> Self {
        Self { store }
    }

    pub async fn detect(
        &self,
        project_id: &str,
        relative_path: &str,
        hash: &str,
        size_bytes: i64,
    ) -> StoreResult<Change> {
        let existing = self.store.find_file(project_id, relative_path).await?;

        let Some(file) = existing else {
            let created = self
                .store
                .insert_file(NewSourceFile {
                    project_id: project_id.to_string(),
                    relative_path: relative_path.to_string(),
                    content_hash: hash.to_string(),
                    size_bytes,
                    status: FileStatus::Pending,
                })
                .await?;
            return Ok(Change::New(created));
        };

        if file.content_hash == hash && file.status == FileStatus::Uploaded {
            return Ok(Change::Unchanged(file));
        }

        let reset = SourceFile {
            content_hash: hash.to_string(),
            size_bytes,
            status: FileStatus::Pending,
            ..file
        };
        let updated = self.store.update_file(&reset).await?;
        Ok(Change::Modified(updated))
    }

    /// Record that `relative_path` could not be read this run. The file is
    /// marked `Failed` (created if unseen) so the next run regenerates it.
    pub async fn record_unreadable(
        &self,
        project_id: &str,
        relative_path: &str,
        size_bytes: i64,
    ) -> StoreResult<SourceFile> {
        match self.store.find_file(project_id, relative_path).await? {
            Some(file) => {
                let failed = SourceFile {
                    status: FileStatus::Failed,
                    ..file
                };
                self.store.update_file(&failed).await
            }
            None => {
                self.store
                    .insert_file(NewSourceFile {
                        project_id: project_id.to_string(),
                        relative_path: relative_path.to_string(),
                        content_hash: String::new(),
                        size_bytes,
                        status: FileStatus::Failed,
                    })
                    .await
            }
        }
    }
}
