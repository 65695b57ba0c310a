//! Persistence abstraction for projects, files, and chunks.
//!
//! The [`IndexStore`] trait is everything the pipeline needs from storage.
//! Two implementations ship with the crate: [`SqliteStore`] for the CLI and
//! [`InMemoryStore`] for tests and embedders.
//!
//! Projects and files are updated with compare-and-swap on their `version`
//! field: an update whose expected version no longer matches the stored one
//! fails with [`StoreError::Conflict`] instead of overwriting.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{FileChunk, NewSourceFile, Project, SourceFile};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Abstract storage backend for the indexing pipeline.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_project`](IndexStore::create_project) | Insert a new `Pending` project |
/// | [`update_project`](IndexStore::update_project) | CAS update of status / context id |
/// | [`find_file`](IndexStore::find_file) | Look up a file by `(project, relative path)` |
/// | [`update_file`](IndexStore::update_file) | CAS update of hash / size / status |
/// | [`replace_chunks`](IndexStore::replace_chunks) | Atomically swap a file's whole chunk set |
/// | [`mark_chunk_uploaded`](IndexStore::mark_chunk_uploaded) | Record a remote message id |
/// | [`mark_chunk_failed`](IndexStore::mark_chunk_failed) | Record a chunk's upload error |
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn create_project(&self, name: &str, root_path: &str) -> StoreResult<Project>;

    async fn get_project(&self, id: &str) -> StoreResult<Option<Project>>;

    async fn list_projects(&self) -> StoreResult<Vec<Project>>;

    /// Persist `project`'s mutable fields if the stored version still equals
    /// `project.version`. Returns the project with its bumped version.
    async fn update_project(&self, project: &Project) -> StoreResult<Project>;

    async fn find_file(
        &self,
        project_id: &str,
        relative_path: &str,
    ) -> StoreResult<Option<SourceFile>>;

    /// Fails with [`StoreError::Duplicate`] if the path is already tracked.
    async fn insert_file(&self, file: NewSourceFile) -> StoreResult<SourceFile>;

    /// CAS update, same contract as [`update_project`](IndexStore::update_project).
    async fn update_file(&self, file: &SourceFile) -> StoreResult<SourceFile>;

    /// All files of a project, ordered by relative path.
    async fn list_files(&self, project_id: &str) -> StoreResult<Vec<SourceFile>>;

    /// Delete every chunk of `file_id`, then insert `contents` as chunks
    /// `0..contents.len()`, as one atomic unit. Returns the new chunks in
    /// index order.
    async fn replace_chunks(&self, file_id: &str, contents: &[String])
        -> StoreResult<Vec<FileChunk>>;

    /// Chunks of a file, ordered by index.
    async fn list_chunks(&self, file_id: &str) -> StoreResult<Vec<FileChunk>>;

    async fn mark_chunk_uploaded(
        &self,
        chunk_id: &str,
        message_id: &str,
        uploaded_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn mark_chunk_failed(&self, chunk_id: &str, error: &str) -> StoreResult<()>;
}
