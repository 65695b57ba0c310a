//! File and project status aggregation, plus the read-only status report.
//!
//! - A file is `Uploaded` iff every chunk it owns carries a remote message
//!   id (vacuously true for a file with no chunks). Otherwise it is `Failed`
//!   if any chunk recorded an error, else `Pending`.
//! - A project is `Partial` if any of its files is `Failed`, else
//!   `Completed`. Computed once, after the whole file loop.

use serde::Serialize;

use crate::error::StoreError;
use crate::models::{FileChunk, FileStatus, Project, ProjectStatus, SourceFile};
use crate::store::{IndexStore, StoreResult};

pub fn file_status(chunks: &[FileChunk]) -> FileStatus {
    if chunks.iter().all(FileChunk::is_uploaded) {
        FileStatus::Uploaded
    } else if chunks.iter().any(|c| c.error.is_some()) {
        FileStatus::Failed
    } else {
        FileStatus::Pending
    }
}

/// Terminal status over every stored file record of a project.
///
/// Records are never pruned, so a file that has since been deleted or
/// excluded still counts. If such a file was `Failed`, the project stays
/// `Partial` until the record is removed.
pub fn project_status(files: &[SourceFile]) -> ProjectStatus {
    if files.iter().any(|f| f.status == FileStatus::Failed) {
        ProjectStatus::Partial
    } else {
        ProjectStatus::Completed
    }
}

pub struct StatusAggregator<'a> {
    store: &'a dyn IndexStore,
}

impl<'a> StatusAggregator<'a> {
    pub fn new(store: &'a dyn IndexStore) -> Self {
        Self { store }
    }

    /// Recompute `file`'s status from its stored chunks and persist it.
    pub async fn refresh_file(&self, file: &SourceFile) -> StoreResult<SourceFile> {
        let chunks = self.store.list_chunks(&file.id).await?;
        let status = file_status(&chunks);
        if status == file.status {
            return Ok(file.clone());
        }
        self.store
            .update_file(&SourceFile {
                status,
                ..file.clone()
            })
            .await
    }

    /// Compute and persist the terminal status of `project`.
    pub async fn finalize_project(&self, project: &Project) -> StoreResult<Project> {
        let files = self.store.list_files(&project.id).await?;
        self.store
            .update_project(&Project {
                status: project_status(&files),
                ..project.clone()
            })
            .await
    }
}

/// Per-file line of a [`ProjectReport`].
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub relative_path: String,
    pub status: FileStatus,
    pub size_bytes: i64,
    pub chunks: usize,
    pub uploaded_chunks: usize,
    pub failed_chunks: usize,
    pub percent_uploaded: u32,
    /// First recorded chunk error, if any.
    pub first_error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FileCounts {
    pub pending: usize,
    pub uploaded: usize,
    pub failed: usize,
}

/// Read-only snapshot of a project's indexing state.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectReport {
    pub project: Project,
    pub files: Vec<FileReport>,
    pub file_counts: FileCounts,
    pub total_chunks: usize,
    pub uploaded_chunks: usize,
    pub failed_chunks: usize,
}

fn percent(part: usize, whole: usize) -> u32 {
    if whole == 0 {
        100
    } else {
        ((part * 100) / whole) as u32
    }
}

pub async fn project_report(store: &dyn IndexStore, project_id: &str) -> StoreResult<ProjectReport> {
    let project = store
        .get_project(project_id)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            entity: "project",
            id: project_id.to_string(),
        })?;

    let mut files = Vec::new();
    let mut counts = FileCounts::default();
    let (mut total, mut uploaded, mut failed) = (0, 0, 0);

    for file in store.list_files(project_id).await? {
        let chunks = store.list_chunks(&file.id).await?;
        let up = chunks.iter().filter(|c| c.is_uploaded()).count();
        let err = chunks.iter().filter(|c| c.error.is_some()).count();

        match file.status {
            FileStatus::Pending => counts.pending += 1,
            FileStatus::Uploaded => counts.uploaded += 1,
            FileStatus::Failed => counts.failed += 1,
        }
        total += chunks.len();
        uploaded += up;
        failed += err;

        files.push(FileReport {
            relative_path: file.relative_path,
            status: file.status,
            size_bytes: file.size_bytes,
            chunks: chunks.len(),
            uploaded_chunks: up,
            failed_chunks: err,
            percent_uploaded: percent(up, chunks.len()),
            first_error: chunks.iter().find_map(|c| c.error.clone()),
        });
    }

    Ok(ProjectReport {
        project,
        files,
        file_counts: counts,
        total_chunks: total,
        uploaded_chunks: uploaded,
        failed_chunks: failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewSourceFile;
    use crate::store::InMemoryStore;
    use chrono::Utc;

    fn chunk(message_id: Option<&str>, error: Option<&str>) -> FileChunk {
        FileChunk {
            id: "c".into(),
            file_id: "f".into(),
            chunk_index: 0,
            content: String::new(),
            message_id: message_id.map(str::to_string),
            uploaded_at: None,
            error: error.map(str::to_string),
        }
    }

    fn file(status: FileStatus) -> SourceFile {
        SourceFile {
            id: "f".into(),
            project_id: "p".into(),
            relative_path: "a".into(),
            content_hash: "h".into(),
            size_bytes: 0,
            status,
            version: 0,
        }
    }

    #[test]
    fn file_status_rules() {
        assert_eq!(file_status(&[]), FileStatus::Uploaded);
        assert_eq!(
            file_status(&[chunk(Some("m0"), None), chunk(Some("m1"), None)]),
            FileStatus::Uploaded
        );
        assert_eq!(
            file_status(&[chunk(Some("m0"), None), chunk(None, Some("boom"))]),
            FileStatus::Failed
        );
        assert_eq!(
            file_status(&[chunk(Some("m0"), None), chunk(None, None)]),
            FileStatus::Pending
        );
    }

    #[test]
    fn project_status_rules() {
        assert_eq!(project_status(&[]), ProjectStatus::Completed);
        assert_eq!(
            project_status(&[file(FileStatus::Uploaded), file(FileStatus::Pending)]),
            ProjectStatus::Completed
        );
        assert_eq!(
            project_status(&[file(FileStatus::Uploaded), file(FileStatus::Failed)]),
            ProjectStatus::Partial
        );
    }

    #[tokio::test]
    async fn stale_failed_record_keeps_project_partial() {
        let store = InMemoryStore::new();
        let project = store.create_project("p", "/p").await.unwrap();
        for (path, status) in [("kept.rs", FileStatus::Uploaded), ("deleted.rs", FileStatus::Failed)] {
            store
                .insert_file(NewSourceFile {
                    project_id: project.id.clone(),
                    relative_path: path.into(),
                    content_hash: "h".into(),
                    size_bytes: 1,
                    status,
                })
                .await
                .unwrap();
        }

        // Only kept.rs is still on disk; finalization still sees deleted.rs.
        let finalized = StatusAggregator::new(&store)
            .finalize_project(&project)
            .await
            .unwrap();
        assert_eq!(finalized.status, ProjectStatus::Partial);
    }

    #[tokio::test]
    async fn report_percentages() {
        let store = InMemoryStore::new();
        let project = store.create_project("p", "/p").await.unwrap();
        let f = store
            .insert_file(NewSourceFile {
                project_id: project.id.clone(),
                relative_path: "a.rs".into(),
                content_hash: "h".into(),
                size_bytes: 9,
                status: FileStatus::Failed,
            })
            .await
            .unwrap();
        let chunks = store
            .replace_chunks(&f.id, &["a".into(), "b".into(), "c".into(), "d".into()])
            .await
            .unwrap();
        store
            .mark_chunk_uploaded(&chunks[0].id, "m0", Utc::now())
            .await
            .unwrap();
        store.mark_chunk_failed(&chunks[1].id, "nope").await.unwrap();

        let report = project_report(&store, &project.id).await.unwrap();
        assert_eq!(report.file_counts.failed, 1);
        assert_eq!(report.total_chunks, 4);
        assert_eq!(report.files[0].percent_uploaded, 25);
        assert_eq!(report.files[0].first_error.as_deref(), Some("nope"));
    }

    #[tokio::test]
    async fn report_for_unknown_project() {
        let store = InMemoryStore::new();
        assert!(matches!(
            project_report(&store, "missing").await,
            Err(StoreError::NotFound { .. })
        ));
    }
}
