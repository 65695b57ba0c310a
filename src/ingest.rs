//! Indexing pipeline orchestration.
//!
//! One [`Indexer::run`] drives a full pass over a project:
//! scan → per file (detect change → chunk → upload → refresh status) →
//! project status. Files and chunks are handled strictly one at a time.
//!
//! The run never holds chunk data only in memory: chunks are persisted
//! before they are uploaded, and every upload result is written as soon as
//! it arrives. Cancelling therefore leaves consistent state behind, with
//! the project still `Indexing` and interrupted files still `Pending`.
//!
//! At most one run per project may be active at a time. That is the
//! caller's job; this module does not lock.

use anyhow::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::change::{content_hash, ChangeDetector};
use crate::chunk::Chunker;
use crate::config::{Config, IndexingConfig};
use crate::db;
use crate::error::IndexError;
use crate::models::{FileStatus, Project, ProjectStatus};
use crate::progress::{IndexProgressEvent, NoProgress, ProgressMode, ProgressReporter};
use crate::remote::{KnowledgeStore, OpenAiThreadsClient};
use crate::scanner::{read_source, relative_path, Scanner};
use crate::status::StatusAggregator;
use crate::store::{IndexStore, SqliteStore};
use crate::upload::UploadCoordinator;

/// Counters for one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub project_id: String,
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub files_regenerated: usize,
    pub files_failed: usize,
    pub chunks_created: usize,
    pub chunks_uploaded: usize,
    pub chunks_failed: usize,
    pub status: Option<ProjectStatus>,
}

pub struct Indexer {
    store: Arc<dyn IndexStore>,
    remote: Arc<dyn KnowledgeStore>,
    settings: IndexingConfig,
    progress: Box<dyn ProgressReporter>,
}

impl Indexer {
    pub fn new(
        store: Arc<dyn IndexStore>,
        remote: Arc<dyn KnowledgeStore>,
        settings: IndexingConfig,
    ) -> Self {
        Self {
            store,
            remote,
            settings,
            progress: Box::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Index `project_id` once.
    ///
    /// Invalid chunk or scan settings fail with
    /// [`IndexError::Configuration`] before anything is read or written. A
    /// scan failure aborts before the project leaves its current status.
    pub async fn run(
        &self,
        project_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RunReport, IndexError> {
        let chunker = Chunker::from_config(&self.settings.chunk)?;
        let scanner = Scanner::from_config(&self.settings)?;

        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| IndexError::ProjectNotFound(project_id.to_string()))?;

        let root = PathBuf::from(&project.root_path);
        self.progress.report(IndexProgressEvent::Scanning {
            project: project.name.clone(),
        });
        let paths = scanner.scan(&root)?;

        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }

        let mut project = self
            .store
            .update_project(&Project {
                status: ProjectStatus::Indexing,
                ..project
            })
            .await?;
        info!(
            project_id = %project.id,
            root = %root.display(),
            candidates = paths.len(),
            "indexing started"
        );

        let mut report = RunReport {
            project_id: project.id.clone(),
            files_scanned: paths.len(),
            ..RunReport::default()
        };
        let mut coordinator =
            UploadCoordinator::new(self.store.as_ref(), self.remote.as_ref(), cancel);

        let total = paths.len() as u64;
        for (n, path) in paths.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(project_id = %project.id, "indexing cancelled");
                return Err(IndexError::Cancelled);
            }

            let rel = relative_path(&root, path);
            self.index_file(&mut project, &mut coordinator, &chunker, path, &rel, &mut report)
                .await
                .inspect_err(|e| {
                    if matches!(e, IndexError::Cancelled) {
                        info!(project_id = %project_id, file = %rel, "indexing cancelled");
                    }
                })?;

            self.progress.report(IndexProgressEvent::Indexing {
                project: project.name.clone(),
                n: n as u64 + 1,
                total,
                path: rel,
            });
        }

        let project = StatusAggregator::new(self.store.as_ref())
            .finalize_project(&project)
            .await?;
        report.status = Some(project.status);

        info!(
            project_id = %project.id,
            status = %project.status,
            skipped = report.files_skipped,
            regenerated = report.files_regenerated,
            failed = report.files_failed,
            chunks_uploaded = report.chunks_uploaded,
            chunks_failed = report.chunks_failed,
            "indexing finished"
        );
        Ok(report)
    }

    async fn index_file(
        &self,
        project: &mut Project,
        coordinator: &mut UploadCoordinator<'_>,
        chunker: &Chunker,
        path: &Path,
        rel: &str,
        report: &mut RunReport,
    ) -> Result<(), IndexError> {
        let store = self.store.as_ref();
        let detector = ChangeDetector::new(store);

        let bytes = match read_source(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "file unreadable, marking failed");
                let size = tokio::fs::metadata(path)
                    .await
                    .map(|m| m.len() as i64)
                    .unwrap_or(0);
                detector.record_unreadable(&project.id, rel, size).await?;
                report.files_failed += 1;
                return Ok(());
            }
        };

        let hash = content_hash(&bytes);
        let change = detector
            .detect(&project.id, rel, &hash, bytes.len() as i64)
            .await?;
        if !change.needs_upload() {
            debug!(file = %rel, "unchanged, skipping");
            report.files_skipped += 1;
            return Ok(());
        }

        let file = change.into_file();
        let text = String::from_utf8_lossy(&bytes);
        let contents: Vec<String> = chunker.chunks(&text).map(str::to_string).collect();
        let chunks = store.replace_chunks(&file.id, &contents).await?;
        report.chunks_created += chunks.len();
        debug!(file = %rel, chunks = chunks.len(), "regenerated chunks");

        let outcome = coordinator.upload_file(project, &file, &chunks).await?;
        report.chunks_uploaded += outcome.uploaded;
        report.chunks_failed += outcome.failed;

        let file = StatusAggregator::new(store).refresh_file(&file).await?;
        report.files_regenerated += 1;
        if file.status == FileStatus::Failed {
            report.files_failed += 1;
        }
        Ok(())
    }
}

/// CLI entry point: index one project against the configured database and
/// remote, printing a summary on stdout. Ctrl-C cancels the run.
pub async fn run_index(config: &Config, project_id: &str, progress: ProgressMode) -> Result<()> {
    let pool = db::connect(config).await?;
    let store: Arc<dyn IndexStore> = Arc::new(SqliteStore::new(pool.clone()));
    let remote: Arc<dyn KnowledgeStore> = Arc::new(OpenAiThreadsClient::new(&config.remote)?);

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current step");
            on_ctrl_c.cancel();
        }
    });

    let indexer = Indexer::new(store, remote, config.indexing.clone())
        .with_progress(progress.reporter());
    let result = indexer.run(project_id, &cancel).await;
    pool.close().await;
    let report = result?;

    println!("index {}", report.project_id);
    println!("  files scanned: {}", report.files_scanned);
    println!("  files skipped (unchanged): {}", report.files_skipped);
    println!("  files regenerated: {}", report.files_regenerated);
    println!("  files failed: {}", report.files_failed);
    println!("  chunks created: {}", report.chunks_created);
    println!("  chunks uploaded: {}", report.chunks_uploaded);
    println!("  chunks failed: {}", report.chunks_failed);
    if let Some(status) = report.status {
        println!("  status: {}", status);
    }
    println!("ok");

    Ok(())
}
