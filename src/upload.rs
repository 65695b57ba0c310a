//! Chunk upload with per-chunk failure isolation.
//!
//! The [`UploadCoordinator`] lives for one run. It resolves the project's
//! conversation context at most once, lazily, on the first chunk that needs
//! it, and then posts chunks in index order. A remote failure is written to
//! the chunk's `error` field and the loop moves on; only cancellation and
//! persistence failures stop it.
//!
//! A chunk that fails is not retried in the same run. It is retried when a
//! later run regenerates its file, which happens whenever the file is not
//! `Uploaded`.

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{IndexError, RemoteError};
use crate::models::{FileChunk, Project, SourceFile};
use crate::remote::{ChunkMetadata, KnowledgeStore};
use crate::store::IndexStore;

/// Role under which chunks are posted to the conversation context.
pub const UPLOAD_ROLE: &str = "user";

#[derive(Debug, Clone)]
enum ContextState {
    Unresolved,
    Ready(String),
    /// Ensure failed this run; holds the error text.
    Unavailable(String),
}

/// Per-file upload tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadOutcome {
    pub uploaded: usize,
    pub failed: usize,
}

pub struct UploadCoordinator<'a> {
    store: &'a dyn IndexStore,
    remote: &'a dyn KnowledgeStore,
    cancel: &'a CancellationToken,
    context: ContextState,
}

impl<'a> UploadCoordinator<'a> {
    pub fn new(
        store: &'a dyn IndexStore,
        remote: &'a dyn KnowledgeStore,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            store,
            remote,
            cancel,
            context: ContextState::Unresolved,
        }
    }

    fn check_cancelled(&self) -> Result<(), IndexError> {
        if self.cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }
        Ok(())
    }

    /// Resolve the project's context id, creating and persisting one if the
    /// project has none. `Ok(Err(reason))` means the remote refused this run.
    pub async fn ensure_context(
        &mut self,
        project: &mut Project,
    ) -> Result<Result<String, String>, IndexError> {
        match &self.context {
            ContextState::Ready(id) => return Ok(Ok(id.clone())),
            ContextState::Unavailable(reason) => return Ok(Err(reason.clone())),
            ContextState::Unresolved => {}
        }

        self.check_cancelled()?;
        // A context the remote already created is persisted even if the run
        // was cancelled meanwhile; the caller stops at its next check.
        let result = tokio::select! {
            biased;
            r = self.remote.ensure_context(project.context_id.as_deref(), self.cancel) => r,
            _ = self.cancel.cancelled() => return Err(IndexError::Cancelled),
        };

        match result {
            Ok(id) => {
                if project.context_id.as_deref() != Some(id.as_str()) {
                    info!(project_id = %project.id, context_id = %id, "created conversation context");
                    project.context_id = Some(id.clone());
                    *project = self.store.update_project(project).await?;
                }
                self.context = ContextState::Ready(id.clone());
                Ok(Ok(id))
            }
            Err(RemoteError::Cancelled) => Err(IndexError::Cancelled),
            Err(e) => {
                error!(project_id = %project.id, error = %e, "failed to ensure conversation context");
                let reason = format!("conversation context unavailable: {e}");
                self.context = ContextState::Unavailable(reason.clone());
                Ok(Err(reason))
            }
        }
    }

    /// Upload `chunks` of `file` in index order, recording each result.
    pub async fn upload_file(
        &mut self,
        project: &mut Project,
        file: &SourceFile,
        chunks: &[FileChunk],
    ) -> Result<UploadOutcome, IndexError> {
        let mut outcome = UploadOutcome::default();

        for chunk in chunks {
            self.check_cancelled()?;

            let context_id = match self.ensure_context(project).await? {
                Ok(id) => id,
                Err(reason) => {
                    self.store.mark_chunk_failed(&chunk.id, &reason).await?;
                    outcome.failed += 1;
                    continue;
                }
            };
            self.check_cancelled()?;

            let metadata = ChunkMetadata {
                file: file.relative_path.clone(),
                chunk_index: chunk.chunk_index,
            };
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Err(IndexError::Cancelled),
                r = self.remote.post_content(
                    &context_id,
                    UPLOAD_ROLE,
                    &chunk.content,
                    &metadata,
                    self.cancel,
                ) => r,
            };

            match result {
                Ok(message_id) => {
                    self.store
                        .mark_chunk_uploaded(&chunk.id, &message_id, Utc::now())
                        .await?;
                    debug!(
                        file = %file.relative_path,
                        chunk_index = chunk.chunk_index,
                        message_id = %message_id,
                        "chunk uploaded"
                    );
                    outcome.uploaded += 1;
                }
                Err(RemoteError::Cancelled) => return Err(IndexError::Cancelled),
                Err(e) => {
                    warn!(
                        file = %file.relative_path,
                        chunk_index = chunk.chunk_index,
                        error = %e,
                        "chunk upload failed"
                    );
                    self.store.mark_chunk_failed(&chunk.id, &e.to_string()).await?;
                    outcome.failed += 1;
                }
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileStatus, NewSourceFile};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Remote that fails posts whose chunk index is listed in `fail_indices`.
    #[derive(Default)]
    struct ScriptedRemote {
        fail_indices: Vec<i64>,
        fail_ensure: bool,
        /// Cancel the run from inside a successful ensure.
        cancel_during_ensure: bool,
        ensure_calls: Mutex<usize>,
        posts: Mutex<Vec<(String, i64)>>,
    }

    #[async_trait]
    impl KnowledgeStore for ScriptedRemote {
        async fn ensure_context(
            &self,
            existing: Option<&str>,
            cancel: &CancellationToken,
        ) -> Result<String, RemoteError> {
            *self.ensure_calls.lock().unwrap() += 1;
            if self.fail_ensure {
                return Err(RemoteError::Other("threads endpoint down".into()));
            }
            if self.cancel_during_ensure {
                cancel.cancel();
            }
            Ok(existing.unwrap_or("ctx_new").to_string())
        }

        async fn post_content(
            &self,
            context_id: &str,
            _role: &str,
            _content: &str,
            metadata: &ChunkMetadata,
            _cancel: &CancellationToken,
        ) -> Result<String, RemoteError> {
            if self.fail_indices.contains(&metadata.chunk_index) {
                return Err(RemoteError::Status {
                    status: 500,
                    body: "upstream error".into(),
                });
            }
            let mut posts = self.posts.lock().unwrap();
            posts.push((context_id.to_string(), metadata.chunk_index));
            Ok(format!("msg_{}", metadata.chunk_index))
        }
    }

    async fn fixture(store: &InMemoryStore, n: usize) -> (Project, SourceFile, Vec<FileChunk>) {
        let project = store.create_project("p", "/p").await.unwrap();
        let file = store
            .insert_file(NewSourceFile {
                project_id: project.id.clone(),
                relative_path: "src/lib.rs".into(),
                content_hash: "h".into(),
                size_bytes: 1,
                status: FileStatus::Pending,
            })
            .await
            .unwrap();
        let contents: Vec<String> = (0..n).map(|i| format!("chunk {i}")).collect();
        let chunks = store.replace_chunks(&file.id, &contents).await.unwrap();
        (project, file, chunks)
    }

    #[tokio::test]
    async fn middle_failure_does_not_abort_siblings() {
        let store = InMemoryStore::new();
        let (mut project, file, chunks) = fixture(&store, 3).await;
        let remote = ScriptedRemote {
            fail_indices: vec![1],
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let mut coordinator = UploadCoordinator::new(&store, &remote, &cancel);

        let outcome = coordinator
            .upload_file(&mut project, &file, &chunks)
            .await
            .unwrap();
        assert_eq!(outcome, UploadOutcome { uploaded: 2, failed: 1 });

        let stored = store.list_chunks(&file.id).await.unwrap();
        assert_eq!(stored[0].message_id.as_deref(), Some("msg_0"));
        assert!(stored[1].message_id.is_none());
        assert!(stored[1].error.as_deref().unwrap().contains("500"));
        assert_eq!(stored[2].message_id.as_deref(), Some("msg_2"));
        assert!(stored[2].uploaded_at.is_some());
    }

    #[tokio::test]
    async fn context_is_created_once_and_persisted() {
        let store = InMemoryStore::new();
        let (mut project, file, chunks) = fixture(&store, 2).await;
        let remote = ScriptedRemote::default();
        let cancel = CancellationToken::new();
        let mut coordinator = UploadCoordinator::new(&store, &remote, &cancel);

        coordinator
            .upload_file(&mut project, &file, &chunks)
            .await
            .unwrap();
        coordinator
            .upload_file(&mut project, &file, &chunks)
            .await
            .unwrap();

        assert_eq!(*remote.ensure_calls.lock().unwrap(), 1);
        let stored = store.get_project(&project.id).await.unwrap().unwrap();
        assert_eq!(stored.context_id.as_deref(), Some("ctx_new"));
        assert_eq!(stored.version, project.version);
        assert!(remote
            .posts
            .lock()
            .unwrap()
            .iter()
            .all(|(ctx, _)| ctx == "ctx_new"));
    }

    #[tokio::test]
    async fn failed_ensure_marks_every_chunk() {
        let store = InMemoryStore::new();
        let (mut project, file, chunks) = fixture(&store, 2).await;
        let remote = ScriptedRemote {
            fail_ensure: true,
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let mut coordinator = UploadCoordinator::new(&store, &remote, &cancel);

        let outcome = coordinator
            .upload_file(&mut project, &file, &chunks)
            .await
            .unwrap();
        assert_eq!(outcome.failed, 2);
        assert_eq!(*remote.ensure_calls.lock().unwrap(), 1);
        assert!(remote.posts.lock().unwrap().is_empty());
        for chunk in store.list_chunks(&file.id).await.unwrap() {
            assert!(chunk
                .error
                .unwrap()
                .starts_with("conversation context unavailable"));
        }
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_chunk() {
        let store = InMemoryStore::new();
        let (mut project, file, chunks) = fixture(&store, 3).await;
        let remote = ScriptedRemote::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut coordinator = UploadCoordinator::new(&store, &remote, &cancel);

        let err = coordinator
            .upload_file(&mut project, &file, &chunks)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Cancelled));
        assert!(remote.posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn context_created_during_cancellation_is_persisted() {
        let store = InMemoryStore::new();
        let (mut project, file, chunks) = fixture(&store, 2).await;
        let remote = ScriptedRemote {
            cancel_during_ensure: true,
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let mut coordinator = UploadCoordinator::new(&store, &remote, &cancel);

        let err = coordinator
            .upload_file(&mut project, &file, &chunks)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Cancelled));
        assert!(remote.posts.lock().unwrap().is_empty());

        let stored = store.get_project(&project.id).await.unwrap().unwrap();
        assert_eq!(stored.context_id.as_deref(), Some("ctx_new"));
        assert_eq!(stored.version, project.version);

        // A later run reuses the persisted context instead of creating another.
        let cancel = CancellationToken::new();
        let remote = ScriptedRemote::default();
        let mut project = stored;
        let mut coordinator = UploadCoordinator::new(&store, &remote, &cancel);
        coordinator
            .upload_file(&mut project, &file, &chunks)
            .await
            .unwrap();
        assert_eq!(project.context_id.as_deref(), Some("ctx_new"));
        assert!(remote
            .posts
            .lock()
            .unwrap()
            .iter()
            .all(|(ctx, _)| ctx == "ctx_new"));
    }
}
