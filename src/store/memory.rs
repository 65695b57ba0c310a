//! In-memory [`IndexStore`] implementation for tests and embedders.
//!
//! Uses `HashMap`s behind one `std::sync::RwLock`, so every operation,
//! including [`replace_chunks`](IndexStore::replace_chunks), is atomic.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{FileChunk, NewSourceFile, Project, ProjectStatus, SourceFile};

use super::{IndexStore, StoreResult};

#[derive(Default)]
struct Tables {
    projects: HashMap<String, Project>,
    files: HashMap<String, SourceFile>,
    chunks: HashMap<String, FileChunk>,
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total chunk rows across all files.
    pub fn chunk_row_count(&self) -> usize {
        self.read().chunks.len()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl IndexStore for InMemoryStore {
    async fn create_project(&self, name: &str, root_path: &str) -> StoreResult<Project> {
        let project = Project {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            root_path: root_path.to_string(),
            context_id: None,
            status: ProjectStatus::Pending,
            created_at: Utc::now(),
            version: 0,
        };
        self.write()
            .projects
            .insert(project.id.clone(), project.clone());
        Ok(project)
    }

    async fn get_project(&self, id: &str) -> StoreResult<Option<Project>> {
        Ok(self.read().projects.get(id).cloned())
    }

    async fn list_projects(&self) -> StoreResult<Vec<Project>> {
        let mut projects: Vec<Project> = self.read().projects.values().cloned().collect();
        projects.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(projects)
    }

    async fn update_project(&self, project: &Project) -> StoreResult<Project> {
        let mut tables = self.write();
        let stored = tables
            .projects
            .get_mut(&project.id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "project",
                id: project.id.clone(),
            })?;
        if stored.version != project.version {
            return Err(StoreError::Conflict {
                entity: "project",
                id: project.id.clone(),
                expected: project.version,
            });
        }
        stored.status = project.status;
        stored.context_id = project.context_id.clone();
        stored.version += 1;
        Ok(stored.clone())
    }

    async fn find_file(
        &self,
        project_id: &str,
        relative_path: &str,
    ) -> StoreResult<Option<SourceFile>> {
        Ok(self
            .read()
            .files
            .values()
            .find(|f| f.project_id == project_id && f.relative_path == relative_path)
            .cloned())
    }

    async fn insert_file(&self, file: NewSourceFile) -> StoreResult<SourceFile> {
        let mut tables = self.write();
        if !tables.projects.contains_key(&file.project_id) {
            return Err(StoreError::NotFound {
                entity: "project",
                id: file.project_id,
            });
        }
        if tables
            .files
            .values()
            .any(|f| f.project_id == file.project_id && f.relative_path == file.relative_path)
        {
            return Err(StoreError::Duplicate {
                entity: "source file",
                key: format!("{}:{}", file.project_id, file.relative_path),
            });
        }
        let stored = SourceFile {
            id: Uuid::new_v4().to_string(),
            project_id: file.project_id,
            relative_path: file.relative_path,
            content_hash: file.content_hash,
            size_bytes: file.size_bytes,
            status: file.status,
            version: 0,
        };
        tables.files.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn update_file(&self, file: &SourceFile) -> StoreResult<SourceFile> {
        let mut tables = self.write();
        let stored = tables
            .files
            .get_mut(&file.id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "source file",
                id: file.id.clone(),
            })?;
        if stored.version != file.version {
            return Err(StoreError::Conflict {
                entity: "source file",
                id: file.id.clone(),
                expected: file.version,
            });
        }
        stored.content_hash = file.content_hash.clone();
        stored.size_bytes = file.size_bytes;
        stored.status = file.status;
        stored.version += 1;
        Ok(stored.clone())
    }

    async fn list_files(&self, project_id: &str) -> StoreResult<Vec<SourceFile>> {
        let mut files: Vec<SourceFile> = self
            .read()
            .files
            .values()
            .filter(|f| f.project_id == project_id)
            .cloned()
            .collect();
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(files)
    }

    async fn replace_chunks(
        &self,
        file_id: &str,
        contents: &[String],
    ) -> StoreResult<Vec<FileChunk>> {
        let mut tables = self.write();
        if !tables.files.contains_key(file_id) {
            return Err(StoreError::NotFound {
                entity: "source file",
                id: file_id.to_string(),
            });
        }
        tables.chunks.retain(|_, c| c.file_id != file_id);

        let mut created = Vec::with_capacity(contents.len());
        for (index, content) in contents.iter().enumerate() {
            let chunk = FileChunk {
                id: Uuid::new_v4().to_string(),
                file_id: file_id.to_string(),
                chunk_index: index as i64,
                content: content.clone(),
                message_id: None,
                uploaded_at: None,
                error: None,
            };
            tables.chunks.insert(chunk.id.clone(), chunk.clone());
            created.push(chunk);
        }
        Ok(created)
    }

    async fn list_chunks(&self, file_id: &str) -> StoreResult<Vec<FileChunk>> {
        let mut chunks: Vec<FileChunk> = self
            .read()
            .chunks
            .values()
            .filter(|c| c.file_id == file_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn mark_chunk_uploaded(
        &self,
        chunk_id: &str,
        message_id: &str,
        uploaded_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tables = self.write();
        let chunk = tables
            .chunks
            .get_mut(chunk_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "chunk",
                id: chunk_id.to_string(),
            })?;
        chunk.message_id = Some(message_id.to_string());
        chunk.uploaded_at = Some(uploaded_at);
        chunk.error = None;
        Ok(())
    }

    async fn mark_chunk_failed(&self, chunk_id: &str, error: &str) -> StoreResult<()> {
        let mut tables = self.write();
        let chunk = tables
            .chunks
            .get_mut(chunk_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "chunk",
                id: chunk_id.to_string(),
            })?;
        chunk.error = Some(error.to_string());
        Ok(())
    }
}
