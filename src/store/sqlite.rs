//! SQLite-backed [`IndexStore`] implementation.
//!
//! Compare-and-swap updates are single `UPDATE ... WHERE id = ? AND
//! version = ?` statements; zero affected rows means either the row is gone
//! or another writer got there first, which a follow-up lookup tells apart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{FileChunk, NewSourceFile, Project, ProjectStatus, SourceFile};

use super::{IndexStore, StoreResult};

/// SQLite implementation of the [`IndexStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn exists(&self, table: &'static str, id: &str) -> StoreResult<bool> {
        let sql = format!("SELECT COUNT(*) FROM {table} WHERE id = ?");
        let n: i64 = sqlx::query_scalar(&sql).bind(id).fetch_one(&self.pool).await?;
        Ok(n > 0)
    }
}

fn ts_from_millis(ms: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {ms}")))
}

fn project_from_row(row: &SqliteRow) -> StoreResult<Project> {
    let status: String = row.try_get("status")?;
    Ok(Project {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        root_path: row.try_get("root_path")?,
        context_id: row.try_get("context_id")?,
        status: status.parse()?,
        created_at: ts_from_millis(row.try_get("created_at")?)?,
        version: row.try_get("version")?,
    })
}

fn file_from_row(row: &SqliteRow) -> StoreResult<SourceFile> {
    let status: String = row.try_get("status")?;
    Ok(SourceFile {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        relative_path: row.try_get("relative_path")?,
        content_hash: row.try_get("content_hash")?,
        size_bytes: row.try_get("size_bytes")?,
        status: status.parse()?,
        version: row.try_get("version")?,
    })
}

fn chunk_from_row(row: &SqliteRow) -> StoreResult<FileChunk> {
    let uploaded_at: Option<i64> = row.try_get("uploaded_at")?;
    Ok(FileChunk {
        id: row.try_get("id")?,
        file_id: row.try_get("file_id")?,
        chunk_index: row.try_get("chunk_index")?,
        content: row.try_get("content")?,
        message_id: row.try_get("message_id")?,
        uploaded_at: uploaded_at.map(ts_from_millis).transpose()?,
        error: row.try_get("error")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

const PROJECT_COLUMNS: &str = "id, name, root_path, context_id, status, created_at, version";
const FILE_COLUMNS: &str = "id, project_id, relative_path, content_hash, size_bytes, status, version";
const CHUNK_COLUMNS: &str = "id, file_id, chunk_index, content, message_id, uploaded_at, error";

#[async_trait]
impl IndexStore for SqliteStore {
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

        sqlx::query(
            "INSERT INTO projects (id, name, root_path, context_id, status, created_at, version) \
             VALUES (?, ?, ?, NULL, ?, ?, 0)",
        )
        .bind(&project.id)
        .bind(&project.name)
        .bind(&project.root_path)
        .bind(project.status.as_str())
        .bind(project.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        // Round-trip through the millisecond column so callers see what is stored.
        Ok(Project {
            created_at: ts_from_millis(project.created_at.timestamp_millis())?,
            ..project
        })
    }

    async fn get_project(&self, id: &str) -> StoreResult<Option<Project>> {
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?");
        sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(project_from_row)
            .transpose()
    }

    async fn list_projects(&self) -> StoreResult<Vec<Project>> {
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects ORDER BY created_at, id");
        sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(project_from_row)
            .collect()
    }

    async fn update_project(&self, project: &Project) -> StoreResult<Project> {
        let result = sqlx::query(
            "UPDATE projects SET status = ?, context_id = ?, version = version + 1 \
             WHERE id = ? AND version = ?",
        )
        .bind(project.status.as_str())
        .bind(&project.context_id)
        .bind(&project.id)
        .bind(project.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            if self.exists("projects", &project.id).await? {
                return Err(StoreError::Conflict {
                    entity: "project",
                    id: project.id.clone(),
                    expected: project.version,
                });
            }
            return Err(StoreError::NotFound {
                entity: "project",
                id: project.id.clone(),
            });
        }

        Ok(Project {
            version: project.version + 1,
            ..project.clone()
        })
    }

    async fn find_file(
        &self,
        project_id: &str,
        relative_path: &str,
    ) -> StoreResult<Option<SourceFile>> {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM source_files WHERE project_id = ? AND relative_path = ?"
        );
        sqlx::query(&sql)
            .bind(project_id)
            .bind(relative_path)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(file_from_row)
            .transpose()
    }

    async fn insert_file(&self, file: NewSourceFile) -> StoreResult<SourceFile> {
        let stored = SourceFile {
            id: Uuid::new_v4().to_string(),
            project_id: file.project_id,
            relative_path: file.relative_path,
            content_hash: file.content_hash,
            size_bytes: file.size_bytes,
            status: file.status,
            version: 0,
        };

        let result = sqlx::query(
            "INSERT INTO source_files \
             (id, project_id, relative_path, content_hash, size_bytes, status, version) \
             VALUES (?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(&stored.id)
        .bind(&stored.project_id)
        .bind(&stored.relative_path)
        .bind(&stored.content_hash)
        .bind(stored.size_bytes)
        .bind(stored.status.as_str())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(stored),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Duplicate {
                entity: "source file",
                key: format!("{}:{}", stored.project_id, stored.relative_path),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_file(&self, file: &SourceFile) -> StoreResult<SourceFile> {
        let result = sqlx::query(
            "UPDATE source_files SET content_hash = ?, size_bytes = ?, status = ?, \
             version = version + 1 WHERE id = ? AND version = ?",
        )
        .bind(&file.content_hash)
        .bind(file.size_bytes)
        .bind(file.status.as_str())
        .bind(&file.id)
        .bind(file.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            if self.exists("source_files", &file.id).await? {
                return Err(StoreError::Conflict {
                    entity: "source file",
                    id: file.id.clone(),
                    expected: file.version,
                });
            }
            return Err(StoreError::NotFound {
                entity: "source file",
                id: file.id.clone(),
            });
        }

        Ok(SourceFile {
            version: file.version + 1,
            ..file.clone()
        })
    }

    async fn list_files(&self, project_id: &str) -> StoreResult<Vec<SourceFile>> {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM source_files WHERE project_id = ? ORDER BY relative_path"
        );
        sqlx::query(&sql)
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(file_from_row)
            .collect()
    }

    async fn replace_chunks(
        &self,
        file_id: &str,
        contents: &[String],
    ) -> StoreResult<Vec<FileChunk>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM file_chunks WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;

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
            sqlx::query(
                "INSERT INTO file_chunks (id, file_id, chunk_index, content) VALUES (?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.file_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .execute(&mut *tx)
            .await?;
            created.push(chunk);
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn list_chunks(&self, file_id: &str) -> StoreResult<Vec<FileChunk>> {
        let sql =
            format!("SELECT {CHUNK_COLUMNS} FROM file_chunks WHERE file_id = ? ORDER BY chunk_index");
        sqlx::query(&sql)
            .bind(file_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(chunk_from_row)
            .collect()
    }

    async fn mark_chunk_uploaded(
        &self,
        chunk_id: &str,
        message_id: &str,
        uploaded_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE file_chunks SET message_id = ?, uploaded_at = ?, error = NULL WHERE id = ?",
        )
        .bind(message_id)
        .bind(uploaded_at.timestamp_millis())
        .bind(chunk_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "chunk",
                id: chunk_id.to_string(),
            });
        }
        Ok(())
    }

    async fn mark_chunk_failed(&self, chunk_id: &str, error: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE file_chunks SET error = ? WHERE id = ?")
            .bind(error)
            .bind(chunk_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "chunk",
                id: chunk_id.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate::create_schema;
    use crate::models::FileStatus;
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("test.sqlite"))
            .await
            .unwrap();
        create_schema(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    fn new_file(project_id: &str, path: &str) -> NewSourceFile {
        NewSourceFile {
            project_id: project_id.to_string(),
            relative_path: path.to_string(),
            content_hash: "abc".into(),
            size_bytes: 3,
            status: FileStatus::Pending,
        }
    }

    #[tokio::test]
    async fn project_roundtrip_and_cas() {
        let (_tmp, store) = store().await;
        let p = store.create_project("demo", "/srv/demo").await.unwrap();
        let loaded = store.get_project(&p.id).await.unwrap().unwrap();
        assert_eq!(loaded, p);

        let mut next = loaded.clone();
        next.status = ProjectStatus::Indexing;
        next.context_id = Some("thread_1".into());
        let next = store.update_project(&next).await.unwrap();
        assert_eq!(next.version, 1);

        let err = store.update_project(&loaded).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let current = store.get_project(&p.id).await.unwrap().unwrap();
        assert_eq!(current.context_id.as_deref(), Some("thread_1"));
        assert_eq!(current.status, ProjectStatus::Indexing);
    }

    #[tokio::test]
    async fn unique_relative_path_per_project() {
        let (_tmp, store) = store().await;
        let p = store.create_project("demo", "/srv/demo").await.unwrap();
        let q = store.create_project("other", "/srv/other").await.unwrap();
        store.insert_file(new_file(&p.id, "src/a.rs")).await.unwrap();
        store.insert_file(new_file(&q.id, "src/a.rs")).await.unwrap();
        let err = store.insert_file(new_file(&p.id, "src/a.rs")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn chunk_replacement_and_marks() {
        let (_tmp, store) = store().await;
        let p = store.create_project("demo", "/srv/demo").await.unwrap();
        let f = store.insert_file(new_file(&p.id, "a.rs")).await.unwrap();

        let first = store
            .replace_chunks(&f.id, &["one".to_string(), "two".to_string()])
            .await
            .unwrap();
        let at = Utc::now();
        store
            .mark_chunk_uploaded(&first[0].id, "msg_0", at)
            .await
            .unwrap();
        store.mark_chunk_failed(&first[1].id, "boom").await.unwrap();

        let listed = store.list_chunks(&f.id).await.unwrap();
        assert_eq!(listed[0].message_id.as_deref(), Some("msg_0"));
        assert_eq!(
            listed[0].uploaded_at.map(|t| t.timestamp_millis()),
            Some(at.timestamp_millis())
        );
        assert_eq!(listed[1].error.as_deref(), Some("boom"));

        let second = store
            .replace_chunks(&f.id, &["only".to_string()])
            .await
            .unwrap();
        let listed = store.list_chunks(&f.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, second[0].id);
        assert_eq!(listed[0].chunk_index, 0);
        assert!(listed[0].message_id.is_none());
    }

    #[tokio::test]
    async fn stale_file_update_conflicts() {
        let (_tmp, store) = store().await;
        let p = store.create_project("demo", "/srv/demo").await.unwrap();
        let f = store.insert_file(new_file(&p.id, "a.rs")).await.unwrap();

        let mut a = f.clone();
        a.status = FileStatus::Uploaded;
        store.update_file(&a).await.unwrap();

        let mut b = f.clone();
        b.status = FileStatus::Failed;
        assert!(matches!(
            store.update_file(&b).await,
            Err(StoreError::Conflict { .. })
        ));
    }
}
