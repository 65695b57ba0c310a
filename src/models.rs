//! Core data models for the indexing pipeline.
//!
//! A [`Project`] owns [`SourceFile`]s, each of which owns an ordered set of
//! [`FileChunk`]s. Projects and files carry a `version` counter that the
//! store uses for compare-and-swap updates.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StoreError;

/// Lifecycle state of a [`Project`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProjectStatus {
    Pending,
    Indexing,
    Completed,
    /// Declared for external reporting; the aggregation never produces it.
    Failed,
    Partial,
}

/// Upload state of a [`SourceFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FileStatus {
    Pending,
    Uploaded,
    Failed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Pending => "Pending",
            ProjectStatus::Indexing => "Indexing",
            ProjectStatus::Completed => "Completed",
            ProjectStatus::Failed => "Failed",
            ProjectStatus::Partial => "Partial",
        }
    }
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "Pending",
            FileStatus::Uploaded => "Uploaded",
            FileStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(ProjectStatus::Pending),
            "Indexing" => Ok(ProjectStatus::Indexing),
            "Completed" => Ok(ProjectStatus::Completed),
            "Failed" => Ok(ProjectStatus::Failed),
            "Partial" => Ok(ProjectStatus::Partial),
            other => Err(StoreError::Corrupt(format!("unknown project status '{other}'"))),
        }
    }
}

impl FromStr for FileStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(FileStatus::Pending),
            "Uploaded" => Ok(FileStatus::Uploaded),
            "Failed" => Ok(FileStatus::Failed),
            other => Err(StoreError::Corrupt(format!("unknown file status '{other}'"))),
        }
    }
}

/// A directory tree indexed into one conversation context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    /// Absolute root directory.
    pub root_path: String,
    /// Remote conversation context; created lazily on the first upload.
    pub context_id: Option<String>,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub version: i64,
}

/// A file under a project root, keyed by `(project_id, relative_path)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceFile {
    pub id: String,
    pub project_id: String,
    /// Path relative to the project root, `/`-separated.
    pub relative_path: String,
    /// Lowercase hex SHA-256 of the full file content.
    pub content_hash: String,
    pub size_bytes: i64,
    pub status: FileStatus,
    pub version: i64,
}

/// Fields needed to create a [`SourceFile`].
#[derive(Debug, Clone)]
pub struct NewSourceFile {
    pub project_id: String,
    pub relative_path: String,
    pub content_hash: String,
    pub size_bytes: i64,
    pub status: FileStatus,
}

/// One window of a file's text, the unit of remote upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileChunk {
    pub id: String,
    pub file_id: String,
    pub chunk_index: i64,
    pub content: String,
    /// Remote message id. Present means durably persisted remotely.
    pub message_id: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl FileChunk {
    pub fn is_uploaded(&self) -> bool {
        self.message_id.as_deref().is_some_and(|m| !m.is_empty())
    }
}
