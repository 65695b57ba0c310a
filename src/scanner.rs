//! Filesystem scanner.
//!
//! Walks a project root and returns the absolute paths of candidate files:
//! matched by at least one include glob, by no exclude glob, not a known
//! binary extension, and no larger than the configured size limit.
//! Globs are case-insensitive and matched against the `/`-separated path
//! relative to the root, so `*.rs` only matches at the top level while
//! `**/*.rs` matches at any depth.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::IndexingConfig;
use crate::error::{ConfigError, ScanError};

/// Extensions treated as binary regardless of the include globs.
pub const BINARY_EXTENSIONS: &[&str] = &[
    "dll", "exe", "png", "jpg", "jpeg", "gif", "pdf", "zip", "woff", "woff2", "ttf",
];

/// Compiled scan filters.
#[derive(Debug, Clone)]
pub struct Scanner {
    include: GlobSet,
    exclude: GlobSet,
    max_file_size_bytes: u64,
}

impl Scanner {
    pub fn new(
        include: &[String],
        exclude: &[String],
        max_file_size_kb: u64,
    ) -> Result<Self, ConfigError> {
        if max_file_size_kb == 0 {
            return Err(ConfigError::ZeroMaxFileSize);
        }
        Ok(Self {
            include: build_globset(include)?,
            exclude: build_globset(exclude)?,
            max_file_size_bytes: max_file_size_kb.saturating_mul(1024),
        })
    }

    pub fn from_config(config: &IndexingConfig) -> Result<Self, ConfigError> {
        Self::new(&config.include, &config.exclude, config.max_file_size_kb)
    }

    /// Enumerate candidate files under `root`, sorted by path.
    pub fn scan(&self, root: &Path) -> Result<Vec<PathBuf>, ScanError> {
        if !root.is_dir() {
            return Err(ScanError::MissingRoot(root.to_path_buf()));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|source| ScanError::Walk {
                path: root.to_path_buf(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let rel = relative_path(root, path);

            if self.exclude.is_match(&rel) || !self.include.is_match(&rel) {
                continue;
            }
            if looks_binary(path) {
                continue;
            }

            let len = entry
                .metadata()
                .map_err(|source| ScanError::Walk {
                    path: path.to_path_buf(),
                    source,
                })?
                .len();
            if len > self.max_file_size_bytes {
                continue;
            }

            files.push(path.to_path_buf());
        }

        files.sort();
        Ok(files)
    }
}

/// Read the full content of a scanned file.
pub async fn read_source(path: &Path) -> Result<Vec<u8>, ScanError> {
    tokio::fs::read(path).await.map_err(|source| ScanError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// `path` relative to `root`, with `/` separators on every platform.
pub fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn looks_binary(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| BINARY_EXTENSIONS.contains(&ext.as_str()))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, ConfigError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .literal_separator(true)
            .build()
            .map_err(|e| ConfigError::InvalidGlob {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| ConfigError::InvalidGlob {
        pattern: patterns.join(", "),
        message: e.to_string(),
    })
}
