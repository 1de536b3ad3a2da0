//! Free-form memory files with JSON metadata sidecars.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::memory::core::errors::MemoryResult;
use crate::memory::storage::atomic::{write_atomic, write_json_atomic};

const META_SUFFIX: &str = ".meta";

/// Sidecar stored next to each memory file as `<name>.meta`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    /// Stored file name.
    pub filename: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last write.
    pub updated_at: DateTime<Utc>,
    /// Content length in bytes.
    pub size: usize,
    /// Memory kind that produced the file (`note`, `fact`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Importance given at creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<f64>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Caller-supplied metadata for a new file.
#[derive(Clone, Debug, Default)]
pub struct NewFileMeta {
    /// Memory kind recorded in the sidecar.
    pub kind: Option<String>,
    /// Importance in `[0, 1]`.
    pub importance: Option<f64>,
    /// Free-form tags.
    pub tags: Vec<String>,
}

/// A file as read back.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MemoryFile {
    /// Stored file name.
    pub filename: String,
    /// Full text.
    pub content: String,
    /// Content length in bytes.
    pub size: usize,
    /// Missing or unreadable sidecars yield `None`.
    pub metadata: Option<FileMeta>,
}

/// Listing entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    /// Stored file name.
    pub filename: String,
    /// Size on disk in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
}

/// How [`MemoryFiles::update`] treats existing content.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UpdateMode {
    /// Overwrite the content.
    #[default]
    Replace,
    /// Keep the old content and add the new text on a new line.
    Append,
}

/// Keep alphanumerics, `.`, `_` and `-`, collapse dot runs and drop leading dots.
///
/// An empty result falls back to a timestamped name.
#[must_use]
pub fn sanitize_filename(name: &str, now: DateTime<Utc>) -> String {
    let mut filtered: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    while filtered.contains("..") {
        filtered = filtered.replace("..", ".");
    }
    let mut safe = filtered.trim_start_matches('.').to_string();
    if safe.is_empty() {
        safe = format!("memory_{}", now.format("%Y%m%d_%H%M%S"));
    }
    if safe.ends_with(META_SUFFIX) {
        safe.push_str(".txt");
    }
    safe
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(index) => name.split_at(index),
    }
}

fn meta_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(META_SUFFIX);
    PathBuf::from(name)
}

/// Directory of memory files.
#[derive(Debug)]
pub struct MemoryFiles {
    dir: PathBuf,
    create_lock: Mutex<()>,
}

impl MemoryFiles {
    /// Files stored directly under `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            create_lock: Mutex::new(()),
        }
    }

    /// Path of an existing-name candidate, or `None` for names that could escape the directory.
    fn resolve(&self, name: &str) -> Option<PathBuf> {
        let invalid = name.is_empty()
            || name.contains(['/', '\\'])
            || name.contains("..")
            || name.ends_with(META_SUFFIX);
        (!invalid).then(|| self.dir.join(name))
    }

    async fn is_file(path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .is_ok_and(|meta| meta.is_file())
    }

    async fn read_meta(path: &Path) -> Option<FileMeta> {
        let meta_path = meta_path(path);
        let bytes = tokio::fs::read(&meta_path).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(meta) => Some(meta),
            Err(err) => {
                warn!(path = %meta_path.display(), error = %err, "Skipping unreadable file metadata");
                None
            }
        }
    }

    /// Create a file under a sanitized name. An existing name gets a `_N` suffix.
    ///
    /// Returns the metadata actually written, including the final file name.
    ///
    /// # Errors
    /// Returns an error if the file or its sidecar cannot be written.
    pub async fn create(
        &self,
        name: &str,
        content: &str,
        extra: NewFileMeta,
    ) -> MemoryResult<FileMeta> {
        let now = Utc::now();
        let safe = sanitize_filename(name, now);
        let _guard = self.create_lock.lock().await;

        let mut path = self.dir.join(&safe);
        let (base, ext) = split_extension(&safe);
        let mut counter = 1;
        while tokio::fs::try_exists(&path).await? {
            path = self.dir.join(format!("{base}_{counter}{ext}"));
            counter += 1;
        }
        let filename = path
            .file_name()
            .map_or_else(|| safe.clone(), |n| n.to_string_lossy().into_owned());

        write_atomic(&path, content.as_bytes()).await?;
        let meta = FileMeta {
            filename,
            created_at: now,
            updated_at: now,
            size: content.len(),
            kind: extra.kind,
            importance: extra.importance,
            tags: extra.tags,
        };
        write_json_atomic(&meta_path(&path), &meta).await?;
        info!(filename = %meta.filename, size = meta.size, "Created memory file");
        Ok(meta)
    }

    /// Read a file and its sidecar.
    ///
    /// # Errors
    /// Returns an error if an existing file cannot be read.
    pub async fn read(&self, name: &str) -> MemoryResult<Option<MemoryFile>> {
        let Some(path) = self.resolve(name) else {
            return Ok(None);
        };
        if !Self::is_file(&path).await {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path).await?;
        debug!(filename = name, "Read memory file");
        Ok(Some(MemoryFile {
            filename: name.to_string(),
            size: content.len(),
            metadata: Self::read_meta(&path).await,
            content,
        }))
    }

    /// Replace or append to a file. Returns the new size, or `None` if it does not exist.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or written.
    pub async fn update(
        &self,
        name: &str,
        content: &str,
        mode: UpdateMode,
    ) -> MemoryResult<Option<usize>> {
        let Some(path) = self.resolve(name) else {
            return Ok(None);
        };
        if !Self::is_file(&path).await {
            return Ok(None);
        }
        let content = match mode {
            UpdateMode::Replace => content.to_string(),
            UpdateMode::Append => {
                let existing = tokio::fs::read_to_string(&path).await?;
                format!("{existing}\n{content}")
            }
        };
        write_atomic(&path, content.as_bytes()).await?;
        if let Some(mut meta) = Self::read_meta(&path).await {
            meta.updated_at = Utc::now();
            meta.size = content.len();
            write_json_atomic(&meta_path(&path), &meta).await?;
        }
        info!(filename = name, size = content.len(), ?mode, "Updated memory file");
        Ok(Some(content.len()))
    }

    /// Remove a file and its sidecar. Returns `false` if it does not exist.
    ///
    /// # Errors
    /// Returns an error if the file cannot be removed.
    pub async fn delete(&self, name: &str) -> MemoryResult<bool> {
        let Some(path) = self.resolve(name) else {
            return Ok(false);
        };
        if !Self::is_file(&path).await {
            return Ok(false);
        }
        tokio::fs::remove_file(&path).await?;
        match tokio::fs::remove_file(meta_path(&path)).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        info!(filename = name, "Deleted memory file");
        Ok(true)
    }

    /// Every file, most recently modified first.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be listed.
    pub async fn list(&self) -> MemoryResult<Vec<FileEntry>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name().to_string_lossy().into_owned();
            // Sidecars and in-flight temp files.
            if filename.ends_with(META_SUFFIX) || filename.starts_with('.') {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().map_or_else(|_| Utc::now(), DateTime::<Utc>::from);
            files.push(FileEntry {
                filename,
                size: meta.len(),
                modified,
            });
        }
        files.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| a.filename.cmp(&b.filename))
        });
        Ok(files)
    }

    /// Number of files.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be listed.
    pub async fn count(&self) -> MemoryResult<usize> {
        Ok(self.list().await?.len())
    }
}
