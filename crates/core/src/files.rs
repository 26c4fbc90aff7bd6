//! File operations used by backup tiering.

use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::debug;

#[async_trait::async_trait]
pub trait FileStore: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;
    async fn size(&self, path: &Path) -> Result<u64>;
    /// Moves `from` to `to`. On error `from` is still in place.
    async fn move_file(&self, from: &Path, to: &Path) -> Result<()>;
    /// Regular files directly inside `dir`; a missing directory is empty.
    async fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>>;
    async fn create_dir_all(&self, dir: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct LocalFileStore {
    copy_then_delete: bool,
}

impl LocalFileStore {
    pub fn new(copy_then_delete: bool) -> Self {
        Self { copy_then_delete }
    }

    async fn copy_and_remove(from: &Path, to: &Path) -> Result<()> {
        tokio::fs::copy(from, to).await?;
        if let Err(e) = tokio::fs::remove_file(from).await {
            let _ = tokio::fs::remove_file(to).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl FileStore for LocalFileStore {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    async fn size(&self, path: &Path) -> Result<u64> {
        Ok(tokio::fs::metadata(path).await?.len())
    }

    async fn move_file(&self, from: &Path, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if self.copy_then_delete {
            return Self::copy_and_remove(from, to).await;
        }
        if let Err(e) = tokio::fs::rename(from, to).await {
            // Rename cannot cross filesystems.
            debug!(error = %e, from = %from.display(), "rename failed, copying instead");
            return Self::copy_and_remove(from, to).await;
        }
        Ok(())
    }

    async fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    async fn create_dir_all(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        Ok(())
    }
}

/// First free `<stem>_<n>.<ext>` next to `dest` when `dest` is taken.
pub async fn unique_destination(files: &dyn FileStore, dest: &Path) -> PathBuf {
    if !files.exists(dest).await {
        return dest.to_path_buf();
    }
    let stem = dest
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("audio")
        .to_string();
    let ext = dest
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_string();
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut counter = 1;
    loop {
        let name = if ext.is_empty() {
            format!("{}_{}", stem, counter)
        } else {
            format!("{}_{}.{}", stem, counter, ext)
        };
        let candidate = parent.join(name);
        if !files.exists(&candidate).await {
            return candidate;
        }
        counter += 1;
    }
}
