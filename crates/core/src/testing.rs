//! Test doubles shared by the unit tests.

use crate::error::{CoreError, Result};
use crate::files::{FileStore, LocalFileStore};
use crate::models::TagRecord;
use crate::playback::PlaybackSink;
use crate::store::TagStore;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::{Notify, Semaphore};

/// Store whose every call fails.
pub struct BrokenStore;

#[async_trait::async_trait]
impl TagStore for BrokenStore {
    async fn get(&self, _tag_id: &str) -> Result<Option<TagRecord>> {
        Err(CoreError::Unavailable("store offline".into()))
    }

    async fn upsert(&self, _record: &TagRecord) -> Result<()> {
        Err(CoreError::Unavailable("store offline".into()))
    }

    async fn delete(&self, _tag_id: &str) -> Result<bool> {
        Err(CoreError::Unavailable("store offline".into()))
    }

    async fn list_all(&self) -> Result<Vec<TagRecord>> {
        Err(CoreError::Unavailable("store offline".into()))
    }
}

/// Store that lets `get` succeed and fails every save.
pub struct UnsavableStore;

#[async_trait::async_trait]
impl TagStore for UnsavableStore {
    async fn get(&self, _tag_id: &str) -> Result<Option<TagRecord>> {
        Ok(None)
    }

    async fn upsert(&self, _record: &TagRecord) -> Result<()> {
        Err(CoreError::Unavailable("disk full".into()))
    }

    async fn delete(&self, _tag_id: &str) -> Result<bool> {
        Ok(false)
    }

    async fn list_all(&self) -> Result<Vec<TagRecord>> {
        Ok(Vec::new())
    }
}

/// In-memory store where either lookups or saves block until `open_gate`.
pub struct GatedStore {
    records: Mutex<HashMap<String, TagRecord>>,
    gate: Semaphore,
    entered: Notify,
    lookups: AtomicUsize,
    hold_saves: bool,
}

impl GatedStore {
    /// Lookups wait for the gate.
    pub fn new(records: Vec<TagRecord>) -> Self {
        Self {
            records: Mutex::new(records.into_iter().map(|r| (r.tag_id.clone(), r)).collect()),
            gate: Semaphore::new(0),
            entered: Notify::new(),
            lookups: AtomicUsize::new(0),
            hold_saves: false,
        }
    }

    /// Saves wait for the gate; lookups answer immediately.
    pub fn holding_saves() -> Self {
        Self {
            hold_saves: true,
            ..Self::new(Vec::new())
        }
    }

    pub async fn wait_for_lookup(&self) {
        self.entered.notified().await;
    }

    pub async fn wait_for_save(&self) {
        self.entered.notified().await;
    }

    pub fn contains(&self, tag_id: &str) -> bool {
        self.records.lock().unwrap().contains_key(tag_id)
    }

    async fn pass_gate(&self) -> Result<()> {
        self.entered.notify_one();
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| CoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    pub fn open_gate(&self) {
        self.gate.add_permits(1024);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TagStore for GatedStore {
    async fn get(&self, tag_id: &str) -> Result<Option<TagRecord>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if !self.hold_saves {
            self.pass_gate().await?;
        }
        Ok(self.records.lock().unwrap().get(tag_id).cloned())
    }

    async fn upsert(&self, record: &TagRecord) -> Result<()> {
        if self.hold_saves {
            self.pass_gate().await?;
        }
        self.records
            .lock()
            .unwrap()
            .insert(record.tag_id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, tag_id: &str) -> Result<bool> {
        Ok(self.records.lock().unwrap().remove(tag_id).is_some())
    }

    async fn list_all(&self) -> Result<Vec<TagRecord>> {
        let mut all: Vec<_> = self.records.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }
}

#[derive(Default)]
pub struct RecordingPlayback {
    played: Mutex<Vec<String>>,
    notify: Notify,
}

impl RecordingPlayback {
    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }

    pub async fn wait_for_plays(&self, n: usize) {
        while self.played.lock().unwrap().len() < n {
            self.notify.notified().await;
        }
    }
}

#[async_trait::async_trait]
impl PlaybackSink for RecordingPlayback {
    async fn play(&self, record: &TagRecord) -> anyhow::Result<()> {
        self.played.lock().unwrap().push(record.tag_id.clone());
        self.notify.notify_one();
        Ok(())
    }
}

/// Local files, except that moves into `refuse_dir` fail.
pub struct RefusingFileStore {
    inner: LocalFileStore,
    refuse_dir: PathBuf,
}

impl RefusingFileStore {
    pub fn new(refuse_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: LocalFileStore::default(),
            refuse_dir: refuse_dir.into(),
        }
    }
}

#[async_trait::async_trait]
impl FileStore for RefusingFileStore {
    async fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path).await
    }

    async fn size(&self, path: &Path) -> Result<u64> {
        self.inner.size(path).await
    }

    async fn move_file(&self, from: &Path, to: &Path) -> Result<()> {
        if to.starts_with(&self.refuse_dir) {
            let refused = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "refused");
            return Err(refused.into());
        }
        self.inner.move_file(from, to).await
    }

    async fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        self.inner.list_dir(dir).await
    }

    async fn create_dir_all(&self, dir: &Path) -> Result<()> {
        self.inner.create_dir_all(dir).await
    }
}
