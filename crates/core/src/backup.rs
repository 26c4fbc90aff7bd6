//! Audio file tiering for the automatic backup budget.
//!
//! Files live in one of two directories under the storage root. Whatever is
//! in `audio_small` is covered by automatic backup and must stay within the
//! configured budget; everything else needs a manual export. A file's tier is
//! never stored, it is read off the directory its path points into.

use crate::config::BackupConfig;
use crate::error::{CoreError, Result};
use crate::files::{unique_destination, FileStore};
use crate::models::{TagContent, TagRecord};
use crate::store::TagStore;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const AUDIO_SMALL_DIR: &str = "audio_small";
pub const AUDIO_LARGE_DIR: &str = "audio_large";
pub const TEMP_DIR: &str = "temp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Counted against the automatic backup budget.
    Small,
    /// Requires manual export.
    Large,
}

/// Tier for a file of `file_size` bytes given what the small tier already holds.
pub fn classify(file_size: u64, current_small_bytes: u64, budget: u64, threshold: u64) -> Tier {
    if file_size >= threshold {
        Tier::Large
    } else if current_small_bytes.saturating_add(file_size) > budget {
        Tier::Large
    } else {
        Tier::Small
    }
}

#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn small_dir(&self) -> PathBuf {
        self.root.join(AUDIO_SMALL_DIR)
    }

    pub fn large_dir(&self) -> PathBuf {
        self.root.join(AUDIO_LARGE_DIR)
    }

    /// Where freshly recorded files wait before placement.
    pub fn temp_dir(&self) -> PathBuf {
        self.root.join(TEMP_DIR)
    }

    pub fn dir(&self, tier: Tier) -> PathBuf {
        match tier {
            Tier::Small => self.small_dir(),
            Tier::Large => self.large_dir(),
        }
    }

    pub fn tier_of(&self, path: &Path) -> Tier {
        if path.starts_with(self.small_dir()) {
            Tier::Small
        } else {
            Tier::Large
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub path: PathBuf,
    pub tier: Tier,
    /// False when the file was already in place or the move failed.
    pub moved: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackupStatus {
    pub total_files: usize,
    pub backed_up_files: usize,
    pub manual_export_required: usize,
    pub total_bytes: u64,
    pub backed_up_bytes: u64,
    pub percentage: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecategorizeSummary {
    pub examined: usize,
    pub moved: usize,
    pub missing: usize,
    pub failed: usize,
    pub small_tier_bytes: u64,
}

pub struct BackupEngine {
    files: Arc<dyn FileStore>,
    store: Arc<dyn TagStore>,
    layout: StorageLayout,
    policy: BackupConfig,
    /// Held from reading the small tier total until the file is in place.
    placing: Mutex<()>,
}

impl BackupEngine {
    pub fn new(
        files: Arc<dyn FileStore>,
        store: Arc<dyn TagStore>,
        layout: StorageLayout,
        policy: BackupConfig,
    ) -> Self {
        Self {
            files,
            store,
            layout,
            policy,
            placing: Mutex::new(()),
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Creates the tier directories and re-sorts existing audio into them.
    pub async fn initialize(&self) -> Result<RecategorizeSummary> {
        for dir in [
            self.layout.small_dir(),
            self.layout.large_dir(),
            self.layout.temp_dir(),
        ] {
            self.files.create_dir_all(&dir).await?;
        }
        self.recategorize_all().await
    }

    /// Bytes currently in the small tier directory.
    pub async fn small_tier_bytes(&self) -> Result<u64> {
        let mut total = 0;
        for path in self.files.list_dir(&self.layout.small_dir()).await? {
            total += self.files.size(&path).await?;
        }
        Ok(total)
    }

    fn classify(&self, file_size: u64, current_small_bytes: u64) -> Tier {
        classify(
            file_size,
            current_small_bytes,
            self.policy.budget,
            self.policy.small_file_threshold,
        )
    }

    /// Moves a new audio file into the directory of its tier.
    ///
    /// If the move fails the file stays where it is and is reported as Large.
    pub async fn place_new_file(&self, path: &Path) -> Result<Placement> {
        let _placing = self.placing.lock().await;
        let size = self.files.size(path).await?;
        let mut current = self.small_tier_bytes().await?;
        if self.layout.tier_of(path) == Tier::Small {
            current = current.saturating_sub(size);
        }
        let tier = self.classify(size, current);
        let dir = self.layout.dir(tier);
        if path.parent() == Some(dir.as_path()) {
            return Ok(Placement {
                path: path.to_path_buf(),
                tier,
                moved: false,
            });
        }

        let dest = unique_destination(self.files.as_ref(), &dir.join(file_name(path)?)).await;
        match self.files.move_file(path, &dest).await {
            Ok(()) => {
                debug!(
                    from = %path.display(),
                    to = %dest.display(),
                    size,
                    ?tier,
                    "placed audio file"
                );
                Ok(Placement {
                    path: dest,
                    tier,
                    moved: true,
                })
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "could not move audio file, leaving it in place"
                );
                Ok(Placement {
                    path: path.to_path_buf(),
                    tier: Tier::Large,
                    moved: false,
                })
            }
        }
    }

    /// Moves a record's audio file into `tier` and repoints the record.
    ///
    /// Either both happen or neither: a failed save moves the file back.
    async fn relocate_record(&self, record: &TagRecord, tier: Tier) -> Result<Option<PathBuf>> {
        let Some(from) = record.content.audio_path() else {
            return Ok(None);
        };
        let dir = self.layout.dir(tier);
        if from.parent() == Some(dir.as_path()) {
            return Ok(None);
        }

        let dest = unique_destination(self.files.as_ref(), &dir.join(file_name(from)?)).await;
        self.files.move_file(from, &dest).await?;

        let mut updated = record.clone();
        updated.content = TagContent::Audio { path: dest.clone() };
        if let Err(e) = self.store.upsert(&updated).await {
            warn!(
                tag_id = %record.tag_id,
                error = %e,
                "could not repoint record, moving file back"
            );
            if let Err(undo) = self.files.move_file(&dest, from).await {
                warn!(path = %dest.display(), error = %undo, "could not move file back");
            }
            return Err(e);
        }
        Ok(Some(dest))
    }

    /// Re-runs classification for every audio record, oldest first.
    pub async fn recategorize_all(&self) -> Result<RecategorizeSummary> {
        let _placing = self.placing.lock().await;
        let mut audio: Vec<TagRecord> = self
            .store
            .list_all()
            .await?
            .into_iter()
            .filter(|r| r.content.audio_path().is_some())
            .collect();
        audio.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.tag_id.cmp(&b.tag_id))
        });

        // Files nobody owns still take up backup space.
        let owned: HashSet<&Path> = audio.iter().filter_map(|r| r.content.audio_path()).collect();
        let mut running = 0;
        for path in self.files.list_dir(&self.layout.small_dir()).await? {
            if !owned.contains(path.as_path()) {
                running += self.files.size(&path).await?;
            }
        }

        let mut summary = RecategorizeSummary::default();
        for record in &audio {
            let Some(path) = record.content.audio_path() else {
                continue;
            };
            summary.examined += 1;
            if !self.files.exists(path).await {
                warn!(tag_id = %record.tag_id, path = %path.display(), "audio file missing");
                summary.missing += 1;
                continue;
            }
            let size = self.files.size(path).await?;
            let tier = self.classify(size, running);

            let final_path = match self.relocate_record(record, tier).await {
                Ok(Some(dest)) => {
                    summary.moved += 1;
                    dest
                }
                Ok(None) => path.to_path_buf(),
                Err(e) => {
                    warn!(tag_id = %record.tag_id, error = %e, "could not recategorize audio file");
                    summary.failed += 1;
                    path.to_path_buf()
                }
            };
            if self.layout.tier_of(&final_path) == Tier::Small {
                running += size;
            }
        }
        summary.small_tier_bytes = running;
        info!(
            examined = summary.examined,
            moved = summary.moved,
            small_kb = running / 1024,
            "recategorized audio files"
        );
        Ok(summary)
    }

    pub async fn status(&self) -> Result<BackupStatus> {
        let records = self.store.list_all().await?;
        let mut status = BackupStatus::default();
        let mut audio_files = 0;
        let mut backed_up_audio = 0;

        for record in &records {
            match &record.content {
                TagContent::SpokenText { .. } => {
                    status.backed_up_files += 1;
                    status.backed_up_bytes += self.policy.text_record_size;
                    status.total_bytes += self.policy.text_record_size;
                }
                TagContent::Audio { path } => {
                    audio_files += 1;
                    if !self.files.exists(path).await {
                        continue;
                    }
                    let size = self.files.size(path).await?;
                    status.total_bytes += size;
                    if self.layout.tier_of(path) == Tier::Small {
                        backed_up_audio += 1;
                        status.backed_up_files += 1;
                        status.backed_up_bytes += size;
                    }
                }
            }
        }

        status.total_files = records.len();
        status.manual_export_required = audio_files - backed_up_audio;
        status.percentage = percentage(status.backed_up_files, status.total_files);
        Ok(status)
    }
}

fn percentage(part: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((part as f64 / total as f64) * 100.0).round() as u8
}

fn file_name(path: &Path) -> Result<&std::ffi::OsStr> {
    path.file_name()
        .ok_or_else(|| CoreError::NotFound(format!("file name in {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::LocalFileStore;
    use crate::store::SqliteTagStore;
    use crate::testing::{BrokenStore, RefusingFileStore};

    const MIB: u64 = 1_048_576;

    fn policy() -> BackupConfig {
        BackupConfig {
            small_file_threshold: MIB,
            budget: 25_165_824,
            text_record_size: 1024,
        }
    }

    async fn memory_store() -> Arc<SqliteTagStore> {
        let pool = storage::connect_and_migrate("sqlite::memory:").await.unwrap();
        Arc::new(SqliteTagStore::new(pool))
    }

    fn write_file(path: &Path, size: u64) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, vec![0u8; size as usize]).unwrap();
    }

    fn audio(id: &str, path: &Path, created_at: i64) -> TagRecord {
        let mut r = TagRecord::new(
            id,
            TagContent::Audio {
                path: path.to_path_buf(),
            },
            id,
        );
        r.created_at = created_at;
        r
    }

    #[test]
    fn budget_overflow_goes_large_from_that_file_on() {
        let threshold = MIB;
        let budget = 25_165_824;
        // 24 files of 1 MiB - 1 byte fit, the 25th and 26th do not.
        let size = MIB - 1;
        let mut small = 0;
        let mut tiers = Vec::new();
        for _ in 0..26 {
            let tier = classify(size, small, budget, threshold);
            if tier == Tier::Small {
                small += size;
            }
            tiers.push(tier);
        }
        assert!(tiers[..24].iter().all(|t| *t == Tier::Small));
        assert!(tiers[24..].iter().all(|t| *t == Tier::Large));
        assert!(small <= budget);
    }

    #[test]
    fn threshold_is_inclusive_and_budget_edge_fits() {
        assert_eq!(classify(MIB, 0, u64::MAX, MIB), Tier::Large);
        assert_eq!(classify(MIB - 1, 0, u64::MAX, MIB), Tier::Small);
        assert_eq!(classify(10, 90, 100, MIB), Tier::Small);
        assert_eq!(classify(11, 90, 100, MIB), Tier::Large);
    }

    #[tokio::test]
    async fn new_files_are_placed_by_tier() {
        let temp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(temp.path());
        let engine = BackupEngine::new(
            Arc::new(LocalFileStore::default()),
            memory_store().await,
            layout.clone(),
            BackupConfig {
                budget: 1500,
                ..policy()
            },
        );
        engine.initialize().await.unwrap();

        let first = layout.temp_dir().join("rec.m4a");
        write_file(&first, 1000);
        let placed = engine.place_new_file(&first).await.unwrap();
        assert_eq!(placed.tier, Tier::Small);
        assert_eq!(placed.path, layout.small_dir().join("rec.m4a"));
        assert!(placed.moved);

        // Same name, would overflow the budget.
        let second = layout.temp_dir().join("rec.m4a");
        write_file(&second, 1000);
        let placed = engine.place_new_file(&second).await.unwrap();
        assert_eq!(placed.tier, Tier::Large);
        assert_eq!(placed.path, layout.large_dir().join("rec.m4a"));
        assert_eq!(engine.small_tier_bytes().await.unwrap(), 1000);

        let big = layout.temp_dir().join("big.m4a");
        write_file(&big, MIB);
        assert_eq!(engine.place_new_file(&big).await.unwrap().tier, Tier::Large);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_placements_stay_within_budget() {
        for _ in 0..20 {
            let temp = tempfile::tempdir().unwrap();
            let layout = StorageLayout::new(temp.path());
            let engine = Arc::new(BackupEngine::new(
                Arc::new(LocalFileStore::default()),
                memory_store().await,
                layout.clone(),
                BackupConfig {
                    budget: 1500,
                    ..policy()
                },
            ));
            engine.initialize().await.unwrap();

            let a = layout.temp_dir().join("a.m4a");
            let b = layout.temp_dir().join("b.m4a");
            write_file(&a, 1000);
            write_file(&b, 1000);
            let (first, second) = tokio::join!(
                tokio::spawn({
                    let engine = engine.clone();
                    async move { engine.place_new_file(&a).await.unwrap() }
                }),
                tokio::spawn({
                    let engine = engine.clone();
                    async move { engine.place_new_file(&b).await.unwrap() }
                }),
            );
            let tiers = [first.unwrap().tier, second.unwrap().tier];
            assert_eq!(tiers.iter().filter(|t| **t == Tier::Small).count(), 1);
            assert_eq!(engine.small_tier_bytes().await.unwrap(), 1000);
        }
    }

    #[tokio::test]
    async fn failed_move_keeps_path_and_reports_large() {
        let temp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(temp.path());
        let engine = BackupEngine::new(
            Arc::new(RefusingFileStore::new(layout.small_dir())),
            memory_store().await,
            layout.clone(),
            policy(),
        );
        let file = layout.temp_dir().join("rec.m4a");
        write_file(&file, 10);
        let placed = engine.place_new_file(&file).await.unwrap();
        assert_eq!(
            placed,
            Placement {
                path: file.clone(),
                tier: Tier::Large,
                moved: false
            }
        );
        assert!(file.exists());
    }

    #[tokio::test]
    async fn recategorize_moves_oldest_first_and_repoints() {
        let temp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(temp.path());
        let store = memory_store().await;
        let engine = BackupEngine::new(
            Arc::new(LocalFileStore::default()),
            store.clone(),
            layout.clone(),
            BackupConfig {
                budget: 150,
                ..policy()
            },
        );

        let old = layout.large_dir().join("old.m4a");
        let new = layout.small_dir().join("new.m4a");
        write_file(&old, 100);
        write_file(&new, 100);
        store.upsert(&audio("old", &old, 1)).await.unwrap();
        store.upsert(&audio("new", &new, 2)).await.unwrap();
        store
            .upsert(&audio("gone", &layout.small_dir().join("gone.m4a"), 3))
            .await
            .unwrap();

        let summary = engine.initialize().await.unwrap();
        assert_eq!(summary.examined, 3);
        assert_eq!(summary.moved, 2);
        assert_eq!(summary.missing, 1);
        assert_eq!(summary.small_tier_bytes, 100);

        let old_record = store.get("old").await.unwrap().unwrap();
        let new_record = store.get("new").await.unwrap().unwrap();
        assert_eq!(
            old_record.content.audio_path(),
            Some(layout.small_dir().join("old.m4a").as_path())
        );
        assert_eq!(
            new_record.content.audio_path(),
            Some(layout.large_dir().join("new.m4a").as_path())
        );
        assert!(layout.small_dir().join("old.m4a").exists());
        assert!(!old.exists());
    }

    #[tokio::test]
    async fn failed_repoint_moves_file_back() {
        let temp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(temp.path());
        let engine = BackupEngine::new(
            Arc::new(LocalFileStore::default()),
            Arc::new(BrokenStore),
            layout.clone(),
            policy(),
        );
        let file = layout.large_dir().join("a.m4a");
        write_file(&file, 10);
        let record = audio("a", &file, 1);
        assert!(engine.relocate_record(&record, Tier::Small).await.is_err());
        assert!(file.exists());
        assert!(!layout.small_dir().join("a.m4a").exists());
    }

    #[tokio::test]
    async fn status_counts_text_as_backed_up() {
        let temp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(temp.path());
        let store = memory_store().await;
        let engine = BackupEngine::new(
            Arc::new(LocalFileStore::default()),
            store.clone(),
            layout.clone(),
            policy(),
        );
        assert_eq!(engine.status().await.unwrap().percentage, 100);

        let small = layout.small_dir().join("s.m4a");
        let large = layout.large_dir().join("l.m4a");
        write_file(&small, 2000);
        write_file(&large, 3000);
        store.upsert(&audio("s", &small, 1)).await.unwrap();
        store.upsert(&audio("l", &large, 2)).await.unwrap();
        store
            .upsert(&TagRecord::new(
                "t",
                TagContent::SpokenText { text: "hi".into() },
                "t",
            ))
            .await
            .unwrap();

        let status = engine.status().await.unwrap();
        assert_eq!(
            status,
            BackupStatus {
                total_files: 3,
                backed_up_files: 2,
                manual_export_required: 1,
                total_bytes: 6024,
                backed_up_bytes: 3024,
                percentage: 67,
            }
        );
    }
}
