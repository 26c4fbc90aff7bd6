//! Builds the component graph from an `AppConfig`.

use crate::backup::{BackupEngine, StorageLayout};
use crate::config::AppConfig;
use crate::files::{FileStore, LocalFileStore};
use crate::models::{ScanEvent, ScanOrigin};
use crate::playback::PlaybackSink;
use crate::resolver::{scan_event_from_session, TagIdentityResolver};
use crate::routing::{RoutingMachine, ScreenSession};
use crate::settings::SettingsHandle;
use crate::store::{SqliteTagStore, TagStore};
use crate::writer::TagWriter;
use anyhow::Context;
use nfc::{Namespaces, PhysicalTagSession};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

pub struct AudioTag {
    config: AppConfig,
    store: Arc<SqliteTagStore>,
    backup: Arc<BackupEngine>,
    writer: TagWriter,
    settings: SettingsHandle,
}

impl AudioTag {
    /// Opens the database, loads settings and prepares the storage directories.
    pub async fn open(config: AppConfig) -> anyhow::Result<Self> {
        let pool = storage::connect_and_migrate(&config.database.path)
            .await
            .with_context(|| format!("opening database {}", config.database.path))?;
        let settings = SettingsHandle::load(&config.settings.path).await;
        let app = Self::with_pool(config, pool, settings);
        let summary = app
            .backup
            .initialize()
            .await
            .context("initializing audio storage")?;
        info!(
            root = %app.config.storage.root.display(),
            examined = summary.examined,
            moved = summary.moved,
            "audio storage ready"
        );
        Ok(app)
    }

    pub fn with_pool(config: AppConfig, pool: SqlitePool, settings: SettingsHandle) -> Self {
        let store = Arc::new(SqliteTagStore::new(pool));
        let files: Arc<dyn FileStore> =
            Arc::new(LocalFileStore::new(config.storage.copy_then_delete));
        let backup = Arc::new(BackupEngine::new(
            files.clone(),
            store.clone(),
            StorageLayout::new(&config.storage.root),
            config.backup.clone(),
        ));
        let writer = TagWriter::new(
            store.clone(),
            files,
            backup.clone(),
            TagIdentityResolver::new(config.nfc.check_conflicts),
            config.nfc.namespaces(),
        );
        Self {
            config,
            store,
            backup,
            writer,
            settings,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &SqliteTagStore {
        &self.store
    }

    pub fn backup(&self) -> &BackupEngine {
        &self.backup
    }

    pub fn writer(&self) -> &TagWriter {
        &self.writer
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    pub fn namespaces(&self) -> Namespaces {
        self.config.nfc.namespaces()
    }

    pub fn resolver(&self) -> TagIdentityResolver {
        TagIdentityResolver::new(self.config.nfc.check_conflicts)
    }

    /// A fresh routing machine, as for a newly opened screen.
    pub fn routing_machine(&self) -> RoutingMachine {
        let store: Arc<dyn TagStore> = self.store.clone();
        RoutingMachine::new(store, self.resolver())
    }

    pub fn open_screen(&self, playback: Arc<dyn PlaybackSink>) -> ScreenSession {
        ScreenSession::spawn(
            self.routing_machine(),
            playback,
            self.config.playback.settle_delay(),
        )
    }

    pub async fn scan_event(
        &self,
        session: &dyn PhysicalTagSession,
        origin: ScanOrigin,
    ) -> ScanEvent {
        scan_event_from_session(session, &self.namespaces(), origin).await
    }
}
