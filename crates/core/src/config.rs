use nfc::Namespaces;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub backup: BackupConfig,
    pub playback: PlaybackConfig,
    pub nfc: NfcConfig,
    pub settings: SettingsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "audiotag.db".to_string(),
        }
    }
}

/// Root under which the audio tier directories live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
    /// Copy then delete instead of rename when moving audio files.
    pub copy_then_delete: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            copy_then_delete: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Files of this size or larger never enter the auto-backup tier.
    pub small_file_threshold: u64,
    /// Upper bound on the auto-backup tier's total size.
    pub budget: u64,
    /// Nominal size credited to each spoken-text tag in status reports.
    pub text_record_size: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            small_file_threshold: 1_048_576,
            // 24 MiB, leaving room for the database and settings in a 25 MiB backup quota.
            budget: 25_165_824,
            text_record_size: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub settle_delay_ms: u64,
}

impl PlaybackConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NfcConfig {
    pub namespace: String,
    pub legacy_namespaces: Vec<String>,
    pub language: String,
    /// Look up the hardware id too when the embedded id matched, to report conflicts.
    pub check_conflicts: bool,
}

impl NfcConfig {
    pub fn namespaces(&self) -> Namespaces {
        Namespaces {
            current: self.namespace.clone(),
            legacy: self.legacy_namespaces.clone(),
            language: self.language.clone(),
        }
    }
}

impl Default for NfcConfig {
    fn default() -> Self {
        let ns = Namespaces::default();
        Self {
            namespace: ns.current,
            legacy_namespaces: ns.legacy,
            language: ns.language,
            check_conflicts: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    pub path: PathBuf,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("settings.toml"),
        }
    }
}

/// Loads configuration from `path` (or `config/default` if present), then `AUDIOTAG__*` env vars.
pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("AUDIOTAG")
            .separator("__")
            .try_parsing(true),
    );
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}
