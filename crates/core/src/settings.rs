//! User preferences with change notification.
//!
//! A `SettingsHandle` is created once at startup and handed to whoever needs
//! it; UI code subscribes for updates instead of reading a global.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThemeOption {
    Light,
    Dark,
    #[default]
    System,
    HighContrastLight,
    HighContrastDark,
}

impl FromStr for ThemeOption {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "light" => Ok(ThemeOption::Light),
            "dark" => Ok(ThemeOption::Dark),
            "system" => Ok(ThemeOption::System),
            "high_contrast_light" => Ok(ThemeOption::HighContrastLight),
            "high_contrast_dark" => Ok(ThemeOption::HighContrastDark),
            other => Err(format!("unknown theme {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, deserialize_with = "lenient_theme")]
    pub theme: ThemeOption,
    /// Spoken feedback for scans and errors.
    #[serde(default = "enabled")]
    pub tts_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: ThemeOption::System,
            tts_enabled: true,
        }
    }
}

fn enabled() -> bool {
    true
}

fn lenient_theme<'de, D>(deserializer: D) -> std::result::Result<ThemeOption, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(ThemeOption::from_str(&raw).unwrap_or_default())
}

pub struct SettingsHandle {
    path: PathBuf,
    tx: watch::Sender<Settings>,
}

impl SettingsHandle {
    /// Reads settings from `path`; a missing or unreadable file gives defaults.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let settings = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => toml::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "ignoring unreadable settings");
                Settings::default()
            }),
            Err(_) => Settings::default(),
        };
        let (tx, _) = watch::channel(settings);
        Self { path, tx }
    }

    pub fn current(&self) -> Settings {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }

    pub async fn set_theme(&self, theme: ThemeOption) -> Result<()> {
        self.update(|s| s.theme = theme).await
    }

    pub async fn set_tts_enabled(&self, enabled: bool) -> Result<()> {
        self.update(|s| s.tts_enabled = enabled).await
    }

    async fn update(&self, change: impl FnOnce(&mut Settings)) -> Result<()> {
        let mut next = self.current();
        change(&mut next);
        let raw = toml::to_string(&next).map_err(|e| CoreError::Settings(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, raw).await?;
        debug!(?next, "settings saved");
        self.tx.send_replace(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn updates_are_persisted_and_broadcast() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("settings.toml");
        let handle = SettingsHandle::load(&path).await;
        assert_eq!(handle.current(), Settings::default());

        let mut rx = handle.subscribe();
        handle.set_theme(ThemeOption::HighContrastDark).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().theme, ThemeOption::HighContrastDark);

        let reloaded = SettingsHandle::load(&path).await;
        assert_eq!(reloaded.current().theme, ThemeOption::HighContrastDark);
        assert!(reloaded.current().tts_enabled);
    }

    #[tokio::test]
    async fn unknown_theme_falls_back_to_system() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("settings.toml");
        std::fs::write(&path, "theme = \"SEPIA\"\ntts_enabled = false\n").unwrap();
        let handle = SettingsHandle::load(&path).await;
        assert_eq!(handle.current().theme, ThemeOption::System);
        assert!(!handle.current().tts_enabled);
    }

    #[test]
    fn theme_names_parse_loosely() {
        assert_eq!(
            "high-contrast-light".parse::<ThemeOption>(),
            Ok(ThemeOption::HighContrastLight)
        );
        assert!("sepia".parse::<ThemeOption>().is_err());
    }
}
