use crate::error::CoreError;
use nfc::TagReading;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use storage::models::TagRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagKind {
    Audio,
    SpokenText,
}

impl TagKind {
    /// Column value in the tags table.
    pub fn as_str(&self) -> &'static str {
        match self {
            TagKind::Audio => "audio",
            TagKind::SpokenText => "tts",
        }
    }
}

impl FromStr for TagKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio" => Ok(TagKind::Audio),
            "tts" => Ok(TagKind::SpokenText),
            other => Err(format!("unknown tag kind {:?}", other)),
        }
    }
}

/// What a tag plays back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TagContent {
    Audio { path: PathBuf },
    SpokenText { text: String },
}

impl TagContent {
    pub fn kind(&self) -> TagKind {
        match self {
            TagContent::Audio { .. } => TagKind::Audio,
            TagContent::SpokenText { .. } => TagKind::SpokenText,
        }
    }

    pub fn audio_path(&self) -> Option<&Path> {
        match self {
            TagContent::Audio { path } => Some(path),
            TagContent::SpokenText { .. } => None,
        }
    }

    fn column(&self) -> String {
        match self {
            TagContent::Audio { path } => path.to_string_lossy().into_owned(),
            TagContent::SpokenText { text } => text.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRecord {
    pub tag_id: String,
    pub content: TagContent,
    pub title: String,
    pub description: Option<String>,
    pub groups: Vec<String>,
    pub locale: Option<String>,
    /// Unix millis of the last content change.
    pub created_at: i64,
}

impl TagRecord {
    pub fn new(tag_id: impl Into<String>, content: TagContent, title: impl Into<String>) -> Self {
        Self {
            tag_id: tag_id.into(),
            content,
            title: title.into(),
            description: None,
            groups: Vec::new(),
            locale: None,
            created_at: now_millis(),
        }
    }

    pub fn kind(&self) -> TagKind {
        self.content.kind()
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = normalize_groups(groups);
        self
    }

    pub fn to_row(&self) -> TagRow {
        TagRow {
            tag_id: self.tag_id.clone(),
            kind: self.kind().as_str().to_string(),
            content: self.content.column(),
            title: self.title.clone(),
            description: self.description.clone(),
            groups_json: serde_json::to_string(&self.groups).unwrap_or_else(|_| "[]".into()),
            locale: self.locale.clone(),
            created_at: self.created_at,
        }
    }
}

impl TryFrom<TagRow> for TagRecord {
    type Error = CoreError;

    fn try_from(row: TagRow) -> Result<Self, Self::Error> {
        let kind = TagKind::from_str(&row.kind).map_err(|reason| CoreError::InvalidRecord {
            tag_id: row.tag_id.clone(),
            reason,
        })?;
        let groups = row.groups();
        let content = match kind {
            TagKind::Audio => TagContent::Audio {
                path: PathBuf::from(row.content),
            },
            TagKind::SpokenText => TagContent::SpokenText { text: row.content },
        };
        Ok(Self {
            tag_id: row.tag_id,
            content,
            title: row.title,
            description: row.description,
            groups,
            locale: row.locale,
            created_at: row.created_at,
        })
    }
}

/// Trims group names, drops blanks and duplicates, keeps first-seen order.
pub fn normalize_groups<I, S>(groups: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut out: Vec<String> = Vec::new();
    for group in groups {
        let group = group.into().trim().to_string();
        if !group.is_empty() && !out.contains(&group) {
            out.push(group);
        }
    }
    out
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOrigin {
    /// Tag read delivered to an already open screen.
    ForegroundScan,
    /// Tag read that started the app.
    ColdLaunch,
    /// Opened from inside the app, e.g. the tag list.
    InternalNavigation,
}

impl ScanOrigin {
    /// Whether a physical tag tap caused this event.
    pub fn is_physical_scan(&self) -> bool {
        matches!(self, ScanOrigin::ForegroundScan | ScanOrigin::ColdLaunch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEvent {
    pub embedded_id: Option<String>,
    pub hardware_id: Option<String>,
    pub origin: ScanOrigin,
}

impl ScanEvent {
    pub fn from_reading(reading: TagReading, origin: ScanOrigin) -> Self {
        Self {
            embedded_id: reading.embedded_id,
            hardware_id: reading.hardware_id,
            origin,
        }
    }

    pub fn foreground(embedded_id: Option<&str>, hardware_id: Option<&str>) -> Self {
        Self {
            embedded_id: embedded_id.map(str::to_string),
            hardware_id: hardware_id.map(str::to_string),
            origin: ScanOrigin::ForegroundScan,
        }
    }

    /// In-app navigation to an already known tag id.
    pub fn navigate(tag_id: impl Into<String>) -> Self {
        Self {
            embedded_id: Some(tag_id.into()),
            hardware_id: None,
            origin: ScanOrigin::InternalNavigation,
        }
    }

    pub fn embedded(&self) -> Option<&str> {
        self.embedded_id.as_deref().filter(|s| !s.is_empty())
    }

    pub fn hardware(&self) -> Option<&str> {
        self.hardware_id.as_deref().filter(|s| !s.is_empty())
    }

    pub fn has_candidate(&self) -> bool {
        self.embedded().is_some() || self.hardware().is_some()
    }
}
