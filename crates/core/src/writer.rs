//! Committing content to the store and its id to the physical tag.
//!
//! The store is written first. A tag write that fails afterwards leaves the
//! content saved under its id, and `retry` only repeats the tag write.

use crate::backup::BackupEngine;
use crate::error::{CoreError, Result};
use crate::files::FileStore;
use crate::models::{normalize_groups, now_millis, TagContent, TagKind, TagRecord};
use crate::resolver::{Resolution, TagIdentityResolver};
use crate::store::TagStore;
use nfc::{Namespaces, PhysicalTagSession, SessionError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Content waiting to be attached to the next tag presented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingContent {
    pub content: TagContent,
    pub title: Option<String>,
    pub description: Option<String>,
    pub groups: Option<Vec<String>>,
}

impl PendingContent {
    pub fn audio(path: impl Into<PathBuf>) -> Self {
        Self::new(TagContent::Audio { path: path.into() })
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(TagContent::SpokenText { text: text.into() })
    }

    fn new(content: TagContent) -> Self {
        Self {
            content,
            title: None,
            description: None,
            groups: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = Some(groups);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WriteResult {
    Success { tag_id: String },
    /// Content is in the store; only the tag write needs repeating.
    ContentSavedButTagWriteFailed { tag_id: String, reason: String },
    Failure { reason: String },
}

impl WriteResult {
    pub fn tag_id(&self) -> Option<&str> {
        match self {
            WriteResult::Success { tag_id }
            | WriteResult::ContentSavedButTagWriteFailed { tag_id, .. } => Some(tag_id),
            WriteResult::Failure { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, WriteResult::Success { .. })
    }
}

pub struct TagWriter {
    store: Arc<dyn TagStore>,
    files: Arc<dyn FileStore>,
    backup: Arc<BackupEngine>,
    resolver: TagIdentityResolver,
    namespaces: Namespaces,
}

impl TagWriter {
    pub fn new(
        store: Arc<dyn TagStore>,
        files: Arc<dyn FileStore>,
        backup: Arc<BackupEngine>,
        resolver: TagIdentityResolver,
        namespaces: Namespaces,
    ) -> Self {
        Self {
            store,
            files,
            backup,
            resolver,
            namespaces,
        }
    }

    pub async fn write(
        &self,
        session: &dyn PhysicalTagSession,
        pending: PendingContent,
    ) -> WriteResult {
        if let Err(reason) = self.validate(&pending).await {
            warn!(%reason, "rejected tag content");
            return WriteResult::Failure { reason };
        }

        let reading = nfc::read_identifiers(session, &self.namespaces).await;
        let resolution = match self
            .resolver
            .resolve(
                self.store.as_ref(),
                reading.embedded_id.as_deref(),
                reading.hardware_id.as_deref(),
            )
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return WriteResult::Failure {
                    reason: format!("could not look up tag: {}", e),
                }
            }
        };
        let (tag_id, existing) = match resolution {
            Resolution::Known { record, .. } => (record.tag_id.clone(), Some(record)),
            Resolution::Unknown { provisional_id } => (provisional_id, None),
            Resolution::NoCandidate => {
                return WriteResult::Failure {
                    reason: "tag has no readable identifier".into(),
                }
            }
        };

        // (placed, original) when the recording was moved into a tier.
        let mut moved: Option<(PathBuf, PathBuf)> = None;
        let content = match pending.content.clone() {
            TagContent::Audio { path } => match self.backup.place_new_file(&path).await {
                Ok(placement) => {
                    if placement.moved {
                        moved = Some((placement.path.clone(), path));
                    }
                    TagContent::Audio {
                        path: placement.path,
                    }
                }
                Err(e) => {
                    return WriteResult::Failure {
                        reason: format!("could not store audio file: {}", e),
                    }
                }
            },
            text => text,
        };

        let record = build_record(&tag_id, existing, content, pending);
        if let Err(e) = self.save(record).await {
            if let Some((placed, original)) = &moved {
                if let Err(undo) = self.files.move_file(placed, original).await {
                    warn!(
                        path = %placed.display(),
                        error = %undo,
                        "could not move audio file back"
                    );
                }
            }
            return WriteResult::Failure {
                reason: format!("could not save tag: {}", e),
            };
        }
        debug!(tag_id = %tag_id, "content saved, writing tag");

        self.write_id_result(session, tag_id).await
    }

    /// Repeats only the tag write for content already saved under `tag_id`.
    pub async fn retry(&self, session: &dyn PhysicalTagSession, tag_id: &str) -> WriteResult {
        match self.store.get(tag_id).await {
            Ok(Some(_)) => self.write_id_result(session, tag_id.to_string()).await,
            Ok(None) => WriteResult::Failure {
                reason: format!("no saved content for tag {}", tag_id),
            },
            Err(e) => WriteResult::Failure {
                reason: format!("could not look up tag: {}", e),
            },
        }
    }

    async fn validate(&self, pending: &PendingContent) -> std::result::Result<(), String> {
        match &pending.content {
            TagContent::SpokenText { text } if text.trim().is_empty() => {
                Err("text content is empty".into())
            }
            TagContent::Audio { path } if !self.files.exists(path).await => {
                Err(format!("audio file not found: {}", path.display()))
            }
            _ => Ok(()),
        }
    }

    /// Upserts on its own task so the save finishes even if the caller goes away.
    async fn save(&self, record: TagRecord) -> Result<()> {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move { store.upsert(&record).await })
            .await
            .map_err(|e| CoreError::Unavailable(format!("save task failed: {}", e)))?
    }

    async fn write_id_result(
        &self,
        session: &dyn PhysicalTagSession,
        tag_id: String,
    ) -> WriteResult {
        match self.write_id(session, &tag_id).await {
            Ok(()) => {
                info!(tag_id = %tag_id, "tag written");
                WriteResult::Success { tag_id }
            }
            Err(e) => {
                warn!(tag_id = %tag_id, error = %e, "tag write failed, content is saved");
                WriteResult::ContentSavedButTagWriteFailed {
                    tag_id,
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn write_id(&self, session: &dyn PhysicalTagSession, tag_id: &str) -> Result<()> {
        let message = nfc::codec::encode(tag_id, &self.namespaces)?;
        if session.is_formatted().await? {
            if !session.is_writable().await? {
                return Err(SessionError::NotWritable.into());
            }
            let capacity = session.max_size().await?;
            if message.len() > capacity {
                return Err(SessionError::CapacityExceeded {
                    needed: message.len(),
                    capacity,
                }
                .into());
            }
            session.write_ndef_message(&message).await?;
        } else {
            debug!(tag_id, "tag not formatted, formatting");
            session.format_and_write(&message).await?;
        }
        Ok(())
    }
}

fn build_record(
    tag_id: &str,
    existing: Option<TagRecord>,
    content: TagContent,
    pending: PendingContent,
) -> TagRecord {
    match existing {
        Some(mut record) => {
            record.content = content;
            if let Some(title) = pending.title {
                record.title = title;
            }
            if pending.description.is_some() {
                record.description = pending.description;
            }
            if let Some(groups) = pending.groups {
                record.groups = normalize_groups(groups);
            }
            record.created_at = now_millis();
            record
        }
        None => {
            let title = pending
                .title
                .unwrap_or_else(|| default_title(content.kind()));
            let mut record = TagRecord::new(tag_id, content, title);
            record.description = pending.description;
            record.groups = normalize_groups(pending.groups.unwrap_or_default());
            record
        }
    }
}

fn default_title(kind: TagKind) -> String {
    let n = now_millis().rem_euclid(10_000);
    match kind {
        TagKind::Audio => format!("Audio Tag {}", n),
        TagKind::SpokenText => format!("Text Tag {}", n),
    }
}
