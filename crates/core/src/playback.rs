//! Interface to the audio / text-to-speech transport.

use crate::models::{TagContent, TagRecord};
use tracing::info;

#[async_trait::async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Plays the record's content and returns once playback has finished.
    async fn play(&self, record: &TagRecord) -> anyhow::Result<()>;
}

/// Human-readable description of what playing `content` does.
pub fn describe(content: &TagContent) -> String {
    match content {
        TagContent::Audio { path } => format!("playing audio {}", path.display()),
        TagContent::SpokenText { text } => format!("speaking \"{}\"", text),
    }
}

/// Sink that only logs; used where no audio device is attached.
#[derive(Debug, Default)]
pub struct LogPlayback;

#[async_trait::async_trait]
impl PlaybackSink for LogPlayback {
    async fn play(&self, record: &TagRecord) -> anyhow::Result<()> {
        info!(tag_id = %record.tag_id, "{}", describe(&record.content));
        Ok(())
    }
}
