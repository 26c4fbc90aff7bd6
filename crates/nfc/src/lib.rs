//! NFC tag access: the identifier codec and physical tag sessions.

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, warn};

pub mod codec;
pub mod image;
pub mod memory;

pub use codec::{CodecError, Namespaces};
pub use image::{ImageTag, TagImage};
pub use memory::MemoryTag;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("tag is read-only")]
    NotWritable,
    #[error("message of {needed} bytes exceeds tag capacity of {capacity} bytes")]
    CapacityExceeded { needed: usize, capacity: usize },
    #[error("tag is not NDEF formatted")]
    NotFormatted,
    #[error("tag is already NDEF formatted")]
    AlreadyFormatted,
    #[error("tag connection lost: {0}")]
    TagLost(String),
    #[error("invalid tag image: {0}")]
    InvalidImage(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One connection to a tag held against the reader.
///
/// Implementations map onto whatever the platform exposes (Ndef / NdefFormatable
/// on Android, a PC/SC reader, a simulated tag).
#[async_trait::async_trait]
pub trait PhysicalTagSession: Send + Sync {
    async fn read_raw_serial(&self) -> Result<Bytes, SessionError>;
    /// Payloads of every well-known text record in the stored NDEF message.
    async fn read_ndef_text_records(&self) -> Result<Vec<Bytes>, SessionError>;
    async fn is_writable(&self) -> Result<bool, SessionError>;
    async fn is_formatted(&self) -> Result<bool, SessionError>;
    async fn max_size(&self) -> Result<usize, SessionError>;
    async fn write_ndef_message(&self, message: &[u8]) -> Result<(), SessionError>;
    async fn format_and_write(&self, message: &[u8]) -> Result<(), SessionError>;
}

/// Identifier candidates read off a tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagReading {
    pub embedded_id: Option<String>,
    pub hardware_id: Option<String>,
}

/// Reads both identifier candidates from a session.
///
/// Never fails: an unreadable or foreign NDEF message just yields no embedded id.
pub async fn read_identifiers(
    session: &dyn PhysicalTagSession,
    namespaces: &Namespaces,
) -> TagReading {
    let hardware_id = match session.read_raw_serial().await {
        Ok(serial) if !serial.is_empty() => Some(codec::hardware_id_of(&serial)),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "could not read tag serial");
            None
        }
    };

    let embedded_id = match session.read_ndef_text_records().await {
        Ok(records) => records
            .iter()
            .find_map(|payload| codec::decode_text_payload(payload, namespaces)),
        Err(e) => {
            debug!(error = %e, "no readable NDEF message on tag");
            None
        }
    };

    TagReading {
        embedded_id,
        hardware_id,
    }
}

/// True when the tag can take a message through either write path.
pub async fn is_tag_writable(session: &dyn PhysicalTagSession) -> bool {
    match session.is_formatted().await {
        Ok(true) => session.is_writable().await.unwrap_or(false),
        Ok(false) => true,
        Err(_) => false,
    }
}
