//! Error type shared by the core components.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tag session error: {0}")]
    Session(#[from] nfc::SessionError),

    #[error("tag id encoding error: {0}")]
    Codec(#[from] nfc::CodecError),

    /// A stored row that cannot be turned back into a record.
    #[error("invalid record {tag_id}: {reason}")]
    InvalidRecord { tag_id: String, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("settings error: {0}")]
    Settings(String),
}
