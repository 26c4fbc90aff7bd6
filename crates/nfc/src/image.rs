//! Tags persisted as JSON image files, for driving the tool without a reader.

use crate::codec::{self, hardware_id_of, serial_from_hex};
use crate::memory::DEFAULT_CAPACITY;
use crate::{PhysicalTagSession, SessionError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagImage {
    /// Hardware serial as hex.
    pub serial: String,
    pub formatted: bool,
    pub writable: bool,
    pub capacity: usize,
    /// Stored NDEF message as hex.
    #[serde(default)]
    pub message: Option<String>,
}

impl TagImage {
    pub fn blank(serial_hex: &str) -> Result<Self, SessionError> {
        let serial = serial_from_hex(serial_hex)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SessionError::InvalidImage(format!("bad serial {:?}", serial_hex)))?;
        Ok(Self {
            serial: hardware_id_of(&serial),
            formatted: false,
            writable: true,
            capacity: DEFAULT_CAPACITY,
            message: None,
        })
    }

    fn serial_bytes(&self) -> Result<Vec<u8>, SessionError> {
        serial_from_hex(&self.serial)
            .ok_or_else(|| SessionError::InvalidImage(format!("bad serial {:?}", self.serial)))
    }

    fn message_bytes(&self) -> Result<Option<Vec<u8>>, SessionError> {
        self.message
            .as_deref()
            .map(|hex| {
                serial_from_hex(hex)
                    .ok_or_else(|| SessionError::InvalidImage("bad message hex".to_string()))
            })
            .transpose()
    }
}

/// Session over a tag image on disk; writes are saved back to the file.
pub struct ImageTag {
    path: PathBuf,
    image: Mutex<TagImage>,
}

impl ImageTag {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref().to_path_buf();
        let raw = tokio::fs::read_to_string(&path).await?;
        let image: TagImage = serde_json::from_str(&raw)
            .map_err(|e| SessionError::InvalidImage(e.to_string()))?;
        Ok(Self {
            path,
            image: Mutex::new(image),
        })
    }

    /// Writes `image` to `path` and opens it.
    pub async fn create(path: impl AsRef<Path>, image: TagImage) -> Result<Self, SessionError> {
        let path = path.as_ref().to_path_buf();
        save(&path, &image).await?;
        Ok(Self {
            path,
            image: Mutex::new(image),
        })
    }

    pub async fn image(&self) -> TagImage {
        self.image.lock().await.clone()
    }

    async fn store(&self, message: &[u8], format: bool) -> Result<(), SessionError> {
        let mut image = self.image.lock().await;
        if format && image.formatted {
            return Err(SessionError::AlreadyFormatted);
        }
        if !format && !image.formatted {
            return Err(SessionError::NotFormatted);
        }
        if !image.writable {
            return Err(SessionError::NotWritable);
        }
        if message.len() > image.capacity {
            return Err(SessionError::CapacityExceeded {
                needed: message.len(),
                capacity: image.capacity,
            });
        }
        let mut next = image.clone();
        next.formatted = true;
        next.message = Some(hardware_id_of(message));
        save(&self.path, &next).await?;
        *image = next;
        debug!(path = %self.path.display(), bytes = message.len(), "tag image written");
        Ok(())
    }
}

async fn save(path: &Path, image: &TagImage) -> Result<(), SessionError> {
    let json = serde_json::to_string_pretty(image)
        .map_err(|e| SessionError::InvalidImage(e.to_string()))?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, json).await?;
    Ok(())
}

#[async_trait::async_trait]
impl PhysicalTagSession for ImageTag {
    async fn read_raw_serial(&self) -> Result<Bytes, SessionError> {
        Ok(Bytes::from(self.image.lock().await.serial_bytes()?))
    }

    async fn read_ndef_text_records(&self) -> Result<Vec<Bytes>, SessionError> {
        let image = self.image.lock().await;
        if !image.formatted {
            return Err(SessionError::NotFormatted);
        }
        match image.message_bytes()? {
            Some(message) => Ok(codec::text_payloads(&message).unwrap_or_default()),
            None => Ok(Vec::new()),
        }
    }

    async fn is_writable(&self) -> Result<bool, SessionError> {
        Ok(self.image.lock().await.writable)
    }

    async fn is_formatted(&self) -> Result<bool, SessionError> {
        Ok(self.image.lock().await.formatted)
    }

    async fn max_size(&self) -> Result<usize, SessionError> {
        Ok(self.image.lock().await.capacity)
    }

    async fn write_ndef_message(&self, message: &[u8]) -> Result<(), SessionError> {
        self.store(message, false).await
    }

    async fn format_and_write(&self, message: &[u8]) -> Result<(), SessionError> {
        self.store(message, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{read_identifiers, Namespaces};

    #[tokio::test]
    async fn image_survives_reopen_after_write() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("tags/kitchen.json");
        let ns = Namespaces::default();

        let tag = ImageTag::create(&path, TagImage::blank("04a1b2c3").unwrap())
            .await
            .unwrap();
        let message = codec::encode("abc123", &ns).unwrap();
        tag.format_and_write(&message).await.unwrap();

        let reopened = ImageTag::open(&path).await.unwrap();
        let reading = read_identifiers(&reopened, &ns).await;
        assert_eq!(reading.embedded_id.as_deref(), Some("abc123"));
        assert_eq!(reading.hardware_id.as_deref(), Some("04A1B2C3"));
    }

    #[test]
    fn blank_rejects_bad_serial() {
        assert!(TagImage::blank("xyz").is_err());
        assert!(TagImage::blank("").is_err());
    }
}
