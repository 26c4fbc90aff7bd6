use crate::{codec, PhysicalTagSession, SessionError};
use bytes::Bytes;
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct MemoryTagState {
    serial: Vec<u8>,
    formatted: bool,
    writable: bool,
    capacity: usize,
    message: Option<Vec<u8>>,
    failures_left: usize,
    writes: usize,
}

/// A tag held entirely in memory.
#[derive(Debug)]
pub struct MemoryTag {
    state: Mutex<MemoryTagState>,
}

/// NTAG213 user memory less the NDEF TLV header.
pub const DEFAULT_CAPACITY: usize = 137;

impl MemoryTag {
    /// Factory-fresh tag with no NDEF formatting.
    pub fn blank(serial: &[u8]) -> Self {
        Self::with_state(MemoryTagState {
            serial: serial.to_vec(),
            formatted: false,
            writable: true,
            capacity: DEFAULT_CAPACITY,
            message: None,
            failures_left: 0,
            writes: 0,
        })
    }

    /// Formatted, writable tag holding `message` (if any).
    pub fn formatted(serial: &[u8], message: Option<&[u8]>) -> Self {
        Self::with_state(MemoryTagState {
            serial: serial.to_vec(),
            formatted: true,
            writable: true,
            capacity: DEFAULT_CAPACITY,
            message: message.map(<[u8]>::to_vec),
            failures_left: 0,
            writes: 0,
        })
    }

    fn with_state(state: MemoryTagState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryTagState> {
        // A poisoned lock only means a test panicked mid-write; the state is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_writable(&self, writable: bool) {
        self.lock().writable = writable;
    }

    pub fn set_capacity(&self, capacity: usize) {
        self.lock().capacity = capacity;
    }

    /// Makes the next `n` write attempts fail as if the tag left the field.
    pub fn fail_next_writes(&self, n: usize) {
        self.lock().failures_left = n;
    }

    pub fn message(&self) -> Option<Vec<u8>> {
        self.lock().message.clone()
    }

    pub fn is_formatted_now(&self) -> bool {
        self.lock().formatted
    }

    /// Successful writes so far.
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    fn store(&self, message: &[u8], format: bool) -> Result<(), SessionError> {
        let mut state = self.lock();
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(SessionError::TagLost("simulated transceive failure".into()));
        }
        if format {
            if state.formatted {
                return Err(SessionError::AlreadyFormatted);
            }
        } else {
            if !state.formatted {
                return Err(SessionError::NotFormatted);
            }
            if !state.writable {
                return Err(SessionError::NotWritable);
            }
        }
        if message.len() > state.capacity {
            return Err(SessionError::CapacityExceeded {
                needed: message.len(),
                capacity: state.capacity,
            });
        }
        state.formatted = true;
        state.message = Some(message.to_vec());
        state.writes += 1;
        Ok(())
    }
}

#[async_trait::async_trait]
impl PhysicalTagSession for MemoryTag {
    async fn read_raw_serial(&self) -> Result<Bytes, SessionError> {
        Ok(Bytes::from(self.lock().serial.clone()))
    }

    async fn read_ndef_text_records(&self) -> Result<Vec<Bytes>, SessionError> {
        let state = self.lock();
        if !state.formatted {
            return Err(SessionError::NotFormatted);
        }
        match &state.message {
            Some(message) => Ok(codec::text_payloads(message).unwrap_or_default()),
            None => Ok(Vec::new()),
        }
    }

    async fn is_writable(&self) -> Result<bool, SessionError> {
        Ok(self.lock().writable)
    }

    async fn is_formatted(&self) -> Result<bool, SessionError> {
        Ok(self.lock().formatted)
    }

    async fn max_size(&self) -> Result<usize, SessionError> {
        Ok(self.lock().capacity)
    }

    async fn write_ndef_message(&self, message: &[u8]) -> Result<(), SessionError> {
        self.store(message, false)
    }

    async fn format_and_write(&self, message: &[u8]) -> Result<(), SessionError> {
        self.store(message, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{read_identifiers, Namespaces};

    #[tokio::test]
    async fn blank_tag_reads_only_hardware_id() {
        let tag = MemoryTag::blank(&[0x04, 0xA1, 0xB2, 0xC3]);
        let reading = read_identifiers(&tag, &Namespaces::default()).await;
        assert_eq!(reading.hardware_id.as_deref(), Some("04A1B2C3"));
        assert_eq!(reading.embedded_id, None);
    }

    #[tokio::test]
    async fn formatted_tag_exposes_embedded_id() {
        let ns = Namespaces::default();
        let message = codec::encode("abc123", &ns).unwrap();
        let tag = MemoryTag::formatted(&[1, 2], Some(&message[..]));
        let reading = read_identifiers(&tag, &ns).await;
        assert_eq!(reading.embedded_id.as_deref(), Some("abc123"));
        assert_eq!(reading.hardware_id.as_deref(), Some("0102"));
    }

    #[tokio::test]
    async fn write_paths_respect_format_state() {
        let tag = MemoryTag::blank(&[9]);
        assert!(matches!(
            tag.write_ndef_message(b"x").await,
            Err(SessionError::NotFormatted)
        ));
        tag.format_and_write(b"x").await.unwrap();
        assert!(matches!(
            tag.format_and_write(b"y").await,
            Err(SessionError::AlreadyFormatted)
        ));
        tag.write_ndef_message(b"y").await.unwrap();
        assert_eq!(tag.message().as_deref(), Some(&b"y"[..]));
        assert_eq!(tag.writes(), 2);
    }
}
