//! NDEF text-record codec for application tag identifiers.
//!
//! A provisioned tag carries one well-known `T` record whose text is
//! `<namespace>:<tag id>`. Tags without such a record fall back to the
//! hex-encoded hardware serial.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use thiserror::Error;
use tracing::debug;

pub const TNF_WELL_KNOWN: u8 = 0x01;
pub const RTD_TEXT: &[u8] = b"T";

const FLAG_MB: u8 = 0x80;
const FLAG_ME: u8 = 0x40;
const FLAG_CF: u8 = 0x20;
const FLAG_SR: u8 = 0x10;
const FLAG_IL: u8 = 0x08;
const TNF_MASK: u8 = 0x07;

const STATUS_UTF16: u8 = 0x80;
const LANGUAGE_LENGTH_MASK: u8 = 0x3F;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("tag id is empty")]
    EmptyId,
    #[error("tag id contains control character {0:?}")]
    ControlCharacter(char),
    #[error("language code {0:?} must be 1-63 ASCII bytes")]
    InvalidLanguage(String),
    #[error("payload of {0} bytes is too large for one record")]
    PayloadTooLarge(usize),
    #[error("record truncated")]
    Truncated,
    #[error("chunked records are not supported")]
    Chunked,
    #[error("text is not valid {0}")]
    BadEncoding(&'static str),
    #[error("empty message")]
    Empty,
}

/// Namespace tokens that mark a text record as ours, in lookup priority order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespaces {
    pub current: String,
    #[serde(default)]
    pub legacy: Vec<String>,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for Namespaces {
    fn default() -> Self {
        Self {
            current: "org.oneeyedmanlabs.audiotag".to_string(),
            legacy: vec!["AUDIOTAG".to_string()],
            language: default_language(),
        }
    }
}

impl Namespaces {
    pub fn new(current: impl Into<String>, legacy: Vec<String>) -> Self {
        Self {
            current: current.into(),
            legacy,
            language: default_language(),
        }
    }

    fn prefixes(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.current.as_str()).chain(self.legacy.iter().map(String::as_str))
    }

    /// Returns the id after the first matching `<namespace>:` prefix.
    pub fn strip<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.prefixes().find_map(|ns| {
            text.strip_prefix(ns)
                .and_then(|rest| rest.strip_prefix(':'))
                .filter(|id| !id.is_empty())
        })
    }
}

/// One parsed NDEF record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefRecord {
    pub tnf: u8,
    pub record_type: Bytes,
    pub payload: Bytes,
}

impl NdefRecord {
    pub fn is_text(&self) -> bool {
        self.tnf == TNF_WELL_KNOWN && self.record_type.as_ref() == RTD_TEXT
    }
}

fn validate_id(id: &str) -> Result<(), CodecError> {
    if id.is_empty() {
        return Err(CodecError::EmptyId);
    }
    if let Some(c) = id.chars().find(|c| c.is_control()) {
        return Err(CodecError::ControlCharacter(c));
    }
    Ok(())
}

/// Builds the text-record payload: status byte, language code, UTF-8 text.
pub fn encode_text_payload(id: &str, namespaces: &Namespaces) -> Result<Bytes, CodecError> {
    validate_id(id)?;
    let language = namespaces.language.as_bytes();
    if language.is_empty()
        || language.len() > LANGUAGE_LENGTH_MASK as usize
        || !namespaces.language.is_ascii()
    {
        return Err(CodecError::InvalidLanguage(namespaces.language.clone()));
    }
    let text = format!("{}:{}", namespaces.current, id);

    let mut payload = BytesMut::with_capacity(1 + language.len() + text.len());
    payload.put_u8(language.len() as u8);
    payload.put_slice(language);
    payload.put_slice(text.as_bytes());
    Ok(payload.freeze())
}

/// Encodes `id` as a complete single-record NDEF message.
pub fn encode(id: &str, namespaces: &Namespaces) -> Result<Bytes, CodecError> {
    let payload = encode_text_payload(id, namespaces)?;
    let short = payload.len() <= u8::MAX as usize;
    if payload.len() > u32::MAX as usize {
        return Err(CodecError::PayloadTooLarge(payload.len()));
    }

    let mut header = FLAG_MB | FLAG_ME | TNF_WELL_KNOWN;
    if short {
        header |= FLAG_SR;
    }
    let mut message = BytesMut::with_capacity(payload.len() + 7);
    message.put_u8(header);
    message.put_u8(RTD_TEXT.len() as u8);
    if short {
        message.put_u8(payload.len() as u8);
    } else {
        message.put_u32(payload.len() as u32);
    }
    message.put_slice(RTD_TEXT);
    message.put_slice(&payload);
    Ok(message.freeze())
}

/// Splits a raw NDEF message into its records.
pub fn records(message: &[u8]) -> Result<Vec<NdefRecord>, CodecError> {
    if message.is_empty() {
        return Err(CodecError::Empty);
    }
    let mut out = Vec::new();
    let mut pos = 0usize;

    loop {
        let header = take(message, &mut pos, 1)?[0];
        if header & FLAG_CF != 0 {
            return Err(CodecError::Chunked);
        }
        let type_len = take(message, &mut pos, 1)?[0] as usize;
        let payload_len = if header & FLAG_SR != 0 {
            take(message, &mut pos, 1)?[0] as usize
        } else {
            let b = take(message, &mut pos, 4)?;
            u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize
        };
        let id_len = if header & FLAG_IL != 0 {
            take(message, &mut pos, 1)?[0] as usize
        } else {
            0
        };
        let record_type = Bytes::copy_from_slice(take(message, &mut pos, type_len)?);
        take(message, &mut pos, id_len)?;
        let payload = Bytes::copy_from_slice(take(message, &mut pos, payload_len)?);
        out.push(NdefRecord {
            tnf: header & TNF_MASK,
            record_type,
            payload,
        });
        if header & FLAG_ME != 0 || pos >= message.len() {
            break;
        }
    }
    Ok(out)
}

fn take<'a>(message: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8], CodecError> {
    let end = pos.checked_add(n).ok_or(CodecError::Truncated)?;
    let slice = message.get(*pos..end).ok_or(CodecError::Truncated)?;
    *pos = end;
    Ok(slice)
}

/// Payloads of all text records in a message.
pub fn text_payloads(message: &[u8]) -> Result<Vec<Bytes>, CodecError> {
    Ok(records(message)?
        .into_iter()
        .filter(NdefRecord::is_text)
        .map(|r| r.payload)
        .collect())
}

/// Decodes the text carried by a text-record payload.
pub fn text_of_payload(payload: &[u8]) -> Result<String, CodecError> {
    let status = *payload.first().ok_or(CodecError::Empty)?;
    let language_len = (status & LANGUAGE_LENGTH_MASK) as usize;
    let body = payload.get(1 + language_len..).ok_or(CodecError::Truncated)?;

    if status & STATUS_UTF16 == 0 {
        return std::str::from_utf8(body)
            .map(str::to_string)
            .map_err(|_| CodecError::BadEncoding("UTF-8"));
    }

    if body.len() % 2 != 0 {
        return Err(CodecError::BadEncoding("UTF-16"));
    }
    let mut units: Vec<u16> = body
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    match units.first() {
        Some(0xFEFF) => {
            units.remove(0);
        }
        Some(0xFFFE) => {
            units.remove(0);
            for u in units.iter_mut() {
                *u = u.swap_bytes();
            }
        }
        _ => {}
    }
    String::from_utf16(&units).map_err(|_| CodecError::BadEncoding("UTF-16"))
}

/// Recovers our tag id from one text-record payload.
pub fn decode_text_payload(payload: &[u8], namespaces: &Namespaces) -> Option<String> {
    match text_of_payload(payload) {
        Ok(text) => namespaces.strip(&text).map(str::to_string),
        Err(e) => {
            debug!(error = %e, "ignoring malformed text record");
            None
        }
    }
}

/// Recovers our tag id from a complete NDEF message.
pub fn decode(message: &[u8], namespaces: &Namespaces) -> Option<String> {
    match text_payloads(message) {
        Ok(payloads) => payloads
            .iter()
            .find_map(|p| decode_text_payload(p, namespaces)),
        Err(e) => {
            debug!(error = %e, "ignoring malformed NDEF message");
            None
        }
    }
}

/// Uppercase hex of the tag serial, two digits per byte, no separators.
pub fn hardware_id_of(serial: &[u8]) -> String {
    let mut out = String::with_capacity(serial.len() * 2);
    for b in serial {
        let _ = write!(out, "{:02X}", b);
    }
    out
}

/// Inverse of [`hardware_id_of`]; accepts either case.
pub fn serial_from_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}
