//! Codec for encoding and decoding Ripple envelopes.
//!
//! Frames travel as JSON text. Decoding is strict about the envelope shape
//! (an object with a non-empty string `type`) and lenient about `data`.

use serde_json::Value;
use thiserror::Error;

use crate::envelope::Envelope;

/// Maximum frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Frame bytes are not UTF-8.
    #[error("Frame is not valid UTF-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON that is not an envelope.
    #[error("Invalid frame: {0}")]
    Invalid(&'static str),
}

/// Encode an envelope to JSON text.
///
/// # Errors
///
/// Returns an error if the encoded frame is too large or serialization fails.
pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(envelope)?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(text)
}

/// Decode an envelope from JSON text.
///
/// # Errors
///
/// Returns an error if the text is too large, not JSON, or not an envelope.
pub fn decode(text: &str) -> Result<Envelope, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    let value: Value = serde_json::from_str(text)?;
    let object = value
        .as_object()
        .ok_or(ProtocolError::Invalid("frame is not a JSON object"))?;

    match object.get("type") {
        Some(Value::String(kind)) if !kind.is_empty() => {}
        Some(Value::String(_)) => return Err(ProtocolError::Invalid("empty \"type\"")),
        _ => return Err(ProtocolError::Invalid("missing string \"type\"")),
    }

    Ok(serde_json::from_value(value)?)
}

/// Decode an envelope from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not UTF-8 or [`decode`] fails.
pub fn decode_bytes(data: &[u8]) -> Result<Envelope, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }
    decode(std::str::from_utf8(data)?)
}
