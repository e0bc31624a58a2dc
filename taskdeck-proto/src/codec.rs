//! JSON encoding shared by the HTTP client and the local ledger files.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The bytes are not valid JSON for the expected type.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Encodes a value as JSON bytes.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the value cannot be serialized.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(value).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a value as a JSON string.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the value cannot be serialized.
pub fn encode_string<T: Serialize + ?Sized>(value: &T) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a value from JSON bytes.
///
/// # Errors
///
/// Returns `CodecError::Malformed` if the bytes cannot be deserialized
/// into `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))
}

/// Decodes a value from JSON bytes, treating an empty or whitespace-only
/// body as absent.
///
/// # Errors
///
/// Returns `CodecError::Malformed` if a non-empty body cannot be
/// deserialized into `T`.
pub fn decode_optional<T: DeserializeOwned>(bytes: &[u8]) -> Result<Option<T>, CodecError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    decode(bytes).map(Some)
}
