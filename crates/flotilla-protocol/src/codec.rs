//! JSON envelope codec.
//!
//! Every message is a flat UTF-8 JSON object. Binary payloads (weights,
//! archives) travel as standard base64 text fields inside the envelope.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::ProtocolError;

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(message).map_err(|e| ProtocolError::Encode(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(payload).map_err(|e| ProtocolError::Decode(e.to_string()))
}

pub fn encode_blob(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn decode_blob(text: &str) -> Result<Vec<u8>, ProtocolError> {
    BASE64
        .decode(text.trim())
        .map_err(|e| ProtocolError::Blob(e.to_string()))
}
