/// Errors raised while encoding, decoding or validating protocol messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("unsupported task kind '{0}'")]
    UnknownTaskKind(String),

    #[error("invalid base64 payload: {0}")]
    Blob(String),
}

impl ProtocolError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
