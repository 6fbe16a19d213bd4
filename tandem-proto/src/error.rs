use thiserror::Error;

/// Errors raised while decoding or encoding wire frames
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Frame has no type tag")]
    MissingType,

    #[error("Unknown frame type: {0}")]
    UnknownType(String),
}
