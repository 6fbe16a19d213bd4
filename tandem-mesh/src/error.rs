use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeshError {
    /// The connection was in the wrong signaling state for the operation
    #[error("Invalid signaling state: {0}")]
    InvalidState(String),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Media error: {0}")]
    Media(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error(transparent)]
    Bus(#[from] tandem_core::Error),
}

pub type Result<T> = std::result::Result<T, MeshError>;
