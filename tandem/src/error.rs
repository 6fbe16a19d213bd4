use tandem_mesh::MeshError;
use tandem_proto::ProtoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Inbound text that is not a known envelope
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtoError),

    #[error(transparent)]
    Sync(#[from] tandem_core::Error),

    #[error(transparent)]
    Mesh(#[from] MeshError),

    #[error("Only the host can {0}")]
    NotHost(&'static str),

    #[error("Party is not running")]
    Inactive,
}

pub type Result<T> = std::result::Result<T, Error>;
