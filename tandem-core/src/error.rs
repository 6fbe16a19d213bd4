use thiserror::Error;

/// Errors surfaced by the playback core.
///
/// None of these end a party: callers log them and leave the next heartbeat
/// or position report to converge the players.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Player unavailable: {0}")]
    PlayerUnavailable(String),

    #[error("Player rejected action: {0}")]
    Player(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Message bus error: {0}")]
    Bus(String),

    #[error("Navigation error: {0}")]
    Navigation(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] tandem_proto::ProtoError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
