use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

use crate::error::Result;

/// Identity of the media element currently backing the player. Host pages may
/// swap the element without a reload; a new id means listeners must move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "element-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerEventKind {
    Play,
    Pause,
    Seeked,
    TimeUpdate,
    Ended,
    CanPlay,
}

impl PlayerEventKind {
    /// Events that represent a user intent worth broadcasting
    #[must_use]
    pub fn is_control(self) -> bool {
        matches!(self, Self::Play | Self::Pause | Self::Seeked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerEvent {
    pub element: ElementId,
    pub kind: PlayerEventKind,
}

/// The host page's video player. Every call may fail while the player is
/// loading; callers treat failures as soft.
#[async_trait]
pub trait Player: Send + Sync {
    /// Current media element, `None` while no player is mounted
    fn element(&self) -> Option<ElementId>;

    /// Whether the element has enough data to play (`readyState >= 3`)
    fn is_ready(&self) -> bool;

    async fn play(&self) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    async fn seek(&self, position_ms: f64) -> Result<()>;

    fn current_time_ms(&self) -> Result<f64>;

    fn is_paused(&self) -> Result<bool>;

    fn duration_ms(&self) -> Result<f64>;

    /// Element-level events for whichever element is mounted
    fn subscribe(&self) -> broadcast::Receiver<PlayerEvent>;
}
