//! Playback sync coordinator
//!
//! Decides, for every local and remote playback event, whether to apply,
//! suppress, ignore or re-seek. One watch surface is attached at a time; its
//! listener, position reporter, host heartbeat and player watchdog all hang
//! off a single cancellation token that navigation away cancels.
//!
//! ## Phases
//!
//! `Uninitialized -> AwaitingInitialSync -> Initialized`, rebuilt on every
//! navigation to a watch surface.

mod coordinator;
mod remote;
mod wait;

pub use coordinator::SyncCoordinator;

use std::sync::Arc;

use crate::bus::MessageBus;
use crate::clock::Clock;
use crate::navigation::Navigator;
use crate::player::Player;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    #[default]
    Uninitialized,
    AwaitingInitialSync,
    Initialized,
}

/// How the current watch surface was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceEntry {
    /// Came straight from a browse page
    pub from_browse: bool,
    /// The player advanced to this episode by itself; peers should only align the position
    pub respect_auto_play: bool,
}

/// Which setup path a watch surface took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupOutcome {
    Inactive,
    PlayerUnavailable,
    AppliedPending,
    Leader,
    RequestedSync,
    Cancelled,
}

/// Fate of a locally observed player event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalOutcome {
    Broadcast,
    /// Caused by one of our own player calls
    Echo,
    /// Dropped while the suppression lock was armed
    Suppressed,
    Unauthorized,
    Ignored,
}

/// Fate of a remote playback envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// The local player was driven
    Applied,
    /// Drift below threshold, nothing to do
    InSync,
    Navigated,
    Recorded,
    Responded,
    Ignored,
    /// Non-finite or negative times
    Invalid,
}

/// Last position reported by a peer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeerPosition {
    pub current_time: f64,
    pub is_playing: bool,
    pub reported_at_ms: i64,
}

/// External capabilities the coordinator drives
#[derive(Clone)]
pub struct Capabilities {
    pub player: Arc<dyn Player>,
    pub bus: Arc<dyn MessageBus>,
    pub navigator: Arc<dyn Navigator>,
    pub clock: Arc<dyn Clock>,
}

/// Rejects what must never reach the player
fn valid_time(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}
