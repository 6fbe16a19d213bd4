//! Tandem playback core
//!
//! Keeps every member's player aligned with the room. The outer layer
//! supplies the capabilities (player, message bus, navigator, clock) and
//! feeds decoded playback frames and URL changes in; everything else runs
//! inside [`SyncCoordinator`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tandem_core::{Capabilities, Config, Session, SyncCoordinator};
//!
//! let config = Config::load(None)?;
//! let session = Arc::new(Session::new(UserId::generate()));
//! let sync = SyncCoordinator::new(config.sync, session.clone(), capabilities);
//!
//! session.start(room_id);
//! sync.on_url_changed(previous_url, current_url);
//! ```

pub mod bus;
pub mod clock;
pub mod config;
pub mod error;
pub mod expected;
pub mod latency;
pub mod lock;
pub mod logging;
pub mod navigation;
pub mod player;
pub mod session;
pub mod sync;

#[cfg(test)]
pub mod test_helpers;

pub use bus::MessageBus;
pub use clock::{Clock, SystemClock};
pub use config::{Config, GlarePolicy, LoggingConfig, MeshConfig, ReconnectConfig, SyncConfig};
pub use error::{Error, Result};
pub use navigation::{Navigator, Surface, SurfaceRules, Transition};
pub use player::{ElementId, Player, PlayerEvent, PlayerEventKind};
pub use session::{Roles, Session};
pub use sync::{
    Capabilities, LocalOutcome, PeerPosition, RemoteOutcome, SetupOutcome, SurfaceEntry,
    SyncCoordinator, SyncPhase,
};
