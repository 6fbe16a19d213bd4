//! Tandem wire protocol
//!
//! Every message exchanged through the relay is a flat JSON object with a
//! `type` tag. Field names are shared with independently deployed clients,
//! so they are spelled out explicitly rather than derived.
//!
//! ## Categories
//!
//! - **Playback** (`PLAY_PAUSE`, `SEEK`, `HOST_HEARTBEAT`, ...): consumed by the
//!   playback sync coordinator
//! - **Signaling** (`JOIN`, `OFFER`, `ANSWER`, `ICE_CANDIDATE`, `LEAVE`): consumed
//!   by the peer mesh coordinator
//! - **Room** (`ROOM_STATE`, `HOST_CHANGED`, ...): role and membership updates
//!   applied to the session
//!
//! Inbound text is decoded once into a [`Frame`] and never handled as raw JSON
//! past this crate.

mod error;
mod frame;
mod ids;
mod playback;
mod room;
mod signaling;

pub use error::ProtoError;
pub use frame::{Category, Envelope, Frame};
pub use ids::{RoomId, UserId};
pub use playback::{PlaybackControl, PlaybackMessage};
pub use room::RoomMessage;
pub use signaling::{IceCandidate, SdpType, SessionDescription, SignalingMessage};
