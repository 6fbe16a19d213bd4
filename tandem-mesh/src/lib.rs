//! Full-mesh peer connections for a Tandem room
//!
//! Every member keeps one connection to every other member. Connections are
//! negotiated over the relay with `JOIN`/`OFFER`/`ANSWER`/`ICE_CANDIDATE`/`LEAVE`
//! frames; the WebRTC stack itself sits behind [`ConnectionFactory`].
//!
//! ```ignore
//! let mesh = MeshCoordinator::new(config.mesh, session, bus, factory, observer);
//! mesh.set_local_media(LocalMedia::new(Some(mic), Some(cam))).await;
//! mesh.handle(&sender, message).await?;
//! ```

pub mod connection;
pub mod coordinator;
pub mod error;
pub mod media;
pub mod observer;
pub mod reconnect;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use connection::{
    ConnectionEvent, ConnectionEvents, ConnectionFactory, ConnectionState, PeerConnection,
    SenderInfo, SignalingState,
};
pub use coordinator::MeshCoordinator;
pub use error::{MeshError, Result};
pub use media::{LocalMedia, LocalTrack, RemoteStream, RemoteTrack, TrackKind};
pub use observer::{MeshObserver, PeerStatus};
pub use reconnect::{ReconnectionPolicy, Scheduled};
