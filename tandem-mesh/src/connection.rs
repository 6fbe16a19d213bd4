//! Peer connection capability
//!
//! The mesh never talks to a WebRTC stack directly. The outer layer provides
//! a [`ConnectionFactory`]; every connection it creates reports back through
//! the [`ConnectionEvents`] handle it was given.

use async_trait::async_trait;
use std::sync::Arc;
use tandem_proto::{IceCandidate, SessionDescription, UserId};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::media::{LocalTrack, RemoteTrack, TrackKind};

/// Offer/answer state (`RTCSignalingState`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

/// Transport state (`RTCPeerConnectionState`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// States from which the connection will not recover on its own
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

/// Outbound media sender of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderInfo {
    pub id: String,
    pub kind: TrackKind,
    /// Track currently sent, `None` once the sender was stopped
    pub track_id: Option<String>,
}

impl SenderInfo {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.track_id.is_some()
    }
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    fn signaling_state(&self) -> SignalingState;

    fn connection_state(&self) -> ConnectionState;

    fn has_remote_description(&self) -> bool;

    /// Create an offer and apply it as the local description
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Create an answer and apply it as the local description
    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    fn senders(&self) -> Vec<SenderInfo>;

    async fn add_track(&self, track: &LocalTrack) -> Result<()>;

    async fn replace_track(&self, sender_id: &str, track: &LocalTrack) -> Result<()>;

    fn close(&self);
}

#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create(
        &self,
        peer: &UserId,
        ice_servers: &[String],
        events: ConnectionEvents,
    ) -> Result<Arc<dyn PeerConnection>>;
}

/// What a connection reports about itself
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    Track(RemoteTrack),
    /// A local ICE candidate to trickle to the peer
    LocalCandidate(IceCandidate),
}

#[derive(Debug, Clone)]
pub(crate) struct PeerEvent {
    pub peer: UserId,
    pub generation: u64,
    pub event: ConnectionEvent,
}

/// Event sink handed to a connection at creation. The generation lets the
/// mesh ignore events from a connection it has already replaced.
#[derive(Debug, Clone)]
pub struct ConnectionEvents {
    peer: UserId,
    generation: u64,
    tx: mpsc::UnboundedSender<PeerEvent>,
}

impl ConnectionEvents {
    pub(crate) fn new(peer: UserId, generation: u64, tx: mpsc::UnboundedSender<PeerEvent>) -> Self {
        Self { peer, generation, tx }
    }

    #[must_use]
    pub fn peer(&self) -> &UserId {
        &self.peer
    }

    pub fn emit(&self, event: ConnectionEvent) {
        // The mesh is gone; nothing left to notify
        let _ = self.tx.send(PeerEvent {
            peer: self.peer.clone(),
            generation: self.generation,
            event,
        });
    }
}
