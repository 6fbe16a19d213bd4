//! Peer connections without a network
//!
//! Descriptions are `sim:{user}:{kinds}` strings listing the tracks the
//! describing side sends. A connection reports `connected` as soon as both
//! descriptions are in place and then surfaces the remote tracks.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tandem_mesh::{
    ConnectionEvent, ConnectionEvents, ConnectionFactory, ConnectionState, LocalTrack, MeshError,
    PeerConnection, RemoteTrack, Result, SenderInfo, SignalingState, TrackKind,
};
use tandem_proto::{IceCandidate, SdpType, SessionDescription, UserId};
use tracing::debug;

struct Link {
    signaling: SignalingState,
    state: ConnectionState,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    senders: Vec<SenderInfo>,
    candidates: usize,
    closed: bool,
}

pub struct SimulatedConnection {
    local_user: UserId,
    link: Mutex<Link>,
    events: ConnectionEvents,
}

impl SimulatedConnection {
    fn new(local_user: UserId, events: ConnectionEvents) -> Self {
        Self {
            local_user,
            link: Mutex::new(Link {
                signaling: SignalingState::Stable,
                state: ConnectionState::New,
                local: None,
                remote: None,
                senders: Vec::new(),
                candidates: 0,
                closed: false,
            }),
            events,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.link.lock().closed
    }

    /// Remote candidates applied so far
    #[must_use]
    pub fn candidates_applied(&self) -> usize {
        self.link.lock().candidates
    }

    /// The network path drops
    pub fn interrupt(&self) {
        let mut link = self.link.lock();
        if link.closed {
            return;
        }
        link.state = ConnectionState::Disconnected;
        drop(link);
        self.events
            .emit(ConnectionEvent::StateChanged(ConnectionState::Disconnected));
    }

    fn describe(&self, sdp_type: SdpType, link: &Link) -> SessionDescription {
        let kinds: Vec<String> = link
            .senders
            .iter()
            .filter(|sender| sender.is_active())
            .map(|sender| sender.kind.to_string())
            .collect();
        SessionDescription {
            sdp_type,
            sdp: format!("sim:{}:{}", self.local_user, kinds.join(",")),
        }
    }

    /// Once both sides are described, connect and surface the remote tracks
    fn settle(&self) {
        let remote = {
            let mut link = self.link.lock();
            let negotiated = link.signaling == SignalingState::Stable
                && link.local.is_some()
                && link.remote.is_some();
            if !negotiated || link.state == ConnectionState::Connected || link.closed {
                return;
            }
            link.state = ConnectionState::Connected;
            link.remote.as_ref().map(|desc| desc.sdp.clone())
        };

        self.events
            .emit(ConnectionEvent::StateChanged(ConnectionState::Connecting));
        self.events
            .emit(ConnectionEvent::StateChanged(ConnectionState::Connected));
        for track in remote.as_deref().map(remote_tracks).unwrap_or_default() {
            self.events.emit(ConnectionEvent::Track(track));
        }
    }

    fn trickle(&self) {
        self.events.emit(ConnectionEvent::LocalCandidate(IceCandidate {
            candidate: format!("candidate:1 1 udp 2122260223 sim-{} 9 typ host", self.local_user),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        }));
    }
}

fn remote_tracks(sdp: &str) -> Vec<RemoteTrack> {
    let mut parts = sdp.splitn(3, ':');
    let (Some("sim"), Some(user), Some(kinds)) = (parts.next(), parts.next(), parts.next()) else {
        return Vec::new();
    };
    kinds
        .split(',')
        .filter_map(|kind| match kind {
            "audio" => Some(TrackKind::Audio),
            "video" => Some(TrackKind::Video),
            _ => None,
        })
        .map(|kind| RemoteTrack::new(format!("{user}-{kind}"), kind))
        .collect()
}

#[async_trait]
impl PeerConnection for SimulatedConnection {
    fn signaling_state(&self) -> SignalingState {
        self.link.lock().signaling
    }

    fn connection_state(&self) -> ConnectionState {
        self.link.lock().state
    }

    fn has_remote_description(&self) -> bool {
        self.link.lock().remote.is_some()
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = {
            let mut link = self.link.lock();
            if link.closed {
                return Err(MeshError::InvalidState("connection closed".to_string()));
            }
            let offer = self.describe(SdpType::Offer, &link);
            link.local = Some(offer.clone());
            link.signaling = SignalingState::HaveLocalOffer;
            link.state = ConnectionState::Connecting;
            offer
        };
        self.trickle();
        Ok(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = {
            let mut link = self.link.lock();
            if link.signaling != SignalingState::HaveRemoteOffer {
                return Err(MeshError::InvalidState(format!(
                    "cannot answer in {:?}",
                    link.signaling
                )));
            }
            let answer = self.describe(SdpType::Answer, &link);
            link.local = Some(answer.clone());
            link.signaling = SignalingState::Stable;
            answer
        };
        self.trickle();
        self.settle();
        Ok(answer)
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        {
            let mut link = self.link.lock();
            link.signaling = match (description.sdp_type, link.signaling) {
                (SdpType::Offer, SignalingState::Stable) => SignalingState::HaveRemoteOffer,
                (SdpType::Answer, SignalingState::HaveLocalOffer) => SignalingState::Stable,
                (sdp_type, state) => {
                    return Err(MeshError::InvalidState(format!(
                        "remote {sdp_type:?} in {state:?}"
                    )));
                }
            };
            link.remote = Some(description);
        }
        self.settle();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if candidate.candidate.is_empty() {
            return Err(MeshError::Connection("empty candidate".to_string()));
        }
        self.link.lock().candidates += 1;
        Ok(())
    }

    fn senders(&self) -> Vec<SenderInfo> {
        self.link.lock().senders.clone()
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        let mut link = self.link.lock();
        let id = format!("{}-sender-{}", self.local_user, link.senders.len());
        link.senders.push(SenderInfo {
            id,
            kind: track.kind,
            track_id: Some(track.id.clone()),
        });
        Ok(())
    }

    async fn replace_track(&self, sender_id: &str, track: &LocalTrack) -> Result<()> {
        let mut link = self.link.lock();
        let sender = link
            .senders
            .iter_mut()
            .find(|sender| sender.id == sender_id)
            .ok_or_else(|| MeshError::Media(format!("unknown sender {sender_id}")))?;
        sender.track_id = Some(track.id.clone());
        Ok(())
    }

    fn close(&self) {
        let mut link = self.link.lock();
        link.closed = true;
        link.signaling = SignalingState::Closed;
        link.state = ConnectionState::Closed;
    }
}

/// Creates [`SimulatedConnection`]s and keeps the latest one per peer
pub struct SimulatedFactory {
    local_user: UserId,
    connections: DashMap<UserId, Arc<SimulatedConnection>>,
    created: DashMap<UserId, usize>,
}

impl SimulatedFactory {
    #[must_use]
    pub fn new(local_user: UserId) -> Self {
        Self {
            local_user,
            connections: DashMap::new(),
            created: DashMap::new(),
        }
    }

    #[must_use]
    pub fn connection_to(&self, peer: &UserId) -> Option<Arc<SimulatedConnection>> {
        self.connections.get(peer).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn created_for(&self, peer: &UserId) -> usize {
        self.created.get(peer).map_or(0, |count| *count)
    }

    /// Drop the network path to `peer`
    pub fn interrupt(&self, peer: &UserId) {
        if let Some(connection) = self.connection_to(peer) {
            connection.interrupt();
        }
    }
}

#[async_trait]
impl ConnectionFactory for SimulatedFactory {
    async fn create(
        &self,
        peer: &UserId,
        ice_servers: &[String],
        events: ConnectionEvents,
    ) -> Result<Arc<dyn PeerConnection>> {
        debug!(peer_id = %peer, ice_servers = ice_servers.len(), "Creating simulated connection");
        let connection = Arc::new(SimulatedConnection::new(self.local_user.clone(), events));
        self.connections.insert(peer.clone(), Arc::clone(&connection));
        *self.created.entry(peer.clone()).or_default() += 1;
        Ok(connection)
    }
}
