//! Scripted connections, factory and observer for mesh tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tandem_core::{MeshConfig, MessageBus, Session};
use tandem_proto::{Frame, IceCandidate, RoomId, SdpType, SessionDescription, UserId};

use crate::connection::{
    ConnectionEvent, ConnectionEvents, ConnectionFactory, ConnectionState, PeerConnection,
    SenderInfo, SignalingState,
};
use crate::coordinator::MeshCoordinator;
use crate::error::{MeshError, Result};
use crate::media::{LocalTrack, RemoteStream};
use crate::observer::{MeshObserver, PeerStatus};

pub fn candidate(line: &str) -> IceCandidate {
    IceCandidate {
        candidate: line.to_string(),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
    }
}

pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

struct ConnectionInner {
    signaling: SignalingState,
    state: ConnectionState,
    remote: Option<SessionDescription>,
    candidates: Vec<String>,
    senders: Vec<SenderInfo>,
    closed: bool,
    reject_remote: bool,
    fail_offer: bool,
}

pub struct FakeConnection {
    inner: Mutex<ConnectionInner>,
    events: ConnectionEvents,
}

impl FakeConnection {
    fn new(events: ConnectionEvents, fail_offer: bool) -> Self {
        Self {
            inner: Mutex::new(ConnectionInner {
                signaling: SignalingState::Stable,
                state: ConnectionState::New,
                remote: None,
                candidates: Vec::new(),
                senders: Vec::new(),
                closed: false,
                reject_remote: false,
                fail_offer,
            }),
            events,
        }
    }

    pub fn emit(&self, event: ConnectionEvent) {
        self.events.emit(event);
    }

    pub fn emit_state(&self, state: ConnectionState) {
        self.inner.lock().state = state;
        self.events.emit(ConnectionEvent::StateChanged(state));
    }

    pub fn reject_remote_descriptions(&self) {
        self.inner.lock().reject_remote = true;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn remote_sdp(&self) -> Option<String> {
        self.inner.lock().remote.as_ref().map(|desc| desc.sdp.clone())
    }

    pub fn candidates(&self) -> Vec<String> {
        self.inner.lock().candidates.clone()
    }

    pub fn track_ids(&self) -> Vec<String> {
        self.inner
            .lock()
            .senders
            .iter()
            .filter_map(|sender| sender.track_id.clone())
            .collect()
    }
}

#[async_trait]
impl PeerConnection for FakeConnection {
    fn signaling_state(&self) -> SignalingState {
        self.inner.lock().signaling
    }

    fn connection_state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    fn has_remote_description(&self) -> bool {
        self.inner.lock().remote.is_some()
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let mut inner = self.inner.lock();
        if inner.fail_offer {
            return Err(MeshError::Negotiation("offer refused".to_string()));
        }
        inner.signaling = SignalingState::HaveLocalOffer;
        Ok(SessionDescription::offer(format!("offer-to-{}", self.events.peer())))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let mut inner = self.inner.lock();
        if inner.signaling != SignalingState::HaveRemoteOffer {
            return Err(MeshError::InvalidState("no remote offer".to_string()));
        }
        inner.signaling = SignalingState::Stable;
        Ok(SessionDescription::answer(format!("answer-to-{}", self.events.peer())))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.reject_remote {
            return Err(MeshError::InvalidState("remote description rejected".to_string()));
        }
        inner.signaling = match (description.sdp_type, inner.signaling) {
            (SdpType::Offer, SignalingState::Stable) => SignalingState::HaveRemoteOffer,
            (SdpType::Answer, SignalingState::HaveLocalOffer) => SignalingState::Stable,
            (sdp_type, state) => {
                return Err(MeshError::InvalidState(format!("{sdp_type:?} in {state:?}")));
            }
        };
        inner.remote = Some(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if candidate.candidate == "bad" {
            return Err(MeshError::Connection("malformed candidate".to_string()));
        }
        self.inner.lock().candidates.push(candidate.candidate);
        Ok(())
    }

    fn senders(&self) -> Vec<SenderInfo> {
        self.inner.lock().senders.clone()
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        let mut inner = self.inner.lock();
        let id = format!("sender-{}", inner.senders.len());
        inner.senders.push(SenderInfo {
            id,
            kind: track.kind,
            track_id: Some(track.id.clone()),
        });
        Ok(())
    }

    async fn replace_track(&self, sender_id: &str, track: &LocalTrack) -> Result<()> {
        let mut inner = self.inner.lock();
        let sender = inner
            .senders
            .iter_mut()
            .find(|sender| sender.id == sender_id)
            .ok_or_else(|| MeshError::Media(format!("unknown sender {sender_id}")))?;
        sender.track_id = Some(track.id.clone());
        Ok(())
    }

    fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.signaling = SignalingState::Closed;
        inner.state = ConnectionState::Closed;
    }
}

#[derive(Default)]
pub struct FakeFactory {
    created: Mutex<Vec<(UserId, Arc<FakeConnection>)>>,
    failing_offers: Mutex<u32>,
}

impl FakeFactory {
    /// The next `count` connections refuse to create an offer
    pub fn fail_offers(&self, count: u32) {
        *self.failing_offers.lock() = count;
    }

    pub fn all_for(&self, peer: &UserId) -> Vec<Arc<FakeConnection>> {
        self.created
            .lock()
            .iter()
            .filter(|(owner, _)| owner == peer)
            .map(|(_, connection)| Arc::clone(connection))
            .collect()
    }

    pub fn created_for(&self, peer: &UserId) -> usize {
        self.all_for(peer).len()
    }

    pub fn latest(&self, peer: &UserId) -> Option<Arc<FakeConnection>> {
        self.all_for(peer).pop()
    }
}

#[async_trait]
impl ConnectionFactory for FakeFactory {
    async fn create(
        &self,
        peer: &UserId,
        _ice_servers: &[String],
        events: ConnectionEvents,
    ) -> Result<Arc<dyn PeerConnection>> {
        let fail_offer = {
            let mut failing = self.failing_offers.lock();
            let fail = *failing > 0;
            *failing = failing.saturating_sub(1);
            fail
        };
        let connection = Arc::new(FakeConnection::new(events, fail_offer));
        self.created
            .lock()
            .push((peer.clone(), Arc::clone(&connection)));
        Ok(connection)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverCall {
    State(UserId, PeerStatus),
    StreamAdded(UserId),
    StreamUpdated(UserId),
    StreamRemoved(UserId),
}

#[derive(Default)]
pub struct RecordingObserver {
    calls: Mutex<Vec<ObserverCall>>,
}

impl RecordingObserver {
    pub fn statuses(&self, peer: &UserId) -> Vec<PeerStatus> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                ObserverCall::State(owner, status) if owner == peer => Some(*status),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &ObserverCall) -> usize {
        self.calls.lock().iter().filter(|call| *call == wanted).count()
    }
}

impl MeshObserver for RecordingObserver {
    fn peer_state(&self, peer: &UserId, status: PeerStatus) {
        self.calls.lock().push(ObserverCall::State(peer.clone(), status));
    }

    fn stream_added(&self, peer: &UserId, _stream: &RemoteStream) {
        self.calls.lock().push(ObserverCall::StreamAdded(peer.clone()));
    }

    fn stream_updated(&self, peer: &UserId, _stream: &RemoteStream) {
        self.calls.lock().push(ObserverCall::StreamUpdated(peer.clone()));
    }

    fn stream_removed(&self, peer: &UserId) {
        self.calls.lock().push(ObserverCall::StreamRemoved(peer.clone()));
    }
}

#[derive(Default)]
pub struct RecordingBus {
    frames: Mutex<Vec<Frame>>,
}

impl RecordingBus {
    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.frames.lock().iter().map(Frame::kind).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.frames.lock().iter().filter(|f| f.kind() == kind).count()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }
}

impl MessageBus for RecordingBus {
    fn send(&self, frame: Frame) -> tandem_core::Result<()> {
        self.frames.lock().push(frame);
        Ok(())
    }
}

pub struct MeshHarness {
    pub mesh: Arc<MeshCoordinator>,
    pub bus: Arc<RecordingBus>,
    pub factory: Arc<FakeFactory>,
    pub observer: Arc<RecordingObserver>,
}

pub fn mesh() -> MeshHarness {
    mesh_with(MeshConfig::default())
}

/// Local user "me", active in "room"
pub fn mesh_with(config: MeshConfig) -> MeshHarness {
    let session = Arc::new(Session::new(UserId::from("me")));
    session.start(RoomId::from("room"));
    let bus = Arc::new(RecordingBus::default());
    let factory = Arc::new(FakeFactory::default());
    let observer = Arc::new(RecordingObserver::default());
    let mesh = MeshCoordinator::new(
        config,
        session,
        Arc::clone(&bus) as Arc<dyn MessageBus>,
        Arc::clone(&factory) as Arc<dyn ConnectionFactory>,
        Arc::clone(&observer) as Arc<dyn MeshObserver>,
    );
    MeshHarness {
        mesh,
        bus,
        factory,
        observer,
    }
}
