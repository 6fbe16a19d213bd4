//! Peer mesh coordinator
//!
//! Owns one connection per remote member and drives the offer/answer and
//! candidate exchange for it. Every handler is safe to replay: a duplicate
//! JOIN finds the live connection, a duplicate OFFER replaces it, and an
//! ANSWER in the wrong state is dropped.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tandem_core::{GlarePolicy, MeshConfig, MessageBus, Session};
use tandem_proto::{Frame, IceCandidate, SessionDescription, SignalingMessage, UserId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connection::{
    ConnectionEvent, ConnectionEvents, ConnectionFactory, ConnectionState, PeerConnection,
    PeerEvent, SignalingState,
};
use crate::error::{MeshError, Result};
use crate::media::{Binding, LocalMedia, MediaBindings, RemoteStream, RemoteTrack};
use crate::observer::{MeshObserver, PeerStatus};
use crate::reconnect::{ReconnectionPolicy, Scheduled};

struct PeerSlot {
    generation: u64,
    connection: Arc<dyn PeerConnection>,
}

pub struct MeshCoordinator {
    config: MeshConfig,
    session: Arc<Session>,
    bus: Arc<dyn MessageBus>,
    factory: Arc<dyn ConnectionFactory>,
    observer: Arc<dyn MeshObserver>,
    peers: DashMap<UserId, PeerSlot>,
    /// Candidates that arrived before the remote description
    pending_candidates: DashMap<UserId, Vec<IceCandidate>>,
    local_media: RwLock<LocalMedia>,
    bindings: MediaBindings,
    reconnect: ReconnectionPolicy,
    next_generation: AtomicU64,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl MeshCoordinator {
    /// Create the coordinator and start its connection event loop
    pub fn new(
        config: MeshConfig,
        session: Arc<Session>,
        bus: Arc<dyn MessageBus>,
        factory: Arc<dyn ConnectionFactory>,
        observer: Arc<dyn MeshObserver>,
    ) -> Arc<Self> {
        let (events, mut rx) = mpsc::unbounded_channel();
        let reconnect = ReconnectionPolicy::new(config.reconnect.clone(), Arc::clone(&session));
        let mesh = Arc::new(Self {
            config,
            session,
            bus,
            factory,
            observer,
            peers: DashMap::new(),
            pending_candidates: DashMap::new(),
            local_media: RwLock::new(LocalMedia::default()),
            bindings: MediaBindings::new(),
            reconnect,
            next_generation: AtomicU64::new(1),
            events,
        });

        let weak = Arc::downgrade(&mesh);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(mesh) = weak.upgrade() else {
                    break;
                };
                mesh.handle_peer_event(event);
            }
            debug!("Mesh event loop stopped");
        });

        info!(
            ice_servers = mesh.config.ice_servers.len(),
            glare_policy = ?mesh.config.glare_policy,
            "Mesh coordinator initialized"
        );
        mesh
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn has_connection(&self, peer: &UserId) -> bool {
        self.peers.contains_key(peer)
    }

    #[must_use]
    pub fn connection_state(&self, peer: &UserId) -> Option<ConnectionState> {
        self.connection(peer)
            .map(|(_, connection)| connection.connection_state())
    }

    #[must_use]
    pub fn remote_stream(&self, peer: &UserId) -> Option<RemoteStream> {
        self.bindings.stream(peer)
    }

    #[must_use]
    pub fn reconnect_attempts(&self, peer: &UserId) -> u32 {
        self.reconnect.attempts(peer)
    }

    #[must_use]
    pub fn buffered_candidates(&self, peer: &UserId) -> usize {
        self.pending_candidates.get(peer).map_or(0, |queue| queue.len())
    }

    fn connection(&self, peer: &UserId) -> Option<(u64, Arc<dyn PeerConnection>)> {
        self.peers
            .get(peer)
            .map(|slot| (slot.generation, Arc::clone(&slot.connection)))
    }

    // ------------------------------------------------------------------
    // Signaling handlers
    // ------------------------------------------------------------------

    /// Route one decoded signaling envelope
    pub async fn handle(self: &Arc<Self>, sender: &UserId, message: SignalingMessage) -> Result<()> {
        match message {
            SignalingMessage::Join => self.on_join(sender).await,
            SignalingMessage::Offer { offer } => self.on_offer(sender, offer).await,
            SignalingMessage::Answer { answer } => self.on_answer(sender, answer).await,
            SignalingMessage::IceCandidate { candidate } => {
                self.on_ice_candidate(sender, candidate).await;
                Ok(())
            }
            SignalingMessage::Leave => {
                self.on_leave(sender);
                Ok(())
            }
        }
    }

    /// A member announced itself; we initiate the connection
    pub async fn on_join(&self, peer: &UserId) -> Result<()> {
        if peer == self.session.local_user_id() {
            debug!("Ignoring JOIN from self");
            return Ok(());
        }
        self.reconnect.clear_departed(peer);
        self.reconnect.reset(peer);

        if let Some((_, existing)) = self.connection(peer) {
            if !existing.connection_state().is_terminal()
                && existing.signaling_state() != SignalingState::Closed
            {
                debug!(peer_id = %peer, "Connection already live, JOIN ignored");
                return Ok(());
            }
            self.discard(peer);
            self.release_media(peer);
        }

        info!(peer_id = %peer, "Peer joined, sending offer");
        self.observer.peer_state(peer, PeerStatus::Connecting);
        self.initiate(peer).await
    }

    /// Fresh connection, local media, offer. Nothing is kept on failure.
    async fn initiate(&self, peer: &UserId) -> Result<()> {
        let (generation, connection) = self.open(peer).await?;
        self.attach_local_media(peer, connection.as_ref()).await;

        let sent = async {
            let offer = connection.create_offer().await?;
            self.send(peer, SignalingMessage::Offer { offer })
        }
        .await;
        if let Err(e) = sent {
            warn!(peer_id = %peer, error = %e, "Offer failed, connection discarded");
            self.discard_generation(peer, generation);
            return Err(e);
        }
        Ok(())
    }

    /// A remote offer always replaces whatever connection exists, unless the
    /// polite-peer policy tells us to keep our own outstanding offer
    pub async fn on_offer(&self, peer: &UserId, offer: SessionDescription) -> Result<()> {
        if peer == self.session.local_user_id() {
            return Ok(());
        }

        if let Some((_, existing)) = self.connection(peer) {
            if self.keeps_own_offer(peer, existing.as_ref()) {
                info!(peer_id = %peer, "Offer collision, keeping our own offer");
                return Ok(());
            }
            if existing.signaling_state() != SignalingState::Closed {
                debug!(
                    peer_id = %peer,
                    signaling = ?existing.signaling_state(),
                    "Replacing existing connection with the newer offer"
                );
            }
            self.discard(peer);
            // Tracks of the replaced connection are dead
            self.release_media(peer);
        }
        self.reconnect.clear_departed(peer);
        self.reconnect.reset(peer);
        // Candidates queued before this offer belong to an older negotiation
        self.pending_candidates.remove(peer);

        self.observer.peer_state(peer, PeerStatus::Connecting);
        let (generation, connection) = self.open(peer).await?;

        let answered = async {
            connection.set_remote_description(offer).await?;
            self.flush_candidates(peer, connection.as_ref()).await;
            self.attach_local_media(peer, connection.as_ref()).await;
            let answer = connection.create_answer().await?;
            self.send(peer, SignalingMessage::Answer { answer })
        }
        .await;
        if let Err(e) = answered {
            warn!(peer_id = %peer, error = %e, "Answering offer failed, connection discarded");
            self.discard_generation(peer, generation);
            return Err(e);
        }
        info!(peer_id = %peer, "Answered offer");
        Ok(())
    }

    fn keeps_own_offer(&self, peer: &UserId, existing: &dyn PeerConnection) -> bool {
        self.config.glare_policy == GlarePolicy::PoliteByUserId
            && existing.signaling_state() == SignalingState::HaveLocalOffer
            && self.session.local_user_id() > peer
    }

    /// Only an outstanding offer of ours can take an answer
    pub async fn on_answer(&self, peer: &UserId, answer: SessionDescription) -> Result<()> {
        let Some((generation, connection)) = self.connection(peer) else {
            warn!(peer_id = %peer, "ANSWER without a connection");
            return Ok(());
        };
        let state = connection.signaling_state();
        if state != SignalingState::HaveLocalOffer {
            debug!(peer_id = %peer, signaling = ?state, "Ignoring ANSWER outside have-local-offer");
            return Ok(());
        }

        match connection.set_remote_description(answer).await {
            Ok(()) => {
                self.flush_candidates(peer, connection.as_ref()).await;
                debug!(peer_id = %peer, "Remote answer applied");
                Ok(())
            }
            Err(e @ MeshError::InvalidState(_)) => {
                warn!(peer_id = %peer, error = %e, "Answer rejected, closing connection");
                self.discard_generation(peer, generation);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Apply, or buffer until the remote description is in place. A bad
    /// candidate never aborts the handshake.
    pub async fn on_ice_candidate(&self, peer: &UserId, candidate: IceCandidate) {
        match self.connection(peer) {
            Some((_, connection)) if connection.has_remote_description() => {
                if let Err(e) = connection.add_ice_candidate(candidate).await {
                    warn!(peer_id = %peer, error = %e, "Failed to add ICE candidate");
                }
            }
            _ => {
                debug!(peer_id = %peer, "Buffering ICE candidate");
                self.pending_candidates
                    .entry(peer.clone())
                    .or_default()
                    .push(candidate);
            }
        }
    }

    async fn flush_candidates(&self, peer: &UserId, connection: &dyn PeerConnection) {
        let Some((_, queued)) = self.pending_candidates.remove(peer) else {
            return;
        };
        debug!(peer_id = %peer, count = queued.len(), "Flushing buffered ICE candidates");
        for candidate in queued {
            if let Err(e) = connection.add_ice_candidate(candidate).await {
                warn!(peer_id = %peer, error = %e, "Failed to add buffered ICE candidate");
            }
        }
    }

    /// Explicit departure: never reconnect to this peer until it rejoins
    pub fn on_leave(&self, peer: &UserId) {
        info!(peer_id = %peer, "Peer left");
        self.reconnect.mark_departed(peer);
        self.pending_candidates.remove(peer);
        self.discard(peer);
        self.release_media(peer);
        self.observer.peer_state(peer, PeerStatus::Closed);
    }

    // ------------------------------------------------------------------
    // Local media
    // ------------------------------------------------------------------

    /// New capture result; fanned out to every live connection
    pub async fn set_local_media(&self, media: LocalMedia) {
        *self.local_media.write() = media;
        let connections: Vec<(UserId, Arc<dyn PeerConnection>)> = self
            .peers
            .iter()
            .map(|slot| (slot.key().clone(), Arc::clone(&slot.connection)))
            .collect();
        for (peer, connection) in connections {
            self.attach_local_media(&peer, connection.as_ref()).await;
        }
    }

    /// Add-or-replace: an active sender of the same kind gets the new track
    /// in place, otherwise a sender is added
    async fn attach_local_media(&self, peer: &UserId, connection: &dyn PeerConnection) {
        let tracks = self.local_media.read().tracks().to_vec();
        for track in tracks {
            let sender = connection
                .senders()
                .into_iter()
                .find(|sender| sender.kind == track.kind && sender.is_active());
            let attached = match sender {
                Some(sender) => connection.replace_track(&sender.id, &track).await,
                None => connection.add_track(&track).await,
            };
            if let Err(e) = attached {
                warn!(peer_id = %peer, kind = %track.kind, error = %e, "Failed to attach local track");
            }
        }
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    async fn open(&self, peer: &UserId) -> Result<(u64, Arc<dyn PeerConnection>)> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let events = ConnectionEvents::new(peer.clone(), generation, self.events.clone());
        let connection = self
            .factory
            .create(peer, &self.config.ice_servers, events)
            .await?;
        self.peers.insert(
            peer.clone(),
            PeerSlot {
                generation,
                connection: Arc::clone(&connection),
            },
        );
        debug!(peer_id = %peer, generation, "Connection created");
        Ok((generation, connection))
    }

    /// Close and forget the peer's connection, whichever generation it is
    fn discard(&self, peer: &UserId) {
        if let Some((_, slot)) = self.peers.remove(peer) {
            slot.connection.close();
            debug!(peer_id = %peer, generation = slot.generation, "Connection closed");
        }
    }

    /// Close and forget the connection only if it is still `generation`
    fn discard_generation(&self, peer: &UserId, generation: u64) {
        if let Some((_, slot)) = self.peers.remove_if(peer, |_, slot| slot.generation == generation) {
            slot.connection.close();
        }
    }

    fn release_media(&self, peer: &UserId) {
        if self.bindings.release(peer) {
            self.observer.stream_removed(peer);
        }
    }

    fn send(&self, peer: &UserId, message: SignalingMessage) -> Result<()> {
        let frame = Frame::signaling(
            message,
            self.session.local_user_id().clone(),
            Some(peer.clone()),
        );
        self.bus.send(frame)?;
        Ok(())
    }

    fn handle_peer_event(self: &Arc<Self>, event: PeerEvent) {
        let PeerEvent {
            peer,
            generation,
            event,
        } = event;
        let current = self.peers.get(&peer).map(|slot| slot.generation);
        if current != Some(generation) {
            debug!(peer_id = %peer, generation, ?current, "Dropping event from a replaced connection");
            return;
        }

        match event {
            ConnectionEvent::StateChanged(state) => self.on_connection_state(&peer, generation, state),
            ConnectionEvent::Track(track) => self.on_remote_track(&peer, track),
            ConnectionEvent::LocalCandidate(candidate) => {
                if let Err(e) = self.send(&peer, SignalingMessage::IceCandidate { candidate }) {
                    warn!(peer_id = %peer, error = %e, "Failed to send ICE candidate");
                }
            }
        }
    }

    fn on_connection_state(self: &Arc<Self>, peer: &UserId, generation: u64, state: ConnectionState) {
        debug!(peer_id = %peer, ?state, "Connection state changed");
        match state {
            ConnectionState::New | ConnectionState::Connecting => {}
            ConnectionState::Connected => {
                self.reconnect.reset(peer);
                info!(peer_id = %peer, "Peer connected");
                self.observer.peer_state(peer, PeerStatus::Connected);
            }
            ConnectionState::Disconnected | ConnectionState::Failed => {
                self.release_media(peer);
                if self.reconnect.is_departed(peer) {
                    self.reconnect.reset(peer);
                    self.discard_generation(peer, generation);
                    self.observer.peer_state(peer, PeerStatus::Closed);
                    return;
                }
                self.observer.peer_state(peer, PeerStatus::Reconnecting);
                self.schedule_reconnect(peer);
            }
            ConnectionState::Closed => {
                self.discard_generation(peer, generation);
                self.release_media(peer);
                self.reconnect.reset(peer);
                self.observer.peer_state(peer, PeerStatus::Closed);
            }
        }
    }

    fn on_remote_track(&self, peer: &UserId, track: RemoteTrack) {
        debug!(peer_id = %peer, kind = %track.kind, track_id = %track.id, "Remote track");
        match self.bindings.bind(peer, track) {
            Binding::Created(stream) => self.observer.stream_added(peer, &stream),
            Binding::Updated(stream) => self.observer.stream_updated(peer, &stream),
            Binding::Duplicate => {}
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, peer: &UserId) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let target = peer.clone();
        let outcome = self.reconnect.schedule(peer, move || async move {
            if let Some(mesh) = weak.upgrade() {
                mesh.reconnect_now(&target).await;
            }
        });
        if outcome == Scheduled::GaveUp {
            warn!(peer_id = %peer, "Giving up on peer after repeated failures");
        }
    }

    /// Retry fired: rebuild the connection from scratch and offer again
    async fn reconnect_now(self: &Arc<Self>, peer: &UserId) {
        if !self.session.is_active() || self.reconnect.is_departed(peer) {
            return;
        }
        info!(
            peer_id = %peer,
            attempt = self.reconnect.attempts(peer),
            "Reconnecting to peer"
        );
        self.discard(peer);
        self.pending_candidates.remove(peer);
        if self.initiate(peer).await.is_err() {
            self.schedule_reconnect(peer);
        }
    }

    /// Party stop: close everything and cancel every timer
    pub fn clear_all(&self) {
        self.reconnect.clear_all();
        let peers: Vec<UserId> = self.peers.iter().map(|slot| slot.key().clone()).collect();
        for peer in &peers {
            self.discard(peer);
            self.observer.peer_state(peer, PeerStatus::Closed);
        }
        self.pending_candidates.clear();
        for peer in self.bindings.clear() {
            self.observer.stream_removed(&peer);
        }
        *self.local_media.write() = LocalMedia::default();
        info!(closed = peers.len(), "Mesh cleared");
    }
}
