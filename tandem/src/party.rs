//! Party runtime
//!
//! Owns the session and both coordinators for one client. Every inbound
//! text message is decoded once here and routed by category; URL changes
//! from the host page come in through [`Party::on_url_changed`].

use std::sync::Arc;
use tandem_core::{
    Capabilities, Config, MessageBus, Navigator, RemoteOutcome, Session, Surface, SurfaceEntry,
    SurfaceRules, SyncCoordinator, Transition,
};
use tandem_mesh::{ConnectionFactory, LocalMedia, MeshCoordinator, MeshObserver};
use tandem_proto::{Frame, RoomId, RoomMessage, SignalingMessage, UserId};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Where an inbound message ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Playback(RemoteOutcome),
    Signaling,
    Room,
    /// Addressed to someone else, our own echo, another room, or not allowed
    Dropped,
}

pub struct Party {
    session: Arc<Session>,
    sync: Arc<SyncCoordinator>,
    mesh: Arc<MeshCoordinator>,
    bus: Arc<dyn MessageBus>,
    navigator: Arc<dyn Navigator>,
    rules: SurfaceRules,
}

impl Party {
    #[must_use]
    pub fn new(
        config: &Config,
        local: UserId,
        io: Capabilities,
        factory: Arc<dyn ConnectionFactory>,
        observer: Arc<dyn MeshObserver>,
    ) -> Arc<Self> {
        let session = Arc::new(Session::new(local));
        let bus = Arc::clone(&io.bus);
        let navigator = Arc::clone(&io.navigator);
        let sync = SyncCoordinator::new(config.sync.clone(), Arc::clone(&session), io);
        let mesh = MeshCoordinator::new(
            config.mesh.clone(),
            Arc::clone(&session),
            Arc::clone(&bus),
            factory,
            observer,
        );
        Arc::new(Self {
            session,
            sync,
            mesh,
            bus,
            navigator,
            rules: SurfaceRules::from_config(&config.sync),
        })
    }

    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    #[must_use]
    pub fn sync(&self) -> &Arc<SyncCoordinator> {
        &self.sync
    }

    #[must_use]
    pub fn mesh(&self) -> &Arc<MeshCoordinator> {
        &self.mesh
    }

    #[must_use]
    pub fn local_user_id(&self) -> &UserId {
        self.session.local_user_id()
    }

    #[must_use]
    pub fn can_broadcast(&self) -> bool {
        self.session.can_broadcast()
    }

    /// Join `room`: announce ourselves to the mesh and get in sync, either
    /// through the watch surface we are on or by asking the room directly
    pub fn start(&self, room: RoomId) -> Result<()> {
        if self.session.is_active() {
            debug!("Party already running");
            return Ok(());
        }
        info!(room_id = %room, user_id = %self.local_user_id(), "Starting party");
        self.session.start(room);
        self.send_signaling(SignalingMessage::Join)?;

        let url = self.navigator.current_url();
        if self.rules.classify(&url) == Surface::Watch {
            let sync = Arc::clone(&self.sync);
            tokio::spawn(async move {
                let outcome = sync.enter_watch_surface(SurfaceEntry::default()).await;
                debug!(?outcome, "Initial watch surface setup finished");
            });
        } else {
            self.sync.request_room_sync();
        }
        Ok(())
    }

    /// Leave the room, tearing down every connection and background task
    pub fn stop(&self) {
        if !self.session.is_active() {
            return;
        }
        if let Err(e) = self.send_signaling(SignalingMessage::Leave) {
            warn!(error = %e, "Failed to announce departure");
        }
        self.sync.shutdown();
        self.mesh.clear_all();
        self.session.stop();
        info!("Party stopped");
    }

    /// Decode and route one inbound relay message
    pub async fn handle_inbound(&self, text: &str) -> Result<Dispatch> {
        match self.admit(text)? {
            Some(frame) => self.dispatch(frame).await,
            None => Ok(Dispatch::Dropped),
        }
    }

    /// Decode, keeping only frames meant for us
    fn admit(&self, text: &str) -> Result<Option<Frame>> {
        let frame = Frame::decode(text)?;
        if !self.accepts(&frame) {
            debug!(kind = frame.kind(), "Dropped frame not meant for us");
            return Ok(None);
        }
        Ok(Some(frame))
    }

    async fn dispatch(&self, frame: Frame) -> Result<Dispatch> {
        let sender = frame.sender().cloned();

        match frame {
            Frame::Playback(envelope) => {
                let Some(sender) = sender else {
                    warn!(kind = envelope.message.kind(), "Playback frame without sender");
                    return Ok(Dispatch::Dropped);
                };
                let outcome = self.sync.handle_remote(&sender, envelope.message).await;
                Ok(Dispatch::Playback(outcome))
            }
            Frame::Signaling(envelope) => {
                let Some(sender) = sender else {
                    warn!(kind = envelope.message.kind(), "Signaling frame without sender");
                    return Ok(Dispatch::Dropped);
                };
                if !self.session.is_active() {
                    return Ok(Dispatch::Dropped);
                }
                if envelope.message == SignalingMessage::Leave {
                    self.sync.forget_peer(&sender);
                }
                self.mesh.handle(&sender, envelope.message).await?;
                Ok(Dispatch::Signaling)
            }
            Frame::Room(envelope) => Ok(self.apply_room(sender.as_ref(), envelope.message)),
        }
    }

    fn accepts(&self, frame: &Frame) -> bool {
        let local = self.local_user_id();
        if frame.recipient().is_some_and(|to| to != local) {
            return false;
        }
        if frame.sender() == Some(local) {
            return false;
        }
        let room = match frame {
            Frame::Playback(e) => e.room_id.as_ref(),
            Frame::Signaling(e) => e.room_id.as_ref(),
            Frame::Room(e) => e.room_id.as_ref(),
        };
        match (room, self.session.room_id()) {
            (Some(theirs), Some(ours)) => *theirs == ours,
            _ => true,
        }
    }

    fn apply_room(&self, sender: Option<&UserId>, message: RoomMessage) -> Dispatch {
        match message {
            RoomMessage::RoomState {
                host_user_id,
                guest_control_enabled,
                url,
            } => {
                debug!(?host_user_id, ?guest_control_enabled, ?url, "Room state received");
                self.session.set_host(host_user_id);
                if let Some(enabled) = guest_control_enabled {
                    self.session.set_guest_control(enabled);
                }
            }
            RoomMessage::HostChanged { host_user_id } => {
                self.session.set_host(Some(host_user_id));
            }
            RoomMessage::GuestControl { enabled } => {
                if !sender.is_some_and(|user| self.session.is_host_user(user)) {
                    warn!(sender = ?sender, enabled, "GUEST_CONTROL from a non-host ignored");
                    return Dispatch::Dropped;
                }
                self.session.set_guest_control(enabled);
            }
            RoomMessage::UserJoined => {
                debug!(user = ?sender, "Member joined the room");
            }
            RoomMessage::UserLeft => {
                let Some(user) = sender else {
                    return Dispatch::Dropped;
                };
                self.mesh.on_leave(user);
                self.sync.forget_peer(user);
            }
        }
        Dispatch::Room
    }

    /// Host-page URL observer
    pub fn on_url_changed(&self, from: &str, to: &str) -> Transition {
        self.sync.on_url_changed(from, to)
    }

    /// The relay connection was re-established
    pub fn on_bus_reconnected(&self) {
        if !self.session.is_active() {
            return;
        }
        // Peers with a live connection ignore the repeated JOIN
        if let Err(e) = self.send_signaling(SignalingMessage::Join) {
            warn!(error = %e, "Failed to re-announce after reconnect");
        }
        self.sync.on_bus_reconnected();
    }

    pub async fn set_local_media(&self, media: LocalMedia) {
        self.mesh.set_local_media(media).await;
    }

    /// Hand the host role to another member
    pub fn transfer_host(&self, to: UserId) -> Result<()> {
        if !self.session.is_active() {
            return Err(Error::Inactive);
        }
        if !self.session.is_host() {
            return Err(Error::NotHost("transfer the host role"));
        }
        self.session.set_host(Some(to.clone()));
        self.send_room(RoomMessage::HostChanged { host_user_id: to })
    }

    pub fn set_guest_control(&self, enabled: bool) -> Result<()> {
        if !self.session.is_active() {
            return Err(Error::Inactive);
        }
        if !self.session.is_host() {
            return Err(Error::NotHost("toggle guest control"));
        }
        self.session.set_guest_control(enabled);
        self.send_room(RoomMessage::GuestControl { enabled })
    }

    fn send_signaling(&self, message: SignalingMessage) -> Result<()> {
        let frame = Frame::signaling(message, self.local_user_id().clone(), None);
        self.bus.send(frame)?;
        Ok(())
    }

    fn send_room(&self, message: RoomMessage) -> Result<()> {
        let frame = Frame::room(message, self.local_user_id().clone(), self.session.room_id());
        self.bus.send(frame)?;
        Ok(())
    }

    /// Drive the party from a relay text stream and a URL watch until
    /// cancelled or the relay stream ends.
    ///
    /// Playback frames run in order on their own task, so a handler that
    /// waits on the player never holds up signaling or room control.
    pub async fn run(
        self: Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<String>,
        mut urls: watch::Receiver<String>,
        cancel: CancellationToken,
    ) {
        let mut current_url = urls.borrow_and_update().clone();
        let mut urls_open = true;
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        tokio::spawn(Arc::clone(&self).drive_playback(playback_rx, cancel.clone()));

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                received = inbound.recv() => {
                    let Some(text) = received else {
                        info!("Relay stream closed");
                        break;
                    };
                    let frame = match self.admit(&text) {
                        Ok(Some(frame)) => frame,
                        Ok(None) => continue,
                        Err(e) => {
                            warn!(error = %e, "Inbound message rejected");
                            continue;
                        }
                    };
                    if matches!(frame, Frame::Playback(_)) {
                        if playback_tx.send(frame).is_err() {
                            warn!("Playback worker gone, frame dropped");
                        }
                        continue;
                    }
                    match self.dispatch(frame).await {
                        Ok(dispatch) => debug!(?dispatch, "Inbound message handled"),
                        Err(e) => warn!(error = %e, "Inbound message rejected"),
                    }
                }
                changed = urls.changed(), if urls_open => {
                    if changed.is_err() {
                        urls_open = false;
                        continue;
                    }
                    let next = urls.borrow_and_update().clone();
                    if next != current_url {
                        self.on_url_changed(&current_url, &next);
                        current_url = next;
                    }
                }
            }
        }
        debug!(user_id = %self.local_user_id(), "Party loop stopped");
    }

    async fn drive_playback(
        self: Arc<Self>,
        mut frames: mpsc::UnboundedReceiver<Frame>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                next = frames.recv() => {
                    let Some(frame) = next else { break };
                    match self.dispatch(frame).await {
                        Ok(dispatch) => debug!(?dispatch, "Playback message handled"),
                        Err(e) => warn!(error = %e, "Playback message rejected"),
                    }
                }
            }
        }
    }
}
