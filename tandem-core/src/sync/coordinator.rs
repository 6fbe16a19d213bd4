use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tandem_proto::{Frame, PlaybackControl, PlaybackMessage, UserId};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::wait::{wait_for_event, wait_for_player};
use super::{
    Capabilities, LocalOutcome, PeerPosition, SetupOutcome, SurfaceEntry, SyncPhase,
};
use crate::config::SyncConfig;
use crate::error::Result;
use crate::expected::ExpectedEvents;
use crate::lock::SuppressionLock;
use crate::navigation::{NavigationTracker, PendingSync, PendingSyncSlot, Surface, Transition};
use crate::player::{ElementId, Player, PlayerEvent, PlayerEventKind};
use crate::session::{Roles, Session};

/// Tasks and identity of the attached watch surface
struct WatchSurface {
    generation: u64,
    cancel: CancellationToken,
    element: Option<ElementId>,
}

#[derive(Default)]
struct SyncState {
    phase: SyncPhase,
    surface: Option<WatchSurface>,
    /// Set when REQUEST_SYNC goes out, taken by the response that gets applied
    sync_requested_at: Option<Instant>,
    /// Last non-zero position seen, in seconds
    last_position: f64,
}

pub struct SyncCoordinator {
    pub(super) config: SyncConfig,
    pub(super) session: Arc<Session>,
    pub(super) io: Capabilities,
    pub(super) lock: SuppressionLock,
    pub(super) expected: ExpectedEvents,
    pub(super) navigation: NavigationTracker,
    pub(super) pending: PendingSyncSlot,
    state: Mutex<SyncState>,
    pub(super) peer_positions: DashMap<UserId, PeerPosition>,
    next_generation: AtomicU64,
}

impl SyncCoordinator {
    #[must_use]
    pub fn new(config: SyncConfig, session: Arc<Session>, io: Capabilities) -> Arc<Self> {
        let pending = PendingSyncSlot::new(Duration::from_millis(config.pending_sync_ttl_ms));
        let navigation = NavigationTracker::new(&config);
        Arc::new(Self {
            config,
            session,
            io,
            lock: SuppressionLock::new(),
            expected: ExpectedEvents::new(),
            navigation,
            pending,
            state: Mutex::new(SyncState::default()),
            peer_positions: DashMap::new(),
            next_generation: AtomicU64::new(1),
        })
    }

    #[must_use]
    pub fn phase(&self) -> SyncPhase {
        self.state.lock().phase
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.state.lock().surface.is_some()
    }

    #[must_use]
    pub fn can_broadcast(&self) -> bool {
        self.session.can_broadcast()
    }

    #[must_use]
    pub fn suppression_active(&self) -> bool {
        self.lock.is_active()
    }

    #[must_use]
    pub fn peer_position(&self, peer: &UserId) -> Option<PeerPosition> {
        self.peer_positions.get(peer).map(|entry| *entry.value())
    }

    pub fn forget_peer(&self, peer: &UserId) {
        self.peer_positions.remove(peer);
    }

    pub(super) fn set_phase(&self, phase: SyncPhase) {
        let previous = std::mem::replace(&mut self.state.lock().phase, phase);
        if previous != phase {
            debug!(?previous, ?phase, "Sync phase changed");
        }
    }

    /// Whether a watch surface is attached and the host page still shows one
    pub(super) fn on_watch_surface(&self) -> bool {
        self.is_attached()
            && self
                .navigation
                .rules()
                .classify(&self.io.navigator.current_url())
                == Surface::Watch
    }

    pub(super) fn current_element(&self) -> Option<ElementId> {
        self.state
            .lock()
            .surface
            .as_ref()
            .and_then(|surface| surface.element)
    }

    pub(super) fn surface_token(&self) -> Option<CancellationToken> {
        self.state
            .lock()
            .surface
            .as_ref()
            .map(|surface| surface.cancel.clone())
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    pub(super) fn now_ms(&self) -> i64 {
        self.io.clock.now_ms()
    }

    #[allow(clippy::cast_precision_loss)]
    pub(super) fn event_timestamp(&self) -> Option<f64> {
        Some(self.now_ms() as f64)
    }

    pub(super) fn broadcast(&self, message: PlaybackMessage) {
        let frame = Frame::playback(
            message,
            self.session.local_user_id().clone(),
            self.session.room_id(),
        );
        self.send(frame);
    }

    pub(super) fn send_to(&self, peer: &UserId, message: PlaybackMessage) {
        let frame = Frame::playback(
            message,
            self.session.local_user_id().clone(),
            self.session.room_id(),
        )
        .addressed_to(peer.clone());
        self.send(frame);
    }

    fn send(&self, frame: Frame) {
        let kind = frame.kind();
        if let Err(e) = self.io.bus.send(frame) {
            warn!(kind, error = %e, "Failed to send playback frame");
        }
    }

    // ------------------------------------------------------------------
    // Player access
    // ------------------------------------------------------------------

    /// Player position in seconds
    pub(super) fn player_position(&self) -> Option<f64> {
        self.io
            .player
            .current_time_ms()
            .ok()
            .filter(|ms| ms.is_finite() && *ms >= 0.0)
            .map(|ms| ms / 1000.0)
    }

    pub(super) fn player_is_playing(&self) -> bool {
        self.io.player.is_paused().is_ok_and(|paused| !paused)
    }

    /// Live position, falling back to the last non-zero one seen
    pub(super) fn reportable_position(&self) -> Option<f64> {
        let mut state = self.state.lock();
        if let Some(position) = self.player_position().filter(|p| *p > 0.0) {
            state.last_position = position;
        }
        (state.last_position > 0.0).then_some(state.last_position)
    }

    /// Seek with an expected `seeked` token that is rolled back on failure
    pub(super) async fn seek_to(&self, seconds: f64) -> Result<()> {
        self.expected.expect(PlayerEventKind::Seeked);
        if let Err(e) = self.io.player.seek(seconds * 1000.0).await {
            self.expected.cancel(PlayerEventKind::Seeked);
            return Err(e);
        }
        Ok(())
    }

    /// Play or pause only when the player is not already there, so no token
    /// waits for an event that will never fire. Returns whether the player was driven.
    pub(super) async fn align_play_state(&self, should_play: bool) -> Result<bool> {
        let paused = self.io.player.is_paused()?;
        if should_play && paused {
            self.expected.expect(PlayerEventKind::Play);
            if let Err(e) = self.io.player.play().await {
                self.expected.cancel(PlayerEventKind::Play);
                return Err(e);
            }
            Ok(true)
        } else if !should_play && !paused {
            self.expected.expect(PlayerEventKind::Pause);
            if let Err(e) = self.io.player.pause().await {
                self.expected.cancel(PlayerEventKind::Pause);
                return Err(e);
            }
            Ok(true)
        } else {
            Ok(false)
        }
    }

    // ------------------------------------------------------------------
    // Watch surface lifecycle
    // ------------------------------------------------------------------

    /// Run the setup sequence for a freshly entered watch surface. Any
    /// previously attached surface is torn down first.
    pub async fn enter_watch_surface(self: &Arc<Self>, entry: SurfaceEntry) -> SetupOutcome {
        if !self.session.is_active() {
            return SetupOutcome::Inactive;
        }
        self.detach();

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        {
            let mut state = self.state.lock();
            state.phase = SyncPhase::Uninitialized;
            state.surface = Some(WatchSurface {
                generation,
                cancel: cancel.clone(),
                element: None,
            });
        }
        info!(
            generation,
            from_browse = entry.from_browse,
            respect_auto_play = entry.respect_auto_play,
            "Entering watch surface"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => SetupOutcome::Cancelled,
            outcome = self.setup(entry, &cancel) => outcome,
        }
    }

    async fn setup(self: &Arc<Self>, entry: SurfaceEntry, cancel: &CancellationToken) -> SetupOutcome {
        let player_wait = Duration::from_millis(self.config.player_wait_timeout_ms);
        let poll = Duration::from_millis(self.config.player_poll_interval_ms);
        let Some(element) = wait_for_player(self.io.player.as_ref(), player_wait, poll).await else {
            warn!(
                timeout_ms = self.config.player_wait_timeout_ms,
                "Player never appeared, sync setup aborted"
            );
            return SetupOutcome::PlayerUnavailable;
        };
        if let Some(surface) = self.state.lock().surface.as_mut() {
            surface.element = Some(element);
        }
        // Events provoked from here on must reach the listener so their
        // expected tokens get consumed
        let listener_events = self.io.player.subscribe();

        if let Some(pending) = self.pending.take() {
            self.apply_pending(&pending).await;
            self.set_phase(SyncPhase::Initialized);
            self.attach(listener_events, cancel);
            return SetupOutcome::AppliedPending;
        }

        if entry.from_browse && self.session.can_broadcast() {
            drop(listener_events);
            self.set_phase(SyncPhase::Initialized);
            self.lead_initial_sync().await;
            // The native resume seek is already announced, start listening afresh
            self.attach(self.io.player.subscribe(), cancel);
            return SetupOutcome::Leader;
        }

        if !self.io.player.is_ready() {
            let mut events = self.io.player.subscribe();
            let ready_wait = Duration::from_millis(self.config.ready_wait_timeout_ms);
            if !wait_for_event(&mut events, ready_wait, |kind| kind == PlayerEventKind::CanPlay).await {
                debug!("No canplay before sync request, continuing");
            }
        }
        self.request_initial_sync(entry.respect_auto_play, cancel);
        self.attach(listener_events, cancel);
        SetupOutcome::RequestedSync
    }

    async fn apply_pending(&self, pending: &PendingSync) {
        info!(
            current_time = pending.current_time,
            is_playing = pending.is_playing,
            "Applying staged sync after navigation"
        );
        self.lock
            .arm(Duration::from_millis(self.config.locks.pending_sync_ms));
        if let Err(e) = self.seek_to(pending.current_time).await {
            warn!(error = %e, "Staged seek failed");
        }
        if let Err(e) = self.align_play_state(pending.is_playing).await {
            warn!(error = %e, "Staged play state failed");
        }
    }

    /// Leader path: let the native player resume to its saved position, then
    /// announce that position as a SEEK.
    async fn lead_initial_sync(&self) {
        let player = &self.io.player;
        let mut events = player.subscribe();

        if !player.is_ready() {
            let wait = Duration::from_millis(self.config.browse_ready_wait_ms);
            wait_for_event(&mut events, wait, |kind| kind == PlayerEventKind::CanPlay).await;
        }

        #[allow(clippy::cast_precision_loss)]
        let threshold_ms = self.config.resume_threshold_ms as f64;
        let resumed = |p: &dyn Player| p.current_time_ms().is_ok_and(|t| t > threshold_ms);
        if !resumed(player.as_ref()) {
            let wait = Duration::from_millis(self.config.resume_wait_timeout_ms);
            let observed = wait_for_event(&mut events, wait, |kind| match kind {
                PlayerEventKind::Seeked => true,
                PlayerEventKind::TimeUpdate => resumed(player.as_ref()),
                _ => false,
            })
            .await;
            if !observed {
                debug!("No resume observed, announcing current position");
            }
        }

        let current_time = self.reportable_position().unwrap_or(0.0);
        let is_playing = self.player_is_playing();
        info!(current_time, is_playing, "Leading initial sync");
        self.broadcast(PlaybackMessage::Seek {
            current_time,
            is_playing,
            event_timestamp: self.event_timestamp(),
        });
    }

    fn request_initial_sync(self: &Arc<Self>, respect_auto_play: bool, cancel: &CancellationToken) {
        self.set_phase(SyncPhase::AwaitingInitialSync);
        self.send_sync_request(respect_auto_play);

        let this = Arc::clone(self);
        let cancel = cancel.clone();
        let fallback = Duration::from_millis(self.config.initial_sync_timeout_ms);
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(fallback) => {
                    let mut state = this.state.lock();
                    if state.phase == SyncPhase::AwaitingInitialSync {
                        state.phase = SyncPhase::Initialized;
                        info!("No sync response yet, continuing unsynchronized");
                    }
                }
            }
        });
    }

    /// Send REQUEST_SYNC and open the window in which a response is accepted
    pub(super) fn send_sync_request(&self, respect_auto_play: bool) {
        self.state.lock().sync_requested_at = Some(Instant::now());
        self.broadcast(PlaybackMessage::RequestSync { respect_auto_play });
    }

    /// Claim the open sync request if it is still within the late window
    pub(super) fn claim_sync_request(&self) -> bool {
        let window = Duration::from_millis(self.config.late_sync_window_ms);
        let requested_at = self.state.lock().sync_requested_at.take();
        requested_at.is_some_and(|at| at.elapsed() <= window)
    }

    /// Ask the room for its position while not on a watch surface, e.g. right after joining
    pub fn request_room_sync(&self) {
        if self.session.is_active() {
            self.send_sync_request(false);
        }
    }

    /// The relay connection came back; whatever we missed is recovered by a fresh request
    pub fn on_bus_reconnected(&self) {
        if !self.session.is_active() {
            return;
        }
        info!("Message bus reconnected, requesting sync");
        self.send_sync_request(false);
    }

    fn attach(self: &Arc<Self>, events: broadcast::Receiver<PlayerEvent>, cancel: &CancellationToken) {
        self.spawn_listener(events, cancel.clone());
        self.spawn_position_reporter(cancel.clone());
        self.spawn_heartbeat(self.session.subscribe_roles(), cancel.clone());
        self.spawn_watchdog(cancel.clone());
        debug!("Player listeners attached");
    }

    /// Cancel every task of the attached surface and forget its state
    fn detach(&self) -> Option<SyncPhase> {
        let (surface, phase) = {
            let mut state = self.state.lock();
            let phase = std::mem::take(&mut state.phase);
            (state.surface.take(), phase)
        };
        let surface = surface?;
        surface.cancel.cancel();
        self.expected.clear();
        self.lock.clear();
        debug!(generation = surface.generation, "Watch surface detached");
        Some(phase)
    }

    /// Navigation away from the watch surface. With `coordinated_stop`, an
    /// authorized member tells everyone to seek-pause at the last position.
    pub fn leave_watch_surface(&self, coordinated_stop: bool) {
        let position = self.reportable_position();
        let Some(phase) = self.detach() else {
            return;
        };
        info!(coordinated_stop, "Left watch surface");

        if coordinated_stop && phase == SyncPhase::Initialized && self.session.can_broadcast() {
            if let Some(current_time) = position {
                self.broadcast(PlaybackMessage::SeekPause { current_time });
            }
        }
    }

    /// Party stop
    pub fn shutdown(&self) {
        self.detach();
        self.pending.clear();
        self.peer_positions.clear();
        let mut state = self.state.lock();
        state.sync_requested_at = None;
        state.last_position = 0.0;
    }

    /// Navigation observer. Tears down and rebuilds the watch surface as needed.
    pub fn on_url_changed(self: &Arc<Self>, from: &str, to: &str) -> Transition {
        let transition = self.navigation.observe(from, to);
        debug!(from, to, ?transition, "URL changed");

        if transition.from == Surface::Watch
            && (transition.to != Surface::Watch || transition.content_changed)
        {
            self.leave_watch_surface(transition.to != Surface::Watch);
        }

        let entering = transition.to == Surface::Watch
            && (transition.from != Surface::Watch || transition.content_changed);
        if entering && self.session.is_active() {
            if !transition.remote_initiated && !transition.auto_advance && self.session.can_broadcast() {
                self.broadcast(PlaybackMessage::UrlChange {
                    url: to.to_string(),
                    current_time: None,
                    is_playing: None,
                });
            }

            let entry = SurfaceEntry {
                from_browse: transition.from_browse,
                respect_auto_play: transition.auto_advance,
            };
            let this = Arc::clone(self);
            tokio::spawn(async move {
                let outcome = this.enter_watch_surface(entry).await;
                debug!(?outcome, "Watch surface setup finished");
            });
        }

        transition
    }

    // ------------------------------------------------------------------
    // Local events
    // ------------------------------------------------------------------

    /// Decide what to do with an event the local player fired
    pub fn handle_local_event(&self, kind: PlayerEventKind) -> LocalOutcome {
        match kind {
            PlayerEventKind::TimeUpdate => {
                if let Some(position) = self.player_position() {
                    if position > 0.0 {
                        self.state.lock().last_position = position;
                    }
                    if let Ok(duration) = self.io.player.duration_ms() {
                        self.navigation.note_position(position, duration / 1000.0);
                    }
                }
                return LocalOutcome::Ignored;
            }
            PlayerEventKind::Ended => {
                self.navigation.mark_ended();
                return LocalOutcome::Ignored;
            }
            PlayerEventKind::CanPlay => return LocalOutcome::Ignored,
            PlayerEventKind::Play | PlayerEventKind::Pause | PlayerEventKind::Seeked => {}
        }

        // Tokens are consumed whatever the phase, otherwise they would leak
        if self.expected.consume(kind) {
            debug!(?kind, "Consumed expected player event");
            return LocalOutcome::Echo;
        }
        if !self.session.is_active()
            || self.phase() != SyncPhase::Initialized
            || !self.on_watch_surface()
        {
            return LocalOutcome::Ignored;
        }
        if self.lock.is_active() {
            debug!(?kind, remaining_ms = self.lock.remaining().as_millis(), "Player event suppressed");
            return LocalOutcome::Suppressed;
        }
        if !self.session.can_broadcast() {
            return LocalOutcome::Unauthorized;
        }

        let current_time = self.reportable_position().unwrap_or(0.0);
        let message = match kind {
            PlayerEventKind::Seeked => PlaybackMessage::Seek {
                current_time,
                is_playing: self.player_is_playing(),
                event_timestamp: self.event_timestamp(),
            },
            PlayerEventKind::Pause => PlaybackMessage::PlayPause {
                control: PlaybackControl::Pause,
                current_time,
                event_timestamp: self.event_timestamp(),
            },
            _ => PlaybackMessage::PlayPause {
                control: PlaybackControl::Play,
                current_time,
                event_timestamp: self.event_timestamp(),
            },
        };
        debug!(kind = message.kind(), current_time, "Broadcasting local player event");
        self.broadcast(message);
        LocalOutcome::Broadcast
    }

    // ------------------------------------------------------------------
    // Background tasks
    // ------------------------------------------------------------------

    fn spawn_listener(self: &Arc<Self>, mut events: broadcast::Receiver<PlayerEvent>, cancel: CancellationToken) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(event) => {
                            if this.current_element() == Some(event.element) {
                                this.handle_local_event(event.kind);
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Player event listener lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });
    }

    fn spawn_position_reporter(self: &Arc<Self>, cancel: CancellationToken) {
        let this = Arc::clone(self);
        let period = Duration::from_millis(self.config.position_report_interval_ms);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => this.report_position(),
                }
            }
        });
    }

    fn report_position(&self) {
        if self.phase() != SyncPhase::Initialized {
            return;
        }
        // Never report zero: it is indistinguishable from "not loaded yet"
        let Some(current_time) = self.reportable_position() else {
            return;
        };
        self.broadcast(PlaybackMessage::PositionUpdate {
            current_time,
            is_playing: self.player_is_playing(),
        });
    }

    fn spawn_heartbeat(self: &Arc<Self>, mut roles: watch::Receiver<Roles>, cancel: CancellationToken) {
        let this = Arc::clone(self);
        let period = Duration::from_millis(self.config.heartbeat_interval_ms);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    became_host = wait_until_host(&mut roles) => if !became_host { return },
                }
                info!("Host heartbeat started");

                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        _ = ticker.tick() => this.send_heartbeat(),
                        changed = roles.changed() => {
                            if changed.is_err() {
                                return;
                            }
                            if !roles.borrow_and_update().is_host {
                                info!("Host heartbeat stopped");
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    fn send_heartbeat(&self) {
        if self.phase() != SyncPhase::Initialized || !self.session.is_host() {
            return;
        }
        let Some(current_time) = self.player_position() else {
            return;
        };
        self.broadcast(PlaybackMessage::HostHeartbeat {
            current_time,
            is_playing: self.player_is_playing(),
            event_timestamp: self.event_timestamp(),
        });
    }

    fn spawn_watchdog(self: &Arc<Self>, cancel: CancellationToken) {
        let this = Arc::clone(self);
        let period = Duration::from_millis(self.config.watchdog_interval_ms);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => this.check_element(),
                }
            }
        });
    }

    /// Follow the player when the host page swaps the media element
    fn check_element(&self) {
        let mounted = self.io.player.element();
        let mut state = self.state.lock();
        let Some(surface) = state.surface.as_mut() else {
            return;
        };
        if surface.element == mounted {
            return;
        }
        match mounted {
            Some(element) => info!(
                previous = ?surface.element,
                element = %element,
                "Player element replaced, listeners moved"
            ),
            None => debug!("Player element unmounted"),
        }
        surface.element = mounted;
    }
}

async fn wait_until_host(roles: &mut watch::Receiver<Roles>) -> bool {
    roles.wait_for(|r| r.active && r.is_host).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{harness, settle, Harness, WATCH_URL};

    async fn initialized(h: &Harness) {
        assert_eq!(
            h.coordinator.enter_watch_surface(SurfaceEntry::default()).await,
            SetupOutcome::RequestedSync
        );
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(h.coordinator.phase(), SyncPhase::Initialized);
        h.bus.clear();
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_sync_falls_back_to_initialized() {
        let h = harness();
        let outcome = h.coordinator.enter_watch_surface(SurfaceEntry::default()).await;

        assert_eq!(outcome, SetupOutcome::RequestedSync);
        assert_eq!(h.coordinator.phase(), SyncPhase::AwaitingInitialSync);
        assert_eq!(h.bus.kinds(), vec!["REQUEST_SYNC"]);

        tokio::time::sleep(Duration::from_millis(1_900)).await;
        assert_eq!(h.coordinator.phase(), SyncPhase::AwaitingInitialSync);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.coordinator.phase(), SyncPhase::Initialized);
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_aborts_without_player() {
        let h = harness();
        h.player.unmount();

        let started = Instant::now();
        let outcome = h.coordinator.enter_watch_surface(SurfaceEntry::default()).await;

        assert_eq!(outcome, SetupOutcome::PlayerUnavailable);
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(h.bus.kinds().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_staged_sync_bypasses_request() {
        let h = harness();
        h.player.set_paused(true);
        h.coordinator.pending.stage(PendingSync {
            current_time: 300.0,
            is_playing: true,
            url: Some(WATCH_URL.to_string()),
        });

        let outcome = h.coordinator.enter_watch_surface(SurfaceEntry::default()).await;

        assert_eq!(outcome, SetupOutcome::AppliedPending);
        assert_eq!(h.coordinator.phase(), SyncPhase::Initialized);
        assert_eq!(h.player.seeks(), vec![300_000.0]);
        assert!(!h.player.is_paused_now());
        assert!(h.bus.kinds().is_empty());

        // The seek and play we caused are not rebroadcast
        settle().await;
        assert!(h.bus.kinds().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_leader_announces_resumed_position() {
        let h = harness();
        h.session.set_host(Some(UserId::from("me")));
        h.player.set_position_secs(0.0);

        let player = Arc::clone(&h.player);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(800)).await;
            player.native_resume(1_234.5);
        });

        let outcome = h
            .coordinator
            .enter_watch_surface(SurfaceEntry {
                from_browse: true,
                respect_auto_play: false,
            })
            .await;

        assert_eq!(outcome, SetupOutcome::Leader);
        let messages = h.bus.playback();
        assert_eq!(messages.len(), 1);
        let PlaybackMessage::Seek { current_time, .. } = messages[0] else {
            panic!("expected SEEK, got {:?}", messages[0]);
        };
        assert!((current_time - 1_234.5).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guest_from_browse_still_requests_sync() {
        let h = harness();
        let outcome = h
            .coordinator
            .enter_watch_surface(SurfaceEntry {
                from_browse: true,
                respect_auto_play: false,
            })
            .await;
        assert_eq!(outcome, SetupOutcome::RequestedSync);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_events_broadcast_when_authorized() {
        let h = harness();
        h.session.set_host(Some(UserId::from("me")));
        initialized(&h).await;
        h.player.set_position_secs(42.0);

        assert_eq!(
            h.coordinator.handle_local_event(PlayerEventKind::Pause),
            LocalOutcome::Broadcast
        );
        let messages = h.bus.playback();
        assert!(matches!(
            messages[0],
            PlaybackMessage::PlayPause {
                control: PlaybackControl::Pause,
                current_time,
                event_timestamp: Some(_),
            } if (current_time - 42.0).abs() < 1e-9
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_guest_events_need_guest_control() {
        let h = harness();
        initialized(&h).await;

        assert_eq!(
            h.coordinator.handle_local_event(PlayerEventKind::Play),
            LocalOutcome::Unauthorized
        );
        h.session.set_guest_control(true);
        assert_eq!(
            h.coordinator.handle_local_event(PlayerEventKind::Play),
            LocalOutcome::Broadcast
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_broadcast_while_locked_or_expected() {
        let h = harness();
        h.session.set_host(Some(UserId::from("me")));
        initialized(&h).await;

        h.coordinator.expected.expect(PlayerEventKind::Seeked);
        assert_eq!(
            h.coordinator.handle_local_event(PlayerEventKind::Seeked),
            LocalOutcome::Echo
        );

        h.coordinator.lock.arm(Duration::from_millis(600));
        assert_eq!(
            h.coordinator.handle_local_event(PlayerEventKind::Play),
            LocalOutcome::Suppressed
        );
        assert!(h.bus.kinds().is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(
            h.coordinator.handle_local_event(PlayerEventKind::Play),
            LocalOutcome::Broadcast
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_ignored_before_initialized() {
        let h = harness();
        h.session.set_host(Some(UserId::from("me")));
        h.coordinator.enter_watch_surface(SurfaceEntry::default()).await;

        assert_eq!(
            h.coordinator.handle_local_event(PlayerEventKind::Play),
            LocalOutcome::Ignored
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_broadcasts_user_seek() {
        let h = harness();
        h.session.set_host(Some(UserId::from("me")));
        initialized(&h).await;

        h.player.user_seek(90.0);
        settle().await;

        assert_eq!(h.bus.kinds(), vec!["SEEK"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_follows_host_role() {
        let h = harness();
        h.session.set_host(Some(UserId::from("me")));
        h.player.set_position_secs(10.0);
        initialized(&h).await;

        tokio::time::sleep(Duration::from_millis(3_050)).await;
        assert_eq!(h.bus.count("HOST_HEARTBEAT"), 1);

        h.session.set_host(Some(UserId::from("host")));
        tokio::time::sleep(Duration::from_millis(9_000)).await;
        assert_eq!(h.bus.count("HOST_HEARTBEAT"), 1);

        h.session.set_host(Some(UserId::from("me")));
        tokio::time::sleep(Duration::from_millis(3_050)).await;
        assert_eq!(h.bus.count("HOST_HEARTBEAT"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_reporter_skips_zero() {
        let h = harness();
        h.player.set_position_secs(0.0);
        initialized(&h).await;

        tokio::time::sleep(Duration::from_millis(5_050)).await;
        assert_eq!(h.bus.count("POSITION_UPDATE"), 0);

        h.player.set_position_secs(12.0);
        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(h.bus.count("POSITION_UPDATE"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaving_stops_all_timers() {
        let h = harness();
        h.session.set_host(Some(UserId::from("me")));
        h.player.set_position_secs(75.0);
        initialized(&h).await;

        h.navigator.set_url("https://www.netflix.com/browse");
        h.coordinator.on_url_changed(WATCH_URL, "https://www.netflix.com/browse");

        assert_eq!(h.bus.kinds(), vec!["SEEK_PAUSE"]);
        assert!(!h.coordinator.is_attached());

        h.bus.clear();
        tokio::time::sleep(Duration::from_secs(30)).await;
        h.player.user_seek(10.0);
        settle().await;
        assert!(h.bus.kinds().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_follows_replaced_element() {
        let h = harness();
        h.session.set_host(Some(UserId::from("me")));
        initialized(&h).await;

        h.player.replace_element();
        tokio::time::sleep(Duration::from_millis(1_050)).await;

        h.player.user_seek(33.0);
        settle().await;
        assert_eq!(h.bus.kinds(), vec!["SEEK"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_advance_requests_sync_respecting_autoplay() {
        let h = harness();
        h.session.set_host(Some(UserId::from("me")));
        initialized(&h).await;

        h.coordinator.handle_local_event(PlayerEventKind::Ended);
        let next = "https://www.netflix.com/watch/80100999";
        h.navigator.set_url(next);
        let transition = h.coordinator.on_url_changed(WATCH_URL, next);
        assert!(transition.auto_advance);

        settle().await;
        let messages = h.bus.playback();
        assert_eq!(
            messages,
            vec![PlaybackMessage::RequestSync {
                respect_auto_play: true
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_navigation_broadcasts_url_change() {
        let h = harness();
        h.session.set_host(Some(UserId::from("me")));
        initialized(&h).await;

        let next = "https://www.netflix.com/watch/80100999";
        h.navigator.set_url(next);
        h.coordinator.on_url_changed(WATCH_URL, next);

        let kinds = h.bus.kinds();
        assert_eq!(kinds.first(), Some(&"URL_CHANGE"));
        // Episode change is not a coordinated stop
        assert!(!kinds.contains(&"SEEK_PAUSE"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bus_reconnect_reopens_sync_window() {
        let h = harness();
        initialized(&h).await;

        h.coordinator.on_bus_reconnected();
        assert_eq!(h.bus.kinds(), vec!["REQUEST_SYNC"]);
        assert!(h.coordinator.claim_sync_request());
        assert!(!h.coordinator.claim_sync_request());
    }
}
