use std::sync::Arc;
use std::time::Duration;
use tandem_proto::{PlaybackControl, PlaybackMessage, UserId};
use tracing::{debug, info, warn};

use super::wait::wait_for_event;
use super::{valid_time, PeerPosition, RemoteOutcome, SyncCoordinator, SyncPhase};
use crate::latency::compensate_at;
use crate::navigation::{PendingSync, Surface};
use crate::player::PlayerEventKind;

impl SyncCoordinator {
    /// Entry point for every inbound playback envelope
    pub async fn handle_remote(self: &Arc<Self>, sender: &UserId, message: PlaybackMessage) -> RemoteOutcome {
        if !self.session.is_active() {
            return RemoteOutcome::Ignored;
        }
        let kind = message.kind();
        let outcome = match message {
            PlaybackMessage::PlayPause {
                control,
                current_time,
                event_timestamp,
            } => {
                self.handle_playback_control(sender, control, current_time, event_timestamp)
                    .await
            }
            PlaybackMessage::Seek {
                current_time,
                is_playing,
                event_timestamp,
            } => {
                self.handle_seek(sender, current_time, is_playing, event_timestamp)
                    .await
            }
            PlaybackMessage::SeekPause { current_time } => {
                self.handle_seek_pause(sender, current_time).await
            }
            PlaybackMessage::HostHeartbeat {
                current_time,
                is_playing,
                event_timestamp,
            } => {
                self.handle_host_heartbeat(sender, current_time, is_playing, event_timestamp)
                    .await
            }
            PlaybackMessage::RequestSync { respect_auto_play } => {
                self.handle_request_sync(sender, respect_auto_play)
            }
            PlaybackMessage::SyncResponse {
                current_time,
                is_playing,
                url,
                respect_auto_play,
            } => {
                self.handle_sync_response(current_time, is_playing, url.as_deref(), respect_auto_play)
                    .await
            }
            PlaybackMessage::PositionUpdate {
                current_time,
                is_playing,
            } => self.record_position(sender, current_time, is_playing),
            PlaybackMessage::Ready { target_time } => {
                debug!(peer = %sender, ?target_time, "Peer ready after seek-pause");
                RemoteOutcome::Recorded
            }
            PlaybackMessage::UrlChange {
                url,
                current_time,
                is_playing,
            } => self.handle_url_change(sender, &url, current_time, is_playing).await,
        };
        debug!(peer = %sender, kind, ?outcome, "Handled remote playback message");
        outcome
    }

    /// Host, or anyone while guest control is on. Before the first room
    /// state arrives nobody is known to be host and everyone is trusted.
    fn sender_may_control(&self, sender: &UserId) -> bool {
        self.session.is_host_user(sender)
            || self.session.guest_control_enabled()
            || self.session.host_user_id().is_none()
    }

    fn adjusted(&self, current_time: f64, is_playing: bool, event_timestamp: Option<f64>) -> f64 {
        compensate_at(self.now_ms(), current_time, is_playing, event_timestamp)
    }

    async fn handle_playback_control(
        &self,
        sender: &UserId,
        control: PlaybackControl,
        current_time: f64,
        event_timestamp: Option<f64>,
    ) -> RemoteOutcome {
        if !valid_time(current_time) {
            warn!(peer = %sender, current_time, "Dropped PLAY_PAUSE with invalid time");
            return RemoteOutcome::Invalid;
        }
        if !self.sender_may_control(sender) || !self.on_watch_surface() {
            return RemoteOutcome::Ignored;
        }

        let target = self.adjusted(current_time, control.is_play(), event_timestamp);
        self.lock
            .arm(Duration::from_millis(self.config.locks.control_ms));

        if let Some(local) = self.player_position() {
            let drift = target - local;
            if drift.abs() > self.config.control_drift_threshold_secs {
                debug!(target, local, drift, "Nudging position before play state change");
                if let Err(e) = self.seek_to(target).await {
                    warn!(error = %e, "Seek before play state change failed");
                }
            }
        }
        if let Err(e) = self.align_play_state(control.is_play()).await {
            warn!(error = %e, ?control, "Applying remote play state failed");
        }
        RemoteOutcome::Applied
    }

    async fn handle_seek(
        &self,
        sender: &UserId,
        current_time: f64,
        is_playing: bool,
        event_timestamp: Option<f64>,
    ) -> RemoteOutcome {
        if !valid_time(current_time) {
            warn!(peer = %sender, current_time, "Dropped SEEK with invalid time");
            return RemoteOutcome::Invalid;
        }
        if !self.sender_may_control(sender) || !self.on_watch_surface() {
            return RemoteOutcome::Ignored;
        }

        let target = self.adjusted(current_time, is_playing, event_timestamp);
        self.lock.arm(Duration::from_millis(self.config.locks.seek_ms));
        if let Err(e) = self.seek_to(target).await {
            warn!(error = %e, target, "Remote seek failed");
        }
        if let Err(e) = self.align_play_state(is_playing).await {
            warn!(error = %e, "Aligning play state after seek failed");
        }
        RemoteOutcome::Applied
    }

    /// Coordinated hard stop: seek, pause, and announce READY once buffered
    async fn handle_seek_pause(self: &Arc<Self>, sender: &UserId, current_time: f64) -> RemoteOutcome {
        if !valid_time(current_time) {
            warn!(peer = %sender, current_time, "Dropped SEEK_PAUSE with invalid time");
            return RemoteOutcome::Invalid;
        }
        if !self.sender_may_control(sender) || !self.on_watch_surface() {
            return RemoteOutcome::Ignored;
        }
        let Some(cancel) = self.surface_token() else {
            return RemoteOutcome::Ignored;
        };

        let mut events = self.io.player.subscribe();
        self.lock
            .arm(Duration::from_millis(self.config.locks.seek_pause_ms));
        if let Err(e) = self.seek_to(current_time).await {
            warn!(error = %e, "Seek-pause seek failed");
        }
        if let Err(e) = self.align_play_state(false).await {
            warn!(error = %e, "Seek-pause pause failed");
        }

        let this = Arc::clone(self);
        let ready_wait = Duration::from_millis(self.config.ready_wait_timeout_ms);
        tokio::spawn(async move {
            let ready = async {
                if !this.io.player.is_ready() {
                    wait_for_event(&mut events, ready_wait, |kind| {
                        matches!(kind, PlayerEventKind::CanPlay | PlayerEventKind::Seeked)
                    })
                    .await;
                }
            };
            tokio::select! {
                () = cancel.cancelled() => {}
                () = ready => this.broadcast(PlaybackMessage::Ready {
                    target_time: Some(current_time),
                }),
            }
        });
        RemoteOutcome::Applied
    }

    /// Low-amplitude correction from the current host
    async fn handle_host_heartbeat(
        &self,
        sender: &UserId,
        current_time: f64,
        is_playing: bool,
        event_timestamp: Option<f64>,
    ) -> RemoteOutcome {
        if !self.session.is_host_user(sender) || self.session.is_host() {
            return RemoteOutcome::Ignored;
        }
        if self.phase() != SyncPhase::Initialized || !self.on_watch_surface() {
            return RemoteOutcome::Ignored;
        }
        if !valid_time(current_time) {
            warn!(peer = %sender, current_time, "Dropped heartbeat with invalid time");
            return RemoteOutcome::Invalid;
        }
        let Some(local) = self.player_position() else {
            return RemoteOutcome::Ignored;
        };

        let target = self.adjusted(current_time, is_playing, event_timestamp);
        let drift = target - local;
        if drift.abs() < self.config.heartbeat_drift_threshold_secs {
            return RemoteOutcome::InSync;
        }

        debug!(target, local, drift, "Correcting drift from host heartbeat");
        self.lock
            .arm(Duration::from_millis(self.config.locks.heartbeat_ms));
        if let Err(e) = self.seek_to(target).await {
            warn!(error = %e, "Heartbeat correction failed");
        }
        if let Err(e) = self.align_play_state(is_playing).await {
            warn!(error = %e, "Heartbeat play state alignment failed");
        }
        RemoteOutcome::Applied
    }

    /// Answer a joiner with our position, retrying while the player loads
    fn handle_request_sync(self: &Arc<Self>, sender: &UserId, respect_auto_play: bool) -> RemoteOutcome {
        if !self.on_watch_surface() || self.phase() != SyncPhase::Initialized {
            return RemoteOutcome::Ignored;
        }
        if self.try_answer_sync(sender, respect_auto_play) {
            return RemoteOutcome::Responded;
        }
        let Some(cancel) = self.surface_token() else {
            return RemoteOutcome::Ignored;
        };

        let this = Arc::clone(self);
        let requester = sender.clone();
        let attempts = self.config.sync_response_attempts.saturating_sub(1);
        let retry = Duration::from_millis(self.config.sync_response_retry_ms);
        tokio::spawn(async move {
            for _ in 0..attempts {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(retry) => {}
                }
                if this.try_answer_sync(&requester, respect_auto_play) {
                    return;
                }
            }
            warn!(peer = %requester, "Could not read player position for sync response");
        });
        RemoteOutcome::Responded
    }

    fn try_answer_sync(&self, requester: &UserId, respect_auto_play: bool) -> bool {
        if self.io.player.element().is_none() {
            return false;
        }
        let Some(current_time) = self.player_position() else {
            return false;
        };
        let url = self.io.navigator.current_url();
        debug!(peer = %requester, current_time, "Answering sync request");
        self.send_to(
            requester,
            PlaybackMessage::SyncResponse {
                current_time,
                is_playing: self.player_is_playing(),
                url: Some(url),
                respect_auto_play,
            },
        );
        true
    }

    async fn handle_sync_response(
        &self,
        current_time: f64,
        is_playing: bool,
        url: Option<&str>,
        respect_auto_play: bool,
    ) -> RemoteOutcome {
        if !valid_time(current_time) {
            warn!(current_time, "Dropped SYNC_RESPONSE with invalid time");
            return RemoteOutcome::Invalid;
        }
        if !self.claim_sync_request() {
            debug!("Sync response outside the sync window");
            return RemoteOutcome::Ignored;
        }

        let rules = self.navigation.rules();
        let here = self.io.navigator.current_url();
        let on_watch = self.on_watch_surface();

        if let Some(url) = url.filter(|url| rules.classify(url) == Surface::Watch) {
            if !on_watch || !rules.same_content(&here, url) {
                info!(url, current_time, "Following peer to its watch page");
                self.pending.stage(PendingSync {
                    current_time,
                    is_playing,
                    url: Some(url.to_string()),
                });
                self.navigation.expect_navigation(url);
                if let Err(e) = self.io.navigator.navigate(url).await {
                    warn!(error = %e, url, "Navigation to peer's watch page failed");
                }
                return RemoteOutcome::Navigated;
            }
        }
        if !on_watch {
            self.set_phase(SyncPhase::Initialized);
            return RemoteOutcome::Ignored;
        }

        let target = self.resolve_near_zero(current_time).await;
        self.lock
            .arm(Duration::from_millis(self.config.locks.initial_sync_ms));
        if let Some(target) = target {
            if let Err(e) = self.seek_to(target).await {
                warn!(error = %e, target, "Initial sync seek failed");
            }
        }
        if !respect_auto_play {
            if let Err(e) = self.align_play_state(is_playing).await {
                warn!(error = %e, "Initial sync play state failed");
            }
        }
        self.set_phase(SyncPhase::Initialized);
        info!(current_time, is_playing, respect_auto_play, "Initial sync applied");

        if let Some(current_time) = self.reportable_position() {
            self.broadcast(PlaybackMessage::PositionUpdate {
                current_time,
                is_playing: self.player_is_playing(),
            });
        }
        RemoteOutcome::Applied
    }

    /// A near-zero remote position may just mean the peer has not loaded yet.
    /// Give the local player a moment to resume on its own; if it does, keep
    /// the local position (`None`), otherwise trust the remote value.
    async fn resolve_near_zero(&self, remote: f64) -> Option<f64> {
        let threshold = self.config.near_zero_threshold_secs;
        if remote >= threshold {
            return Some(remote);
        }
        let poll = Duration::from_millis(self.config.near_zero_poll_interval_ms);
        for attempt in 0..=self.config.near_zero_poll_attempts {
            if self.player_position().is_some_and(|local| local >= threshold) {
                debug!(attempt, "Local resume beat a near-zero sync response");
                return None;
            }
            if attempt < self.config.near_zero_poll_attempts {
                tokio::time::sleep(poll).await;
            }
        }
        Some(remote)
    }

    fn record_position(&self, sender: &UserId, current_time: f64, is_playing: bool) -> RemoteOutcome {
        if !valid_time(current_time) {
            return RemoteOutcome::Invalid;
        }
        self.peer_positions.insert(
            sender.clone(),
            PeerPosition {
                current_time,
                is_playing,
                reported_at_ms: self.now_ms(),
            },
        );
        RemoteOutcome::Recorded
    }

    async fn handle_url_change(
        &self,
        sender: &UserId,
        url: &str,
        current_time: Option<f64>,
        is_playing: Option<bool>,
    ) -> RemoteOutcome {
        if !self.sender_may_control(sender) {
            return RemoteOutcome::Ignored;
        }
        let rules = self.navigation.rules();
        if rules.classify(url) != Surface::Watch {
            debug!(url, "Ignoring URL change to a non-watch page");
            return RemoteOutcome::Ignored;
        }
        if rules.same_content(&self.io.navigator.current_url(), url) {
            return RemoteOutcome::Ignored;
        }

        if let Some(current_time) = current_time.filter(|t| valid_time(*t)) {
            self.pending.stage(PendingSync {
                current_time,
                is_playing: is_playing.unwrap_or(false),
                url: Some(url.to_string()),
            });
        }
        self.navigation.expect_navigation(url);
        info!(peer = %sender, url, "Following peer navigation");
        if let Err(e) = self.io.navigator.navigate(url).await {
            warn!(error = %e, url, "Navigation failed");
        }
        RemoteOutcome::Navigated
    }
}
