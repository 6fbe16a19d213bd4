//! In-memory player, bus and navigator for coordinator tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tandem_proto::{Frame, PlaybackMessage, RoomId, UserId};
use tokio::sync::broadcast;

use crate::bus::MessageBus;
use crate::clock::SystemClock;
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::navigation::Navigator;
use crate::player::{ElementId, Player, PlayerEvent, PlayerEventKind};
use crate::session::Session;
use crate::sync::{Capabilities, SyncCoordinator};

pub const WATCH_URL: &str = "https://www.netflix.com/watch/80100172";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerCall {
    Play,
    Pause,
    Seek(f64),
}

struct PlayerState {
    element_id: u64,
    mounted: bool,
    position_ms: f64,
    duration_ms: f64,
    paused: bool,
    ready: bool,
    fail_seeks: bool,
    calls: Vec<PlayerCall>,
}

pub struct FakePlayer {
    state: Mutex<PlayerState>,
    events: broadcast::Sender<PlayerEvent>,
}

impl FakePlayer {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(PlayerState {
                element_id: 1,
                mounted: true,
                position_ms: 0.0,
                duration_ms: 2_600_000.0,
                paused: true,
                ready: true,
                fail_seeks: false,
                calls: Vec::new(),
            }),
            events,
        }
    }

    fn emit(&self, kind: PlayerEventKind) {
        let element = {
            let state = self.state.lock();
            if !state.mounted {
                return;
            }
            ElementId(state.element_id)
        };
        let _ = self.events.send(PlayerEvent { element, kind });
    }

    pub fn set_position_secs(&self, secs: f64) {
        self.state.lock().position_ms = secs * 1000.0;
    }

    pub fn position_secs(&self) -> f64 {
        self.state.lock().position_ms / 1000.0
    }

    pub fn set_paused(&self, paused: bool) {
        self.state.lock().paused = paused;
    }

    pub fn is_paused_now(&self) -> bool {
        self.state.lock().paused
    }

    pub fn fail_seeks(&self, fail: bool) {
        self.state.lock().fail_seeks = fail;
    }

    pub fn calls(&self) -> Vec<PlayerCall> {
        self.state.lock().calls.clone()
    }

    /// Positions passed to successful `seek` calls, in milliseconds
    pub fn seeks(&self) -> Vec<f64> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                PlayerCall::Seek(ms) => Some(*ms),
                _ => None,
            })
            .collect()
    }

    pub fn unmount(&self) {
        self.state.lock().mounted = false;
    }

    pub fn remount(&self) {
        self.state.lock().mounted = true;
    }

    /// The host page swapped the media element
    pub fn replace_element(&self) {
        self.state.lock().element_id += 1;
    }

    /// The streaming site restored its saved position on its own
    pub fn native_resume(&self, secs: f64) {
        self.set_position_secs(secs);
        self.emit(PlayerEventKind::Seeked);
    }

    /// A seek made through the player controls
    pub fn user_seek(&self, secs: f64) {
        self.set_position_secs(secs);
        self.emit(PlayerEventKind::Seeked);
    }
}

#[async_trait]
impl Player for FakePlayer {
    fn element(&self) -> Option<ElementId> {
        let state = self.state.lock();
        state.mounted.then_some(ElementId(state.element_id))
    }

    fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    async fn play(&self) -> Result<()> {
        let changed = {
            let mut state = self.state.lock();
            state.calls.push(PlayerCall::Play);
            std::mem::replace(&mut state.paused, false)
        };
        if changed {
            self.emit(PlayerEventKind::Play);
        }
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        let changed = {
            let mut state = self.state.lock();
            state.calls.push(PlayerCall::Pause);
            !std::mem::replace(&mut state.paused, true)
        };
        if changed {
            self.emit(PlayerEventKind::Pause);
        }
        Ok(())
    }

    async fn seek(&self, position_ms: f64) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.fail_seeks {
                return Err(Error::Player("seek rejected".to_string()));
            }
            state.calls.push(PlayerCall::Seek(position_ms));
            state.position_ms = position_ms;
        }
        self.emit(PlayerEventKind::Seeked);
        Ok(())
    }

    fn current_time_ms(&self) -> Result<f64> {
        let state = self.state.lock();
        if !state.mounted {
            return Err(Error::PlayerUnavailable("no element".to_string()));
        }
        Ok(state.position_ms)
    }

    fn is_paused(&self) -> Result<bool> {
        Ok(self.state.lock().paused)
    }

    fn duration_ms(&self) -> Result<f64> {
        Ok(self.state.lock().duration_ms)
    }

    fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
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

    pub fn playback(&self) -> Vec<PlaybackMessage> {
        self.frames
            .lock()
            .iter()
            .filter_map(|frame| match frame {
                Frame::Playback(envelope) => Some(envelope.message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.frames.lock().iter().filter(|f| f.kind() == kind).count()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }
}

impl MessageBus for RecordingBus {
    fn send(&self, frame: Frame) -> Result<()> {
        self.frames.lock().push(frame);
        Ok(())
    }
}

pub struct FakeNavigator {
    url: Mutex<String>,
    navigations: Mutex<Vec<String>>,
}

impl FakeNavigator {
    pub fn new(url: &str) -> Self {
        Self {
            url: Mutex::new(url.to_string()),
            navigations: Mutex::new(Vec::new()),
        }
    }

    pub fn set_url(&self, url: &str) {
        *self.url.lock() = url.to_string();
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().clone()
    }
}

#[async_trait]
impl Navigator for FakeNavigator {
    fn current_url(&self) -> String {
        self.url.lock().clone()
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.navigations.lock().push(url.to_string());
        self.set_url(url);
        Ok(())
    }
}

pub struct Harness {
    pub coordinator: Arc<SyncCoordinator>,
    pub session: Arc<Session>,
    pub player: Arc<FakePlayer>,
    pub bus: Arc<RecordingBus>,
    pub navigator: Arc<FakeNavigator>,
    pub clock: Arc<SystemClock>,
}

/// Member "me" in room "room", hosted by "host", sitting on a watch page
pub fn harness() -> Harness {
    let session = Arc::new(Session::new(UserId::from("me")));
    session.start(RoomId::from("room"));
    session.set_host(Some(UserId::from("host")));

    let player = Arc::new(FakePlayer::new());
    let bus = Arc::new(RecordingBus::default());
    let navigator = Arc::new(FakeNavigator::new(WATCH_URL));
    let clock = Arc::new(SystemClock::new());

    let coordinator = SyncCoordinator::new(
        SyncConfig::default(),
        Arc::clone(&session),
        Capabilities {
            player: player.clone(),
            bus: bus.clone(),
            navigator: navigator.clone(),
            clock: clock.clone(),
        },
    );
    Harness {
        coordinator,
        session,
        player,
        bus,
        navigator,
        clock,
    }
}

/// Let spawned tasks drain their queues
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
