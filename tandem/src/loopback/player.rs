use async_trait::async_trait;
use parking_lot::Mutex;
use tandem_core::{ElementId, Error, Player, PlayerEvent, PlayerEventKind, Result};
use tokio::sync::broadcast;
use tokio::time::Instant;

struct Playhead {
    element: Option<u64>,
    next_element: u64,
    /// Position at `anchor`, in milliseconds
    base_ms: f64,
    anchor: Instant,
    playing: bool,
    ready: bool,
    duration_ms: f64,
}

impl Playhead {
    fn position_ms(&self) -> f64 {
        let elapsed = if self.playing {
            self.anchor.elapsed().as_secs_f64() * 1000.0
        } else {
            0.0
        };
        (self.base_ms + elapsed).min(self.duration_ms)
    }

    fn rebase(&mut self, position_ms: f64) {
        self.base_ms = position_ms.clamp(0.0, self.duration_ms);
        self.anchor = Instant::now();
    }
}

/// A media element whose playhead advances with the tokio clock
pub struct SimulatedPlayer {
    playhead: Mutex<Playhead>,
    events: broadcast::Sender<PlayerEvent>,
}

impl SimulatedPlayer {
    #[must_use]
    pub fn new(duration_secs: f64) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            playhead: Mutex::new(Playhead {
                element: Some(1),
                next_element: 2,
                base_ms: 0.0,
                anchor: Instant::now(),
                playing: false,
                ready: true,
                duration_ms: duration_secs * 1000.0,
            }),
            events,
        }
    }

    fn emit(&self, element: Option<u64>, kind: PlayerEventKind) {
        if let Some(id) = element {
            // No subscribers yet is fine
            let _ = self.events.send(PlayerEvent {
                element: ElementId(id),
                kind,
            });
        }
    }

    #[must_use]
    pub fn position_secs(&self) -> f64 {
        self.playhead.lock().position_ms() / 1000.0
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.playhead.lock().playing
    }

    /// The page restores a saved position without anyone asking
    pub fn native_resume(&self, position_secs: f64) {
        let element = {
            let mut playhead = self.playhead.lock();
            playhead.rebase(position_secs * 1000.0);
            playhead.element
        };
        self.emit(element, PlayerEventKind::Seeked);
    }

    /// Loading state; becoming ready fires `canplay`
    pub fn set_ready(&self, ready: bool) {
        let element = {
            let mut playhead = self.playhead.lock();
            let became_ready = ready && !playhead.ready;
            playhead.ready = ready;
            became_ready.then_some(playhead.element).flatten()
        };
        self.emit(element, PlayerEventKind::CanPlay);
    }

    /// The page swaps in a new media element at the same position
    pub fn replace_element(&self) {
        let mut playhead = self.playhead.lock();
        playhead.element = Some(playhead.next_element);
        playhead.next_element += 1;
    }

    pub fn unmount(&self) {
        self.playhead.lock().element = None;
    }

    /// Run to the end of the title
    pub fn finish(&self) {
        let element = {
            let mut playhead = self.playhead.lock();
            let end = playhead.duration_ms;
            playhead.rebase(end);
            playhead.playing = false;
            playhead.element
        };
        self.emit(element, PlayerEventKind::Ended);
    }
}

#[async_trait]
impl Player for SimulatedPlayer {
    fn element(&self) -> Option<ElementId> {
        self.playhead.lock().element.map(ElementId)
    }

    fn is_ready(&self) -> bool {
        self.playhead.lock().ready
    }

    async fn play(&self) -> Result<()> {
        let element = {
            let mut playhead = self.playhead.lock();
            if playhead.element.is_none() {
                return Err(Error::PlayerUnavailable("no media element".to_string()));
            }
            if playhead.playing {
                return Ok(());
            }
            let position = playhead.position_ms();
            playhead.rebase(position);
            playhead.playing = true;
            playhead.element
        };
        self.emit(element, PlayerEventKind::Play);
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        let element = {
            let mut playhead = self.playhead.lock();
            if playhead.element.is_none() {
                return Err(Error::PlayerUnavailable("no media element".to_string()));
            }
            if !playhead.playing {
                return Ok(());
            }
            let position = playhead.position_ms();
            playhead.rebase(position);
            playhead.playing = false;
            playhead.element
        };
        self.emit(element, PlayerEventKind::Pause);
        Ok(())
    }

    async fn seek(&self, position_ms: f64) -> Result<()> {
        if !position_ms.is_finite() {
            return Err(Error::Player(format!("cannot seek to {position_ms}")));
        }
        let element = {
            let mut playhead = self.playhead.lock();
            if playhead.element.is_none() {
                return Err(Error::PlayerUnavailable("no media element".to_string()));
            }
            playhead.rebase(position_ms);
            playhead.element
        };
        self.emit(element, PlayerEventKind::Seeked);
        Ok(())
    }

    fn current_time_ms(&self) -> Result<f64> {
        let playhead = self.playhead.lock();
        if playhead.element.is_none() {
            return Err(Error::PlayerUnavailable("no media element".to_string()));
        }
        Ok(playhead.position_ms())
    }

    fn is_paused(&self) -> Result<bool> {
        let playhead = self.playhead.lock();
        if playhead.element.is_none() {
            return Err(Error::PlayerUnavailable("no media element".to_string()));
        }
        Ok(!playhead.playing)
    }

    fn duration_ms(&self) -> Result<f64> {
        Ok(self.playhead.lock().duration_ms)
    }

    fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_playhead_follows_the_clock() {
        let player = SimulatedPlayer::new(60.0);
        let mut events = player.subscribe();

        player.seek(10_000.0).await.unwrap();
        player.play().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert!((player.position_secs() - 12.5).abs() < 1e-6);

        player.pause().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!((player.position_secs() - 12.5).abs() < 1e-6);

        let kinds: Vec<PlayerEventKind> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|event| event.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![PlayerEventKind::Seeked, PlayerEventKind::Play, PlayerEventKind::Pause]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_redundant_play_is_silent_and_end_is_clamped() {
        let player = SimulatedPlayer::new(10.0);
        player.play().await.unwrap();
        let mut events = player.subscribe();

        player.play().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(events.try_recv().is_err());
        assert!((player.position_secs() - 10.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmounted_player_rejects_calls() {
        let player = SimulatedPlayer::new(10.0);
        player.unmount();
        assert!(player.seek(1_000.0).await.is_err());
        assert!(player.current_time_ms().is_err());
        assert!(player.element().is_none());
    }
}
