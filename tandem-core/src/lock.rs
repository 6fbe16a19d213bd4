use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Time-boxed veto on rebroadcasting local player events.
///
/// Armed right before the coordinator drives the player itself; every player
/// event seen before expiry is treated as our own echo.
#[derive(Debug, Default)]
pub struct SuppressionLock {
    expires_at: Mutex<Option<Instant>>,
}

impl SuppressionLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self, duration: Duration) {
        *self.expires_at.lock() = Some(Instant::now() + duration);
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.expires_at
            .lock()
            .is_some_and(|expires_at| Instant::now() < expires_at)
    }

    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.expires_at
            .lock()
            .map_or(Duration::ZERO, |expires_at| {
                expires_at.saturating_duration_since(Instant::now())
            })
    }

    pub fn clear(&self) {
        *self.expires_at.lock() = None;
    }
}
