use tokio::time::Instant;

/// Wall clock in epoch milliseconds, the unit of `eventTimestamp`
pub trait Clock: Send + Sync + 'static {
    fn now_ms(&self) -> i64;
}

/// Epoch clock that advances with the tokio clock.
///
/// The epoch is sampled once and then extended by monotonic elapsed time, so
/// timestamps never jump backwards and paused-time tests see consistent values.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch_ms: i64,
    anchor: Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch_ms: chrono::Utc::now().timestamp_millis(),
            anchor: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        let elapsed = i64::try_from(self.anchor.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.epoch_ms.saturating_add(elapsed)
    }
}
