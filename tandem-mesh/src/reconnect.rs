//! Reconnection policy with capped exponential backoff
//!
//! One timer per peer. A new `schedule` call cancels the pending timer for
//! that peer before arming its own, so the last call always wins. Peers that
//! explicitly left are never rescheduled.

use dashmap::DashSet;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tandem_core::{ReconnectConfig, Session};
use tandem_proto::UserId;
use tokio::task::AbortHandle;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct Entry {
    attempts: u32,
    timer: Option<(u64, AbortHandle)>,
}

/// What a `schedule` call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    /// Retry armed; `attempt` counts from 1
    Retry { attempt: u32, delay: Duration },
    /// Attempts exhausted, bookkeeping cleared
    GaveUp,
    /// Party inactive or peer departed
    Skipped,
}

pub struct ReconnectionPolicy {
    config: ReconnectConfig,
    session: Arc<Session>,
    departed: DashSet<UserId>,
    entries: Arc<Mutex<HashMap<UserId, Entry>>>,
    next_timer: AtomicU64,
}

impl ReconnectionPolicy {
    #[must_use]
    pub fn new(config: ReconnectConfig, session: Arc<Session>) -> Self {
        Self {
            config,
            session,
            departed: DashSet::new(),
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_timer: AtomicU64::new(1),
        }
    }

    /// `min(base * 2^attempt, cap)`
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = self.config.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.config.max_delay_ms))
    }

    /// Arm a retry for `peer`, replacing any pending one
    pub fn schedule<F, Fut>(&self, peer: &UserId, retry: F) -> Scheduled
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if !self.session.is_active() || self.departed.contains(peer) {
            self.reset(peer);
            return Scheduled::Skipped;
        }

        let mut entries = self.entries.lock();
        let entry = entries.entry(peer.clone()).or_default();
        if let Some((_, timer)) = entry.timer.take() {
            timer.abort();
        }
        if entry.attempts >= self.config.max_attempts {
            info!(peer_id = %peer, attempts = entry.attempts, "Reconnection attempts exhausted");
            entries.remove(peer);
            return Scheduled::GaveUp;
        }

        let delay = self.delay_for(entry.attempts);
        entry.attempts += 1;
        let attempt = entry.attempts;

        let timer_id = self.next_timer.fetch_add(1, Ordering::Relaxed);
        let bookkeeping = Arc::clone(&self.entries);
        let target = peer.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Forget our own handle first so a reset issued while the retry
            // runs cannot abort it halfway
            if let Some(entry) = bookkeeping.lock().get_mut(&target) {
                if entry.timer.as_ref().is_some_and(|(id, _)| *id == timer_id) {
                    entry.timer = None;
                }
            }
            retry().await;
        });
        entry.timer = Some((timer_id, handle.abort_handle()));

        info!(
            peer_id = %peer,
            attempt,
            delay_ms = delay.as_millis(),
            "Reconnection scheduled"
        );
        Scheduled::Retry { attempt, delay }
    }

    /// Forget attempts and cancel the timer, e.g. once connected
    pub fn reset(&self, peer: &UserId) {
        if let Some(entry) = self.entries.lock().remove(peer) {
            if let Some((_, timer)) = entry.timer {
                timer.abort();
                debug!(peer_id = %peer, "Pending reconnection cancelled");
            }
        }
    }

    /// The peer left on purpose
    pub fn mark_departed(&self, peer: &UserId) {
        self.departed.insert(peer.clone());
        self.reset(peer);
    }

    /// The peer is back (JOIN or OFFER)
    pub fn clear_departed(&self, peer: &UserId) {
        self.departed.remove(peer);
    }

    #[must_use]
    pub fn is_departed(&self, peer: &UserId) -> bool {
        self.departed.contains(peer)
    }

    #[must_use]
    pub fn attempts(&self, peer: &UserId) -> u32 {
        self.entries.lock().get(peer).map_or(0, |entry| entry.attempts)
    }

    #[must_use]
    pub fn is_pending(&self, peer: &UserId) -> bool {
        self.entries
            .lock()
            .get(peer)
            .is_some_and(|entry| entry.timer.is_some())
    }

    /// Party stop: cancel every timer and forget departures
    pub fn clear_all(&self) {
        let entries: Vec<Entry> = self.entries.lock().drain().map(|(_, entry)| entry).collect();
        for (_, timer) in entries.into_iter().filter_map(|entry| entry.timer) {
            timer.abort();
        }
        self.departed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tandem_proto::RoomId;

    fn policy() -> ReconnectionPolicy {
        let session = Arc::new(Session::new(UserId::from("me")));
        session.start(RoomId::from("room"));
        ReconnectionPolicy::new(ReconnectConfig::default(), session)
    }

    type Retry = std::pin::Pin<Box<dyn Future<Output = ()> + Send>>;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Retry + Clone + Send + 'static) {
        let runs = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&runs);
        let make = move || -> Retry {
            let runs = Arc::clone(&handle);
            Box::pin(async move {
                runs.fetch_add(1, Ordering::SeqCst);
            })
        };
        (runs, make)
    }

    #[test]
    fn test_backoff_is_monotonic_and_capped() {
        let policy = policy();
        let delays: Vec<u64> = (0..8)
            .map(|attempt| u64::try_from(policy.delay_for(attempt).as_millis()).unwrap())
            .collect();

        assert_eq!(&delays[..5], &[500, 1_000, 2_000, 4_000, 8_000]);
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(delays.iter().all(|delay| *delay <= 10_000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(10_000));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let policy = policy();
        let peer = UserId::from("bob");
        let (_, make) = counter();

        for expected in 1..=5 {
            assert!(matches!(
                policy.schedule(&peer, make.clone()),
                Scheduled::Retry { attempt, .. } if attempt == expected
            ));
        }
        assert_eq!(policy.schedule(&peer, make.clone()), Scheduled::GaveUp);
        assert_eq!(policy.attempts(&peer), 0);
        assert!(!policy.is_pending(&peer));
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_schedule_wins() {
        let policy = policy();
        let peer = UserId::from("bob");
        let (runs, make) = counter();

        policy.schedule(&peer, make.clone());
        policy.schedule(&peer, make.clone());
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!policy.is_pending(&peer));
        assert_eq!(policy.attempts(&peer), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_departed_peer_is_never_scheduled() {
        let policy = policy();
        let peer = UserId::from("bob");
        let (runs, make) = counter();

        policy.schedule(&peer, make.clone());
        policy.mark_departed(&peer);
        assert_eq!(policy.schedule(&peer, make.clone()), Scheduled::Skipped);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        policy.clear_departed(&peer);
        assert!(matches!(policy.schedule(&peer, make), Scheduled::Retry { attempt: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactive_session_skips() {
        let session = Arc::new(Session::new(UserId::from("me")));
        let policy = ReconnectionPolicy::new(ReconnectConfig::default(), session);
        let (_, make) = counter();

        assert_eq!(policy.schedule(&UserId::from("bob"), make), Scheduled::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_cancels_timer() {
        let policy = policy();
        let peer = UserId::from("bob");
        let (runs, make) = counter();

        policy.schedule(&peer, make);
        policy.reset(&peer);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(policy.attempts(&peer), 0);
    }
}
