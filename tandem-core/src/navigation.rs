//! URL and episode transition tracking.
//!
//! The outer layer reports every URL change through [`NavigationTracker::observe`].
//! The tracker decides what kind of transition it was: entering a watch
//! surface from browsing, an auto-advance to the next episode, or a move we
//! caused ourselves in response to a peer.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use crate::config::SyncConfig;
use crate::error::Result;

/// Host-page navigation capability
#[async_trait]
pub trait Navigator: Send + Sync {
    fn current_url(&self) -> String;

    async fn navigate(&self, url: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    /// A page with a mounted player
    Watch,
    /// Catalogue or directory pages
    Browse,
    Other,
}

/// Classifies host-page URLs by path prefix
#[derive(Debug, Clone)]
pub struct SurfaceRules {
    watch_prefix: String,
    browse_prefix: String,
}

impl SurfaceRules {
    pub fn new(watch_prefix: impl Into<String>, browse_prefix: impl Into<String>) -> Self {
        Self {
            watch_prefix: watch_prefix.into(),
            browse_prefix: browse_prefix.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(&config.watch_path_prefix, &config.browse_path_prefix)
    }

    #[must_use]
    pub fn classify(&self, url: &str) -> Surface {
        let Ok(parsed) = Url::parse(url) else {
            return Surface::Other;
        };
        let path = parsed.path();
        if path_has_prefix(path, &self.watch_prefix) {
            Surface::Watch
        } else if path_has_prefix(path, &self.browse_prefix) {
            Surface::Browse
        } else {
            Surface::Other
        }
    }

    /// Title id of a watch URL, ignoring query parameters such as track ids
    #[must_use]
    pub fn content_id(&self, url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        let rest = parsed.path().strip_prefix(self.watch_prefix.as_str())?;
        rest.split('/')
            .find(|segment| !segment.is_empty())
            .map(str::to_string)
    }

    #[must_use]
    pub fn same_content(&self, a: &str, b: &str) -> bool {
        match (self.content_id(a), self.content_id(b)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

fn path_has_prefix(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Position handed over a navigation, applied once the new player mounts
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSync {
    pub current_time: f64,
    pub is_playing: bool,
    pub url: Option<String>,
}

/// Single-slot handover with a time-to-live
#[derive(Debug)]
pub struct PendingSyncSlot {
    ttl: Duration,
    slot: Mutex<Option<(PendingSync, Instant)>>,
}

impl PendingSyncSlot {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    pub fn stage(&self, pending: PendingSync) {
        debug!(
            current_time = pending.current_time,
            is_playing = pending.is_playing,
            "Staged pending sync"
        );
        *self.slot.lock() = Some((pending, Instant::now()));
    }

    /// Take the staged sync if it has not expired
    pub fn take(&self) -> Option<PendingSync> {
        let (pending, staged_at) = self.slot.lock().take()?;
        if staged_at.elapsed() > self.ttl {
            debug!(age_ms = staged_at.elapsed().as_millis(), "Discarded stale pending sync");
            return None;
        }
        Some(pending)
    }

    #[must_use]
    pub fn is_staged(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn clear(&self) {
        *self.slot.lock() = None;
    }
}

/// What a URL change meant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Surface,
    pub to: Surface,
    /// Different title than before (always true when either side is not a watch page)
    pub content_changed: bool,
    /// Entered a watch page straight from browsing
    pub from_browse: bool,
    /// The player moved on to the next episode by itself
    pub auto_advance: bool,
    /// We navigated because a peer told us to
    pub remote_initiated: bool,
}

#[derive(Debug, Default)]
struct TrackerState {
    ended_at: Option<Instant>,
    near_end: bool,
    expected_content: Option<String>,
}

#[derive(Debug)]
pub struct NavigationTracker {
    rules: SurfaceRules,
    auto_advance_window: Duration,
    near_end_threshold_secs: f64,
    state: Mutex<TrackerState>,
}

impl NavigationTracker {
    #[must_use]
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            rules: SurfaceRules::from_config(config),
            auto_advance_window: Duration::from_millis(config.auto_advance_window_ms),
            near_end_threshold_secs: config.near_end_threshold_secs,
            state: Mutex::new(TrackerState::default()),
        }
    }

    #[must_use]
    pub fn rules(&self) -> &SurfaceRules {
        &self.rules
    }

    /// The player reported `ended`
    pub fn mark_ended(&self) {
        self.state.lock().ended_at = Some(Instant::now());
    }

    /// Track whether playback is in the closing credits
    pub fn note_position(&self, current_secs: f64, duration_secs: f64) {
        let near_end = duration_secs.is_finite()
            && duration_secs > 0.0
            && duration_secs - current_secs <= self.near_end_threshold_secs;
        self.state.lock().near_end = near_end;
    }

    /// The next arrival at `url` is our own doing
    pub fn expect_navigation(&self, url: &str) {
        self.state.lock().expected_content = self.rules.content_id(url);
    }

    pub fn observe(&self, from: &str, to: &str) -> Transition {
        let from_surface = self.rules.classify(from);
        let to_surface = self.rules.classify(to);
        let content_changed = !self.rules.same_content(from, to);

        let mut state = self.state.lock();
        let target = self.rules.content_id(to);
        let remote_initiated = target.is_some() && state.expected_content == target;
        if remote_initiated || to_surface != Surface::Watch {
            state.expected_content = None;
        }

        let recently_ended = state
            .ended_at
            .is_some_and(|at| at.elapsed() <= self.auto_advance_window);
        let auto_advance = from_surface == Surface::Watch
            && to_surface == Surface::Watch
            && content_changed
            && !remote_initiated
            && (recently_ended || state.near_end);

        if content_changed {
            state.ended_at = None;
            state.near_end = false;
        }

        Transition {
            from: from_surface,
            to: to_surface,
            content_changed,
            from_browse: from_surface == Surface::Browse && to_surface == Surface::Watch,
            auto_advance,
            remote_initiated,
        }
    }
}
