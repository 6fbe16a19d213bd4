use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub sync: SyncConfig,
    pub mesh: MeshConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `pretty`
    pub format: String,
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Timing and threshold knobs of the playback sync protocol.
/// Durations are milliseconds, drift thresholds are seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub player_wait_timeout_ms: u64,
    pub player_poll_interval_ms: u64,
    /// Leader path: how long to wait for `canplay` before looking for a resume
    pub browse_ready_wait_ms: u64,
    pub resume_wait_timeout_ms: u64,
    /// A position past this counts as "the player resumed on its own"
    pub resume_threshold_ms: u64,
    /// Bounded wait for `canplay` before requesting sync, and for readiness after a seek-pause
    pub ready_wait_timeout_ms: u64,
    pub initial_sync_timeout_ms: u64,
    /// A sync response is still accepted this long after the request
    pub late_sync_window_ms: u64,
    pub pending_sync_ttl_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub position_report_interval_ms: u64,
    pub watchdog_interval_ms: u64,
    pub control_drift_threshold_secs: f64,
    pub heartbeat_drift_threshold_secs: f64,
    pub near_zero_threshold_secs: f64,
    pub near_zero_poll_attempts: u32,
    pub near_zero_poll_interval_ms: u64,
    pub sync_response_attempts: u32,
    pub sync_response_retry_ms: u64,
    /// An `ended` event this recent turns the next episode change into an auto-advance
    pub auto_advance_window_ms: u64,
    /// Positions this close to the end also count as finished
    pub near_end_threshold_secs: f64,
    pub locks: LockDurations,
    pub watch_path_prefix: String,
    pub browse_path_prefix: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            player_wait_timeout_ms: 10_000,
            player_poll_interval_ms: 100,
            browse_ready_wait_ms: 3_000,
            resume_wait_timeout_ms: 8_000,
            resume_threshold_ms: 5_000,
            ready_wait_timeout_ms: 5_000,
            initial_sync_timeout_ms: 2_000,
            late_sync_window_ms: 8_000,
            pending_sync_ttl_ms: 10_000,
            heartbeat_interval_ms: 3_000,
            position_report_interval_ms: 5_000,
            watchdog_interval_ms: 1_000,
            control_drift_threshold_secs: 0.75,
            heartbeat_drift_threshold_secs: 0.5,
            near_zero_threshold_secs: 1.0,
            near_zero_poll_attempts: 6,
            near_zero_poll_interval_ms: 250,
            sync_response_attempts: 6,
            sync_response_retry_ms: 500,
            auto_advance_window_ms: 10_000,
            near_end_threshold_secs: 30.0,
            locks: LockDurations::default(),
            watch_path_prefix: "/watch".to_string(),
            browse_path_prefix: "/browse".to_string(),
        }
    }
}

/// Suppression lock duration per programmatic action, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockDurations {
    pub control_ms: u64,
    pub seek_ms: u64,
    pub initial_sync_ms: u64,
    pub pending_sync_ms: u64,
    pub heartbeat_ms: u64,
    pub seek_pause_ms: u64,
}

impl Default for LockDurations {
    fn default() -> Self {
        Self {
            control_ms: 1_000,
            seek_ms: 1_200,
            initial_sync_ms: 1_500,
            pending_sync_ms: 1_500,
            heartbeat_ms: 600,
            seek_pause_ms: 2_000,
        }
    }
}

/// How a simultaneous offer from both ends of a peer pair is resolved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlarePolicy {
    /// Every incoming offer replaces whatever connection exists
    #[default]
    NewestOfferWins,
    /// The member with the larger id keeps its own outstanding offer
    PoliteByUserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// STUN/TURN URLs handed to the connection factory
    pub ice_servers: Vec<String>,
    pub reconnect: ReconnectConfig,
    pub glare_policy: GlarePolicy,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            reconnect: ReconnectConfig::default(),
            glare_policy: GlarePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            max_attempts: 5,
        }
    }
}

impl Config {
    /// Load configuration with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    ///
    /// Nested keys use a double underscore, e.g. `TANDEM_SYNC__HEARTBEAT_INTERVAL_MS`.
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("TANDEM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Collect every violated constraint instead of stopping at the first
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let sync = &self.sync;

        let intervals = [
            ("sync.player_poll_interval_ms", sync.player_poll_interval_ms),
            ("sync.heartbeat_interval_ms", sync.heartbeat_interval_ms),
            ("sync.position_report_interval_ms", sync.position_report_interval_ms),
            ("sync.watchdog_interval_ms", sync.watchdog_interval_ms),
            ("sync.near_zero_poll_interval_ms", sync.near_zero_poll_interval_ms),
            ("sync.sync_response_retry_ms", sync.sync_response_retry_ms),
            ("mesh.reconnect.base_delay_ms", self.mesh.reconnect.base_delay_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                errors.push(format!("{name} must be greater than zero"));
            }
        }

        for (name, value) in [
            ("sync.control_drift_threshold_secs", sync.control_drift_threshold_secs),
            ("sync.heartbeat_drift_threshold_secs", sync.heartbeat_drift_threshold_secs),
        ] {
            if !value.is_finite() || value <= 0.0 {
                errors.push(format!("{name} must be a positive number"));
            }
        }

        if sync.late_sync_window_ms < sync.initial_sync_timeout_ms {
            errors.push(
                "sync.late_sync_window_ms must not be shorter than sync.initial_sync_timeout_ms"
                    .to_string(),
            );
        }
        if self.mesh.reconnect.max_delay_ms < self.mesh.reconnect.base_delay_ms {
            errors.push(
                "mesh.reconnect.max_delay_ms must not be smaller than base_delay_ms".to_string(),
            );
        }
        if !sync.watch_path_prefix.starts_with('/') {
            errors.push("sync.watch_path_prefix must start with '/'".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
