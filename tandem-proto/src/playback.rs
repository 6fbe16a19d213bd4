use serde::{Deserialize, Serialize};

/// Requested player state carried by `PLAY_PAUSE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackControl {
    Play,
    Pause,
}

impl PlaybackControl {
    #[must_use]
    pub fn is_play(self) -> bool {
        matches!(self, Self::Play)
    }
}

/// Playback envelopes. `currentTime` is always seconds, `eventTimestamp` is
/// always sender-side epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaybackMessage {
    PlayPause {
        control: PlaybackControl,
        #[serde(rename = "currentTime")]
        current_time: f64,
        #[serde(rename = "eventTimestamp", default, skip_serializing_if = "Option::is_none")]
        event_timestamp: Option<f64>,
    },
    Seek {
        #[serde(rename = "currentTime")]
        current_time: f64,
        #[serde(rename = "isPlaying", default)]
        is_playing: bool,
        #[serde(rename = "eventTimestamp", default, skip_serializing_if = "Option::is_none")]
        event_timestamp: Option<f64>,
    },
    SeekPause {
        #[serde(rename = "currentTime")]
        current_time: f64,
    },
    Ready {
        #[serde(rename = "targetTime", default, skip_serializing_if = "Option::is_none")]
        target_time: Option<f64>,
    },
    RequestSync {
        #[serde(rename = "respectAutoPlay", default)]
        respect_auto_play: bool,
    },
    SyncResponse {
        #[serde(rename = "currentTime")]
        current_time: f64,
        #[serde(rename = "isPlaying", default)]
        is_playing: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(rename = "respectAutoPlay", default)]
        respect_auto_play: bool,
    },
    HostHeartbeat {
        #[serde(rename = "currentTime")]
        current_time: f64,
        #[serde(rename = "isPlaying", default)]
        is_playing: bool,
        #[serde(rename = "eventTimestamp", default, skip_serializing_if = "Option::is_none")]
        event_timestamp: Option<f64>,
    },
    PositionUpdate {
        #[serde(rename = "currentTime")]
        current_time: f64,
        #[serde(rename = "isPlaying", default)]
        is_playing: bool,
    },
    UrlChange {
        url: String,
        #[serde(rename = "currentTime", default, skip_serializing_if = "Option::is_none")]
        current_time: Option<f64>,
        #[serde(rename = "isPlaying", default, skip_serializing_if = "Option::is_none")]
        is_playing: Option<bool>,
    },
}

impl PlaybackMessage {
    pub(crate) const TAGS: &'static [&'static str] = &[
        "PLAY_PAUSE",
        "SEEK",
        "SEEK_PAUSE",
        "READY",
        "REQUEST_SYNC",
        "SYNC_RESPONSE",
        "HOST_HEARTBEAT",
        "POSITION_UPDATE",
        "URL_CHANGE",
    ];

    /// Wire tag of this message
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlayPause { .. } => "PLAY_PAUSE",
            Self::Seek { .. } => "SEEK",
            Self::SeekPause { .. } => "SEEK_PAUSE",
            Self::Ready { .. } => "READY",
            Self::RequestSync { .. } => "REQUEST_SYNC",
            Self::SyncResponse { .. } => "SYNC_RESPONSE",
            Self::HostHeartbeat { .. } => "HOST_HEARTBEAT",
            Self::PositionUpdate { .. } => "POSITION_UPDATE",
            Self::UrlChange { .. } => "URL_CHANGE",
        }
    }

    /// Whether receiving this message may drive the local player.
    /// Only `POSITION_UPDATE` and `READY` are purely informational.
    #[must_use]
    pub fn mutates_player(&self) -> bool {
        !matches!(self, Self::PositionUpdate { .. } | Self::Ready { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_play_pause_wire_shape() {
        let msg = PlaybackMessage::PlayPause {
            control: PlaybackControl::Play,
            current_time: 120.0,
            event_timestamp: Some(1_700_000_000_000.0),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "PLAY_PAUSE",
                "control": "play",
                "currentTime": 120.0,
                "eventTimestamp": 1_700_000_000_000.0
            })
        );
    }

    #[test]
    fn test_integer_times_are_accepted() {
        let msg: PlaybackMessage =
            serde_json::from_value(json!({"type": "SEEK", "currentTime": 42, "isPlaying": true}))
                .unwrap();
        assert_eq!(
            msg,
            PlaybackMessage::Seek {
                current_time: 42.0,
                is_playing: true,
                event_timestamp: None,
            }
        );
    }

    #[test]
    fn test_request_sync_defaults() {
        let msg: PlaybackMessage = serde_json::from_value(json!({"type": "REQUEST_SYNC"})).unwrap();
        assert_eq!(
            msg,
            PlaybackMessage::RequestSync {
                respect_auto_play: false
            }
        );
        assert!(msg.mutates_player());
    }

    #[test]
    fn test_tags_match_kinds() {
        let msg = PlaybackMessage::PositionUpdate {
            current_time: 1.0,
            is_playing: false,
        };
        assert!(PlaybackMessage::TAGS.contains(&msg.kind()));
        assert!(!msg.mutates_player());
    }
}
