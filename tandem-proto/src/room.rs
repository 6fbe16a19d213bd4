use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Room control messages. The subject of `USER_JOINED` and `USER_LEFT` is the
/// envelope's originating user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomMessage {
    RoomState {
        #[serde(rename = "hostUserId", default, skip_serializing_if = "Option::is_none")]
        host_user_id: Option<UserId>,
        #[serde(
            rename = "guestControlEnabled",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        guest_control_enabled: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    HostChanged {
        #[serde(rename = "hostUserId")]
        host_user_id: UserId,
    },
    GuestControl {
        enabled: bool,
    },
    UserJoined,
    UserLeft,
}

impl RoomMessage {
    pub(crate) const TAGS: &'static [&'static str] = &[
        "ROOM_STATE",
        "HOST_CHANGED",
        "GUEST_CONTROL",
        "USER_JOINED",
        "USER_LEFT",
    ];

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RoomState { .. } => "ROOM_STATE",
            Self::HostChanged { .. } => "HOST_CHANGED",
            Self::GuestControl { .. } => "GUEST_CONTROL",
            Self::UserJoined => "USER_JOINED",
            Self::UserLeft => "USER_LEFT",
        }
    }
}
