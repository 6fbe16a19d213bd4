use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtoError;
use crate::ids::{RoomId, UserId};
use crate::playback::PlaybackMessage;
use crate::room::RoomMessage;
use crate::signaling::SignalingMessage;

/// Routing fields shared by every wire message, flattened next to the
/// message's own fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<M> {
    #[serde(flatten)]
    pub message: M,
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(rename = "roomId", default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<UserId>,
    #[serde(rename = "fromUserId", default, skip_serializing_if = "Option::is_none")]
    pub from_user_id: Option<UserId>,
}

impl<M> Envelope<M> {
    pub fn new(message: M) -> Self {
        Self {
            message,
            user_id: None,
            room_id: None,
            to: None,
            from: None,
            from_user_id: None,
        }
    }

    #[must_use]
    pub fn sent_by(mut self, user: UserId) -> Self {
        self.user_id = Some(user);
        self
    }

    #[must_use]
    pub fn in_room(mut self, room: Option<RoomId>) -> Self {
        self.room_id = room;
        self
    }

    #[must_use]
    pub fn addressed_to(mut self, user: UserId) -> Self {
        self.to = Some(user);
        self
    }

    /// Originating user. Older clients only fill `from` or `fromUserId`.
    #[must_use]
    pub fn sender(&self) -> Option<&UserId> {
        [&self.user_id, &self.from, &self.from_user_id]
            .into_iter()
            .flatten()
            .find(|id| !id.is_empty())
    }

    /// Addressee, or `None` for a room-wide broadcast
    #[must_use]
    pub fn recipient(&self) -> Option<&UserId> {
        self.to.as_ref().filter(|id| !id.is_empty())
    }
}

/// Message category, decided from the `type` tag alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Playback,
    Signaling,
    Room,
}

impl Category {
    #[must_use]
    pub fn of(tag: &str) -> Option<Self> {
        if PlaybackMessage::TAGS.contains(&tag) {
            Some(Self::Playback)
        } else if SignalingMessage::TAGS.contains(&tag) {
            Some(Self::Signaling)
        } else if RoomMessage::TAGS.contains(&tag) {
            Some(Self::Room)
        } else {
            None
        }
    }
}

/// A decoded wire message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Frame {
    Playback(Envelope<PlaybackMessage>),
    Signaling(Envelope<SignalingMessage>),
    Room(Envelope<RoomMessage>),
}

impl Frame {
    /// Playback frame stamped with its originator and room
    #[must_use]
    pub fn playback(message: PlaybackMessage, from: UserId, room: Option<RoomId>) -> Self {
        let mut envelope = Envelope::new(message).in_room(room);
        if matches!(envelope.message, PlaybackMessage::SyncResponse { .. }) {
            envelope.from_user_id = Some(from.clone());
        }
        Self::Playback(envelope.sent_by(from))
    }

    /// Signaling frame; `to == None` broadcasts to the room
    #[must_use]
    pub fn signaling(message: SignalingMessage, from: UserId, to: Option<UserId>) -> Self {
        let mut envelope = Envelope::new(message);
        envelope.from = Some(from.clone());
        envelope.to = to;
        Self::Signaling(envelope.sent_by(from))
    }

    #[must_use]
    pub fn room(message: RoomMessage, from: UserId, room: Option<RoomId>) -> Self {
        Self::Room(Envelope::new(message).sent_by(from).in_room(room))
    }

    /// Address an already built frame to a single member
    #[must_use]
    pub fn addressed_to(self, user: UserId) -> Self {
        match self {
            Self::Playback(e) => Self::Playback(e.addressed_to(user)),
            Self::Signaling(e) => Self::Signaling(e.addressed_to(user)),
            Self::Room(e) => Self::Room(e.addressed_to(user)),
        }
    }

    /// Decode one inbound text message
    pub fn decode(text: &str) -> Result<Self, ProtoError> {
        let value: Value = serde_json::from_str(text)?;
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtoError::MissingType)?;

        match Category::of(tag) {
            Some(Category::Playback) => Ok(Self::Playback(serde_json::from_value(value)?)),
            Some(Category::Signaling) => Ok(Self::Signaling(serde_json::from_value(value)?)),
            Some(Category::Room) => Ok(Self::Room(serde_json::from_value(value)?)),
            None => Err(ProtoError::UnknownType(tag.to_string())),
        }
    }

    pub fn encode(&self) -> Result<String, ProtoError> {
        Ok(serde_json::to_string(self)?)
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Playback(e) => e.message.kind(),
            Self::Signaling(e) => e.message.kind(),
            Self::Room(e) => e.message.kind(),
        }
    }

    #[must_use]
    pub fn sender(&self) -> Option<&UserId> {
        match self {
            Self::Playback(e) => e.sender(),
            Self::Signaling(e) => e.sender(),
            Self::Room(e) => e.sender(),
        }
    }

    #[must_use]
    pub fn recipient(&self) -> Option<&UserId> {
        match self {
            Self::Playback(e) => e.recipient(),
            Self::Signaling(e) => e.recipient(),
            Self::Room(e) => e.recipient(),
        }
    }
}
