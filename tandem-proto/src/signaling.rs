use serde::{Deserialize, Serialize};

/// ICE candidate in the browser's `RTCIceCandidateInit` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Full candidate line
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u32>,
}

/// Session description (SDP) in the browser's `RTCSessionDescriptionInit` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Mesh signaling envelopes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalingMessage {
    Join,
    Offer { offer: SessionDescription },
    Answer { answer: SessionDescription },
    IceCandidate { candidate: IceCandidate },
    Leave,
}

impl SignalingMessage {
    pub(crate) const TAGS: &'static [&'static str] =
        &["JOIN", "OFFER", "ANSWER", "ICE_CANDIDATE", "LEAVE"];

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join => "JOIN",
            Self::Offer { .. } => "OFFER",
            Self::Answer { .. } => "ANSWER",
            Self::IceCandidate { .. } => "ICE_CANDIDATE",
            Self::Leave => "LEAVE",
        }
    }
}
