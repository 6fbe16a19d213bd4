//! Local capture tracks and remote stream bindings

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use tandem_proto::UserId;

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// A locally captured track, shared read-only by every connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    pub id: String,
    pub kind: TrackKind,
}

impl LocalTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self { id: id.into(), kind }
    }
}

/// Local capture result. Either kind may be missing; peers still join without it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalMedia {
    tracks: Vec<LocalTrack>,
}

impl LocalMedia {
    #[must_use]
    pub fn new(audio: Option<LocalTrack>, video: Option<LocalTrack>) -> Self {
        Self {
            tracks: audio.into_iter().chain(video).collect(),
        }
    }

    #[must_use]
    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    #[must_use]
    pub fn track(&self, kind: TrackKind) -> Option<&LocalTrack> {
        self.tracks.iter().find(|track| track.kind == kind)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// A track received from a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self { id: id.into(), kind }
    }
}

/// All tracks received from one peer, surfaced as a single stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub peer: UserId,
    tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    fn new(peer: UserId) -> Self {
        Self {
            peer,
            tracks: Vec::new(),
        }
    }

    #[must_use]
    pub fn tracks(&self) -> &[RemoteTrack] {
        &self.tracks
    }

    #[must_use]
    pub fn has_kind(&self, kind: TrackKind) -> bool {
        self.tracks.iter().any(|track| track.kind == kind)
    }
}

/// Result of binding an inbound track
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// First track from this peer; the stream is new
    Created(RemoteStream),
    /// Appended to the peer's existing stream
    Updated(RemoteStream),
    /// Same track delivered again
    Duplicate,
}

/// One shared stream per peer
#[derive(Debug, Default)]
pub struct MediaBindings {
    streams: DashMap<UserId, RemoteStream>,
}

impl MediaBindings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, peer: &UserId, track: RemoteTrack) -> Binding {
        let mut created = false;
        let mut stream = self.streams.entry(peer.clone()).or_insert_with(|| {
            created = true;
            RemoteStream::new(peer.clone())
        });
        if stream.tracks.iter().any(|existing| existing.id == track.id) {
            return Binding::Duplicate;
        }
        stream.tracks.push(track);
        if created {
            Binding::Created(stream.clone())
        } else {
            Binding::Updated(stream.clone())
        }
    }

    /// Drop the peer's stream. Returns whether one was bound.
    pub fn release(&self, peer: &UserId) -> bool {
        self.streams.remove(peer).is_some()
    }

    #[must_use]
    pub fn stream(&self, peer: &UserId) -> Option<RemoteStream> {
        self.streams.get(peer).map(|entry| entry.value().clone())
    }

    /// Release everything, returning the peers that had a stream
    pub fn clear(&self) -> Vec<UserId> {
        let peers: Vec<UserId> = self.streams.iter().map(|entry| entry.key().clone()).collect();
        self.streams.clear();
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_media_tolerates_missing_kinds() {
        let media = LocalMedia::new(None, Some(LocalTrack::new("cam", TrackKind::Video)));
        assert_eq!(media.tracks().len(), 1);
        assert!(media.track(TrackKind::Audio).is_none());
        assert!(LocalMedia::new(None, None).is_empty());
    }

    #[test]
    fn test_stream_created_once_per_peer() {
        let bindings = MediaBindings::new();
        let peer = UserId::from("bob");

        assert!(matches!(
            bindings.bind(&peer, RemoteTrack::new("a1", TrackKind::Audio)),
            Binding::Created(_)
        ));
        let Binding::Updated(stream) = bindings.bind(&peer, RemoteTrack::new("v1", TrackKind::Video)) else {
            panic!("second track should update the stream");
        };
        assert!(stream.has_kind(TrackKind::Audio) && stream.has_kind(TrackKind::Video));
        assert_eq!(
            bindings.bind(&peer, RemoteTrack::new("v1", TrackKind::Video)),
            Binding::Duplicate
        );

        assert!(bindings.release(&peer));
        assert!(!bindings.release(&peer));
    }
}
