use serde::{Deserialize, Serialize};
use tandem_proto::UserId;

use crate::media::RemoteStream;

/// Per-peer status surfaced to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    Connecting,
    Reconnecting,
    Connected,
    Closed,
}

/// UI-facing callbacks. Calls arrive from the mesh's tasks and must not block.
pub trait MeshObserver: Send + Sync {
    fn peer_state(&self, peer: &UserId, status: PeerStatus);

    /// First track from `peer` arrived; bind the stream to a tile
    fn stream_added(&self, peer: &UserId, stream: &RemoteStream);

    /// A further track joined an already bound stream
    fn stream_updated(&self, _peer: &UserId, _stream: &RemoteStream) {}

    fn stream_removed(&self, peer: &UserId);
}
