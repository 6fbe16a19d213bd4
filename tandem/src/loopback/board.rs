use dashmap::DashMap;
use parking_lot::Mutex;
use tandem_mesh::{MeshObserver, PeerStatus, RemoteStream};
use tandem_proto::UserId;
use tracing::info;

/// Participant tiles: latest status and bound stream per peer
#[derive(Default)]
pub struct PeerBoard {
    statuses: DashMap<UserId, PeerStatus>,
    streams: DashMap<UserId, RemoteStream>,
    history: Mutex<Vec<(UserId, PeerStatus)>>,
}

impl PeerBoard {
    #[must_use]
    pub fn status(&self, peer: &UserId) -> Option<PeerStatus> {
        self.statuses.get(peer).map(|status| *status)
    }

    #[must_use]
    pub fn stream(&self, peer: &UserId) -> Option<RemoteStream> {
        self.streams.get(peer).map(|stream| stream.clone())
    }

    /// Every status the peer went through, oldest first
    #[must_use]
    pub fn history(&self, peer: &UserId) -> Vec<PeerStatus> {
        self.history
            .lock()
            .iter()
            .filter(|(owner, _)| owner == peer)
            .map(|(_, status)| *status)
            .collect()
    }
}

impl MeshObserver for PeerBoard {
    fn peer_state(&self, peer: &UserId, status: PeerStatus) {
        info!(peer_id = %peer, ?status, "Peer status");
        self.statuses.insert(peer.clone(), status);
        self.history.lock().push((peer.clone(), status));
    }

    fn stream_added(&self, peer: &UserId, stream: &RemoteStream) {
        self.streams.insert(peer.clone(), stream.clone());
    }

    fn stream_updated(&self, peer: &UserId, stream: &RemoteStream) {
        self.streams.insert(peer.clone(), stream.clone());
    }

    fn stream_removed(&self, peer: &UserId) {
        self.streams.remove(peer);
    }
}
