//! In-process room for simulations and scenario tests
//!
//! A [`LoopbackHub`] stands in for the relay, [`SimulatedPlayer`] for the
//! page's video element and [`SimulatedFactory`] for the WebRTC stack.
//! [`LoopbackClient`] wires one member together and runs its party loop.

mod board;
mod connection;
mod hub;
mod navigator;
mod player;

pub use board::PeerBoard;
pub use connection::{SimulatedConnection, SimulatedFactory};
pub use hub::{LoopbackBus, LoopbackHub};
pub use navigator::SimulatedNavigator;
pub use player::SimulatedPlayer;

use std::sync::Arc;
use tandem_core::{Capabilities, Clock, Config, Navigator, Player};
use tandem_mesh::{ConnectionFactory, LocalMedia, LocalTrack, MeshObserver, TrackKind};
use tandem_proto::{RoomId, UserId};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::party::Party;

/// Length of the simulated title, in seconds
pub const TITLE_DURATION_SECS: f64 = 2_600.0;

/// One member of a loopback room with its party loop running
pub struct LoopbackClient {
    pub party: Arc<Party>,
    pub player: Arc<SimulatedPlayer>,
    pub navigator: Arc<SimulatedNavigator>,
    pub factory: Arc<SimulatedFactory>,
    pub peers: Arc<PeerBoard>,
    cancel: CancellationToken,
}

impl LoopbackClient {
    /// Connect `user` to the hub with its page at `url`
    pub fn connect(hub: &Arc<LoopbackHub>, config: &Config, user: &str, url: &str) -> Self {
        let user = UserId::from(user);
        let (bus, inbound) = hub.connect(user.clone());
        let player = Arc::new(SimulatedPlayer::new(TITLE_DURATION_SECS));
        let navigator = Arc::new(SimulatedNavigator::new(url));
        let factory = Arc::new(SimulatedFactory::new(user.clone()));
        let peers = Arc::new(PeerBoard::default());

        let io = Capabilities {
            player: Arc::clone(&player) as Arc<dyn Player>,
            bus,
            navigator: Arc::clone(&navigator) as Arc<dyn Navigator>,
            clock: hub.clock() as Arc<dyn Clock>,
        };
        let party = Party::new(
            config,
            user,
            io,
            Arc::clone(&factory) as Arc<dyn ConnectionFactory>,
            Arc::clone(&peers) as Arc<dyn MeshObserver>,
        );

        let cancel = CancellationToken::new();
        tokio::spawn(Arc::clone(&party).run(inbound, navigator.subscribe(), cancel.clone()));

        Self {
            party,
            player,
            navigator,
            factory,
            peers,
            cancel,
        }
    }

    /// Camera and microphone named after the member
    pub async fn share_camera(&self) {
        let user = self.party.local_user_id();
        self.party
            .set_local_media(LocalMedia::new(
                Some(LocalTrack::new(format!("{user}-mic"), TrackKind::Audio)),
                Some(LocalTrack::new(format!("{user}-cam"), TrackKind::Video)),
            ))
            .await;
    }

    pub fn join(&self, room: &str) -> Result<()> {
        self.party.start(RoomId::from(room))
    }

    pub fn leave(&self) {
        self.party.stop();
    }

    #[must_use]
    pub fn user(&self) -> &UserId {
        self.party.local_user_id()
    }
}

impl Drop for LoopbackClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
