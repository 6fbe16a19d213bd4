use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::player::{ElementId, Player, PlayerEvent, PlayerEventKind};

/// Poll until the player mounts an element. `None` on timeout.
pub(super) async fn wait_for_player(
    player: &dyn Player,
    timeout: Duration,
    poll: Duration,
) -> Option<ElementId> {
    tokio::time::timeout(timeout, async {
        loop {
            if let Some(element) = player.element() {
                return element;
            }
            tokio::time::sleep(poll).await;
        }
    })
    .await
    .ok()
}

/// Wait for the first event matching `matches`. Returns false on timeout or
/// when the player's event stream is gone.
pub(super) async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<PlayerEvent>,
    timeout: Duration,
    mut matches: F,
) -> bool
where
    F: FnMut(PlayerEventKind) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if matches(event.kind) => return true,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return false,
            }
        }
    })
    .await
    .unwrap_or(false)
}
