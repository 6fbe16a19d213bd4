use anyhow::Result;
use std::time::Duration;
use tracing::{info, warn};

use tandem::loopback::{LoopbackClient, LoopbackHub};
use tandem_core::{logging, Config, Player};

const WATCH_URL: &str = "https://www.netflix.com/watch/80100172";

fn load_config() -> Result<Config> {
    let path = std::env::var("TANDEM_CONFIG_PATH").ok();
    let config = Config::load(path.as_deref())?;
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }
    Ok(config)
}

fn report(stage: &str, host: &LoopbackClient, guest: &LoopbackClient) {
    let host_position = host.player.position_secs();
    let guest_position = guest.player.position_secs();
    info!(
        stage,
        host_position,
        guest_position,
        drift = guest_position - host_position,
        host_playing = host.player.is_playing(),
        guest_playing = guest.player.is_playing(),
        "Positions"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;
    logging::init_logging(&config.logging)?;

    let room = nanoid::nanoid!(8);
    info!(room_id = %room, "Tandem loopback simulation starting");

    let hub = LoopbackHub::new();
    let host = LoopbackClient::connect(&hub, &config, "host", WATCH_URL);
    let guest = LoopbackClient::connect(&hub, &config, "guest", WATCH_URL);
    host.share_camera().await;
    guest.share_camera().await;

    // 1. The host opens the room and settles on its own position
    host.join(&room)?;
    hub.room_state(host.user(), false);
    tokio::time::sleep(Duration::from_millis(config.sync.initial_sync_timeout_ms + 500)).await;

    host.player.seek(754_000.0).await?;
    host.player.play().await?;
    tokio::time::sleep(Duration::from_millis(500)).await;

    // 2. The guest joins and is brought to the host's position
    guest.join(&room)?;
    hub.room_state(host.user(), false);
    tokio::time::sleep(Duration::from_millis(2_000)).await;
    report("after join", &host, &guest);

    // 3. The guest drifts; the next heartbeat pulls it back
    let drifted = (guest.player.position_secs() + 5.0) * 1000.0;
    guest.player.seek(drifted).await?;
    report("guest drifted", &host, &guest);
    tokio::time::sleep(Duration::from_millis(config.sync.heartbeat_interval_ms + 500)).await;
    report("after heartbeat", &host, &guest);

    // 4. The host jumps ahead and pauses
    host.player.seek(1_200_000.0).await?;
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    host.player.pause().await?;
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    report("after host seek and pause", &host, &guest);

    for (name, client, peer) in [("host", &host, guest.user()), ("guest", &guest, host.user())] {
        match client.peers.stream(peer) {
            Some(stream) => info!(
                member = name,
                peer_id = %peer,
                status = ?client.peers.status(peer),
                tracks = stream.tracks().len(),
                "Peer media"
            ),
            None => warn!(member = name, peer_id = %peer, "No media from peer"),
        }
    }

    guest.leave();
    host.leave();
    tokio::time::sleep(Duration::from_millis(100)).await;
    info!(relayed = hub.delivered(), "Simulation finished");
    Ok(())
}
