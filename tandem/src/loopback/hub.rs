use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tandem_core::{Error as CoreError, MessageBus, SystemClock};
use tandem_proto::{Envelope, Frame, ProtoError, RoomMessage, UserId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// In-memory relay. Every member gets the encoded JSON of frames broadcast
/// by others, or only the frames addressed to it.
pub struct LoopbackHub {
    members: DashMap<UserId, mpsc::UnboundedSender<String>>,
    clock: Arc<SystemClock>,
    delivered: AtomicU64,
}

impl LoopbackHub {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            members: DashMap::new(),
            clock: Arc::new(SystemClock::new()),
            delivered: AtomicU64::new(0),
        })
    }

    /// Wall clock shared by every member, so event timestamps agree
    #[must_use]
    pub fn clock(&self) -> Arc<SystemClock> {
        Arc::clone(&self.clock)
    }

    /// Attach a member. Returns its outbound bus and inbound text stream.
    pub fn connect(self: &Arc<Self>, user: UserId) -> (Arc<dyn MessageBus>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.members.insert(user.clone(), tx);
        info!(user_id = %user, members = self.members.len(), "Member connected to hub");
        let bus = LoopbackBus {
            hub: Arc::clone(self),
            user,
        };
        (Arc::new(bus), rx)
    }

    /// Detach a member and tell the rest it left
    pub fn disconnect(&self, user: &UserId) {
        if self.members.remove(user).is_none() {
            return;
        }
        info!(user_id = %user, "Member disconnected from hub");
        let frame = Frame::Room(Envelope::new(RoomMessage::UserLeft).sent_by(user.clone()));
        if let Err(e) = self.deliver(None, &frame) {
            warn!(error = %e, "Failed to announce departure");
        }
    }

    /// Relay-originated frame, delivered to everyone
    pub fn relay(&self, message: RoomMessage) {
        let frame = Frame::Room(Envelope::new(message));
        if let Err(e) = self.deliver(None, &frame) {
            warn!(error = %e, "Failed to relay room message");
        }
    }

    /// Announce host and guest control the way the relay does after a join
    pub fn room_state(&self, host: &UserId, guest_control: bool) {
        self.relay(RoomMessage::RoomState {
            host_user_id: Some(host.clone()),
            guest_control_enabled: Some(guest_control),
            url: None,
        });
    }

    #[must_use]
    pub fn is_connected(&self, user: &UserId) -> bool {
        self.members.contains_key(user)
    }

    /// Messages handed to members so far
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    fn deliver(&self, from: Option<&UserId>, frame: &Frame) -> Result<usize, ProtoError> {
        let text = frame.encode()?;
        let targets: Vec<(UserId, mpsc::UnboundedSender<String>)> = match frame.recipient() {
            Some(to) => self
                .members
                .get(to)
                .map(|tx| vec![(to.clone(), tx.value().clone())])
                .unwrap_or_default(),
            None => self
                .members
                .iter()
                .filter(|member| Some(member.key()) != from)
                .map(|member| (member.key().clone(), member.value().clone()))
                .collect(),
        };

        let mut sent = 0;
        let mut closed = Vec::new();
        for (user, tx) in targets {
            if tx.send(text.clone()).is_ok() {
                sent += 1;
            } else {
                closed.push(user);
            }
        }
        for user in closed {
            debug!(user_id = %user, "Member stream closed, removing");
            self.members.remove(&user);
        }
        self.delivered.fetch_add(sent as u64, Ordering::Relaxed);
        Ok(sent)
    }
}

/// A member's outbound side of the hub
pub struct LoopbackBus {
    hub: Arc<LoopbackHub>,
    user: UserId,
}

impl MessageBus for LoopbackBus {
    fn send(&self, frame: Frame) -> tandem_core::Result<()> {
        if !self.hub.is_connected(&self.user) {
            return Err(CoreError::Bus(format!("{} is not connected", self.user)));
        }
        let kind = frame.kind();
        let sent = self.hub.deliver(Some(&self.user), &frame)?;
        debug!(user_id = %self.user, kind, sent, "Frame relayed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_proto::SignalingMessage;

    #[tokio::test]
    async fn test_broadcast_skips_sender_and_addressed_reaches_one() {
        let hub = LoopbackHub::new();
        let (alice_bus, mut alice_rx) = hub.connect(UserId::from("alice"));
        let (_, mut bob_rx) = hub.connect(UserId::from("bob"));
        let (_, mut carol_rx) = hub.connect(UserId::from("carol"));

        alice_bus
            .send(Frame::signaling(SignalingMessage::Join, UserId::from("alice"), None))
            .unwrap();
        assert!(bob_rx.try_recv().unwrap().contains("JOIN"));
        assert!(carol_rx.try_recv().is_ok());
        assert!(alice_rx.try_recv().is_err());

        alice_bus
            .send(Frame::signaling(
                SignalingMessage::Leave,
                UserId::from("alice"),
                Some(UserId::from("carol")),
            ))
            .unwrap();
        assert!(bob_rx.try_recv().is_err());
        assert!(carol_rx.try_recv().unwrap().contains("LEAVE"));
        assert_eq!(hub.delivered(), 3);
    }

    #[tokio::test]
    async fn test_disconnect_announces_user_left() {
        let hub = LoopbackHub::new();
        let (alice_bus, _alice_rx) = hub.connect(UserId::from("alice"));
        let (_, mut bob_rx) = hub.connect(UserId::from("bob"));

        hub.disconnect(&UserId::from("alice"));

        let text = bob_rx.try_recv().unwrap();
        assert!(text.contains("USER_LEFT") && text.contains("alice"));
        assert!(alice_bus
            .send(Frame::signaling(SignalingMessage::Join, UserId::from("alice"), None))
            .is_err());
    }
}
