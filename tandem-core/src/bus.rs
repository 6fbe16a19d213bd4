use tandem_proto::Frame;

use crate::error::Result;

/// Outbound side of the relay connection. Delivery is fire-and-forget; an
/// error only means the frame could not be handed to the transport.
pub trait MessageBus: Send + Sync {
    fn send(&self, frame: Frame) -> Result<()>;
}
