use super::{ChannelClosed, ClientChannel, OutboundMessage};
use std::sync::Arc;
use tokio::sync::mpsc;

/// In-process client channel backed by an unbounded queue.
///
/// Writes never block; the receiving half is drained by the transport task
/// that owns the client's socket. Once that half is dropped the channel
/// reports itself closed.
pub struct QueueChannel {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl QueueChannel {
    /// Create a channel and the receiver its messages arrive on.
    pub fn pair() -> (Arc<Self>, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl ClientChannel for QueueChannel {
    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    fn write(&self, message: OutboundMessage) -> Result<(), ChannelClosed> {
        self.tx.send(message).map_err(|_| ChannelClosed)
    }
}
