//! Packet dispatcher

use homenode_protocol::{Kind, MESSAGE_CAPACITY};

use super::queue::MessageQueue;
use crate::traits::{Built, PacketBuilder};
use crate::transport::{ChannelId, Link, Transport, TransportError};

/// What one dispatch step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Dispatched {
    /// Queue empty or transport busy
    Idle,
    /// A message of `kind` was committed
    Sent(Kind),
    /// The head item produced nothing and was removed
    Skipped(Kind),
    /// No builder knows the head item's kind; it was removed
    Unhandled(Kind),
    /// Committing failed; the item was removed
    Failed(Kind, TransportError),
}

/// Send at most one message from `queue` on `channel`
///
/// A list item queued without a parameter stays at the head, advancing
/// its cursor, until the builder reports the last element.
pub fn dispatch<B, L>(
    channel: ChannelId,
    queue: &mut MessageQueue,
    transport: &mut Transport,
    link: &mut L,
    builder: &mut B,
) -> Dispatched
where
    B: PacketBuilder + ?Sized,
    L: Link + ?Sized,
{
    if !transport.is_free(channel) {
        return Dispatched::Idle;
    }
    let Some(item) = queue.head() else {
        return Dispatched::Idle;
    };

    let mut buffer = [0u8; MESSAGE_CAPACITY];
    match builder.build(item.kind, item.param, queue.cursor(), &mut buffer) {
        Built::NotHandled => {
            queue.pop();
            Dispatched::Unhandled(item.kind)
        }
        Built::Exhausted => {
            queue.pop();
            Dispatched::Skipped(item.kind)
        }
        Built::Packet { len, last } => {
            let sent = transport.commit(channel, &buffer[..len.min(MESSAGE_CAPACITY)], link);
            if last || item.param.is_some() || sent.is_err() {
                queue.pop();
            } else {
                queue.advance();
            }
            match sent {
                Ok(()) => Dispatched::Sent(item.kind),
                Err(e) => Dispatched::Failed(item.kind, e),
            }
        }
    }
}
