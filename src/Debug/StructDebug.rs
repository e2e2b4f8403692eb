use std::fmt;
use std::sync::atomic::Ordering;

use crate::IPC::Buffer::RingBuffer;
use crate::IPC::{Channel, Message, Transaction};

/// Debug function for Channel
///
/// Shows the name, backing path and cursor positions. Counters are left to
/// `Channel::get_stats`.
pub fn debug_channel(channel: &Channel, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let header = channel.header();
    f.debug_struct("Channel")
        .field("name", &channel.name())
        .field("path", &channel.path())
        .field("capacity", &channel.capacity())
        .field("owner_pid", &header.owner_pid.load(Ordering::Relaxed))
        .field("head", &header.head.load(Ordering::Relaxed))
        .field("tail", &header.tail.load(Ordering::Relaxed))
        .field("tx_head", &header.tx_head.load(Ordering::Relaxed))
        .field("tx_open", &channel.has_open_transaction())
        .field("last_error", &channel.last_error())
        .finish_non_exhaustive()
}

/// Debug function for RingBuffer
///
/// Safely displays the buffer's memory location without dereferencing
pub fn debug_ring_buffer(buffer: &RingBuffer, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RingBuffer")
        .field("buffer", &format_args!("0x{:x}", buffer.buffer as usize))
        .field("capacity", &buffer.capacity)
        .finish_non_exhaustive()
}

// Payload bytes are not printed; they can be large and binary.
pub fn debug_message(msg: &Message<'_>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Message")
        .field("start", &msg.start())
        .field("msg_type", &msg.msg_type())
        .field("payload_len", &msg.payload().len())
        .field("total_len", &msg.total_len())
        .field("sender_pid", &msg.sender_pid())
        .field("owned", &msg.is_owned())
        .finish()
}

pub fn debug_transaction(tx: &Transaction<'_>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Transaction")
        .field("start", &tx.start())
        .field("reserved_len", &tx.reserved_len())
        .field("epoch", &tx.epoch)
        .finish_non_exhaustive()
}
