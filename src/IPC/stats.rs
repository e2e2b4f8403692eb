use std::sync::atomic::Ordering::{Acquire, Relaxed};

use super::lifecycle::Channel;
use crate::IPC::Buffer::lock::CursorLock;
use crate::IPC::Buffer::RingBuffer;

/// A point-in-time copy of a channel's shared counters.
///
/// Cursors and message counters are read under the cursor lock, so they agree with
/// each other. `write_contention_count` and `active_connections` move outside it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub messages_written: u64,
    pub messages_read: u64,
    /// Payload bytes published (headers and padding excluded).
    pub bytes_written: u64,
    /// Payload bytes released.
    pub bytes_read: u64,
    pub write_contention_count: u64,
    pub channel_recovered_count: u64,
    pub active_connections: u32,
    pub owner_pid: i32,
    pub buffer_capacity: usize,
    /// Committed, unreleased bytes (`tail - head`).
    pub buffer_bytes_used: usize,
    /// Bytes held by reservations that have not published yet (`tx_head - tail`).
    pub buffer_bytes_reserved: usize,
}

impl Channel {
    /// Snapshot the shared counters.
    ///
    /// If the cursor lock stays wedged past `lock_timeout`, the values are read
    /// without it.
    pub fn get_stats(&self) -> ChannelStats {
        let header = self.header();
        let guard = CursorLock::acquire(header, self.options.lock_timeout);
        if let Err(e) = &guard {
            tracing::warn!(name = %self.name, "reading stats without the cursor lock: {}", e);
        }

        let head = header.head.load(Acquire);
        let tail = header.tail.load(Acquire);
        let tx_head = header.tx_head.load(Acquire);

        let stats = ChannelStats {
            messages_written: header.messages_written.load(Relaxed),
            messages_read: header.messages_read.load(Relaxed),
            bytes_written: header.bytes_written.load(Relaxed),
            bytes_read: header.bytes_read.load(Relaxed),
            write_contention_count: header.write_contention_count.load(Relaxed),
            channel_recovered_count: header.channel_recovered_count.load(Relaxed),
            active_connections: header.active_connections.load(Relaxed),
            owner_pid: header.owner_pid.load(Relaxed),
            buffer_capacity: self.ring.capacity(),
            buffer_bytes_used: RingBuffer::distance(head, tail) as usize,
            buffer_bytes_reserved: RingBuffer::distance(tail, tx_head) as usize,
        };
        drop(guard);
        stats
    }
}
