use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64};

/// Identifies a mapped segment as a channel of this binary version.
pub const CHANNEL_MAGIC: u64 = 0xDEAD_BEEF_CAFE_FACE;

/// Every slot occupies a multiple of this many bytes, so headers are always 8-aligned.
pub const SLOT_ALIGN: usize = 8;

/// The control block at offset 0 of the shared segment.
///
/// This struct represents the actual data layout in shared memory. It is `#[repr(C)]`
/// and its field order and sizes are shared by every attached process:
/// `magic`, `wait_word`, `total_shm_size`, `buffer_capacity` and `owner_pid` are
/// settled at creation (recovery rewrites `owner_pid`), everything else is mutated
/// concurrently. The circular buffer of `buffer_capacity` bytes follows immediately.
#[repr(C)]
pub struct ChannelHeader {
    /// `CHANNEL_MAGIC` once the creator has finished initialising. Stored last, with Release.
    pub magic: AtomicU64,

    /// Readers block on this word; writers bump it and wake everyone after publishing.
    pub wait_word: AtomicU32,

    /// Size of the whole segment (header + buffer) in bytes.
    pub total_shm_size: usize,

    /// Usable circular-buffer size in bytes, a multiple of `SLOT_ALIGN`.
    pub buffer_capacity: usize,

    /// Process id of the creator (or of the last recoverer).
    pub owner_pid: AtomicI32,

    /// Short-hold spinlock guarding cursor bookkeeping. 0 = free, 1 = held.
    pub lock: AtomicU32,

    /// Number of handles currently attached, across all processes.
    pub active_connections: AtomicU32,

    /// Consumer cursor: logical offset of the next unread byte.
    pub head: AtomicU64,

    /// Committed producer cursor: one past the last published byte.
    pub tail: AtomicU64,

    /// Speculative producer cursor including reserved-but-uncommitted space.
    pub tx_head: AtomicU64,

    pub messages_written: AtomicU64,
    pub messages_read: AtomicU64,
    pub bytes_written: AtomicU64,
    pub bytes_read: AtomicU64,
    pub write_contention_count: AtomicU64,

    /// Number of recoveries; doubles as an epoch that invalidates older reservations.
    pub channel_recovered_count: AtomicU64,
}

/// Offset of the circular buffer from the start of the segment.
pub const CHANNEL_HEADER_SIZE: usize = std::mem::size_of::<ChannelHeader>();

/// The smallest segment that can carry one empty message.
pub const MIN_SEGMENT_SIZE: usize =
    CHANNEL_HEADER_SIZE + crate::IPC::Structs::MESSAGE_HEADER_SIZE + SLOT_ALIGN;

/// Round `n` up to the next slot boundary.
#[inline]
pub const fn align_slot(n: usize) -> usize {
    (n + SLOT_ALIGN - 1) & !(SLOT_ALIGN - 1)
}

/// Usable buffer capacity for a segment of `total_size` bytes.
#[inline]
pub const fn capacity_for(total_size: usize) -> usize {
    (total_size - CHANNEL_HEADER_SIZE) & !(SLOT_ALIGN - 1)
}
