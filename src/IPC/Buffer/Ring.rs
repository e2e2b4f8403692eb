// The circular byte buffer that follows the channel header in shared memory.

use super::layout::ChannelHeader;

/// A byte-granular ring buffer view over a mapped channel segment.
///
/// This struct is NOT stored in shared memory. It is a transient view that holds
/// pointers into the segment mapped by the owning `Channel`.
///
/// ### Cursor arithmetic:
/// - `head`, `tail` and `tx_head` are monotonically increasing logical byte offsets.
///   They are only ever reduced modulo `capacity` when turned into a physical offset.
/// - Distances are taken with wrapping subtraction, so `tail - head` is the number of
///   committed unread bytes and can legitimately equal `capacity` (buffer full).
/// - A slot whose bytes run past the physical end continues at offset 0.
pub struct RingBuffer {
    /// Pointer to the control block at the start of the segment.
    pub(crate) header: *const ChannelHeader,

    /// Pointer to the first byte of the circular buffer.
    pub(crate) buffer: *mut u8,

    /// The capacity of the buffer in bytes.
    pub(crate) capacity: usize,
}

unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}
