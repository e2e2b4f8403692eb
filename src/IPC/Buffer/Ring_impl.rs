use std::ptr;
use std::sync::atomic::Ordering::{Acquire, Release};
use std::time::Duration;

use super::layout::ChannelHeader;
use super::Ring::RingBuffer;
use crate::Core::futex::{futex_wait, futex_wake_all, WaitOutcome};
use crate::IPC::Structs::{MessageHeader, MESSAGE_HEADER_SIZE};

impl RingBuffer {
    /// Create a ring buffer view over an initialised channel segment.
    ///
    /// # Safety
    /// `base` must point to a mapped segment whose header has been initialised and
    /// which stays mapped for the lifetime of the view.
    pub unsafe fn new(base: *mut u8) -> Self {
        let header = base as *const ChannelHeader;
        let capacity = (*header).buffer_capacity;
        Self {
            header,
            buffer: base.add(super::layout::CHANNEL_HEADER_SIZE),
            capacity,
        }
    }

    #[inline]
    pub fn header(&self) -> &ChannelHeader {
        // Safety: valid for the lifetime of the view, see `new`
        unsafe { &*self.header }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Physical offset of a logical cursor position.
    #[inline]
    pub fn offset(&self, pos: u64) -> usize {
        (pos % self.capacity as u64) as usize
    }

    /// Wrap-safe distance from `from` to `to`.
    #[inline]
    pub fn distance(from: u64, to: u64) -> u64 {
        to.wrapping_sub(from)
    }

    /// True if `len` bytes starting at `pos` do not cross the physical end.
    #[inline]
    pub fn is_contiguous(&self, pos: u64, len: usize) -> bool {
        self.offset(pos) + len <= self.capacity
    }

    /// Copy `data` into the ring at `pos`, splitting at the physical end.
    ///
    /// # Safety
    /// The caller must exclusively own `[pos, pos + data.len())` (a reservation).
    pub unsafe fn copy_in(&self, pos: u64, data: &[u8]) {
        let len = data.len();
        debug_assert!(len <= self.capacity);
        let start = self.offset(pos);
        if start + len <= self.capacity {
            ptr::copy_nonoverlapping(data.as_ptr(), self.buffer.add(start), len);
        } else {
            let part1 = self.capacity - start;
            ptr::copy_nonoverlapping(data.as_ptr(), self.buffer.add(start), part1);
            ptr::copy_nonoverlapping(data.as_ptr().add(part1), self.buffer, len - part1);
        }
    }

    /// Copy `dest.len()` bytes out of the ring starting at `pos`.
    ///
    /// # Safety
    /// `[pos, pos + dest.len())` must be published and not yet released.
    pub unsafe fn copy_out(&self, pos: u64, dest: &mut [u8]) {
        let len = dest.len();
        debug_assert!(len <= self.capacity);
        let start = self.offset(pos);
        if start + len <= self.capacity {
            ptr::copy_nonoverlapping(self.buffer.add(start), dest.as_mut_ptr(), len);
        } else {
            let part1 = self.capacity - start;
            ptr::copy_nonoverlapping(self.buffer.add(start), dest.as_mut_ptr(), part1);
            ptr::copy_nonoverlapping(self.buffer, dest.as_mut_ptr().add(part1), len - part1);
        }
    }

    /// Borrow `len` bytes at `pos` directly from shared memory.
    ///
    /// # Safety
    /// The range must be contiguous (see `is_contiguous`) and stay published for `'a`.
    pub unsafe fn slice<'a>(&self, pos: u64, len: usize) -> &'a [u8] {
        debug_assert!(self.is_contiguous(pos, len));
        std::slice::from_raw_parts(self.buffer.add(self.offset(pos)), len)
    }

    /// The one or two mutable pieces making up `[pos, pos + len)`.
    ///
    /// # Safety
    /// The caller must exclusively own the range for `'a`.
    pub unsafe fn parts_mut<'a>(&self, pos: u64, len: usize) -> (&'a mut [u8], &'a mut [u8]) {
        let start = self.offset(pos);
        if start + len <= self.capacity {
            (
                std::slice::from_raw_parts_mut(self.buffer.add(start), len),
                &mut [],
            )
        } else {
            let part1 = self.capacity - start;
            (
                std::slice::from_raw_parts_mut(self.buffer.add(start), part1),
                std::slice::from_raw_parts_mut(self.buffer, len - part1),
            )
        }
    }

    /// Read the message header at `pos`, which may straddle the physical end.
    ///
    /// # Safety
    /// At least `MESSAGE_HEADER_SIZE` bytes at `pos` must be published.
    pub unsafe fn read_header(&self, pos: u64) -> MessageHeader {
        let mut raw = [0u8; MESSAGE_HEADER_SIZE];
        self.copy_out(pos, &mut raw);
        // raw is exactly MESSAGE_HEADER_SIZE bytes
        MessageHeader::from_bytes(&raw).unwrap_or_default()
    }

    /// Signal consumers that new data is available
    pub fn signal_consumers(&self) {
        let signal = &self.header().wait_word;
        signal.fetch_add(1, Release);
        futex_wake_all(signal);
    }

    /// Current value of the wait word, to be passed to `wait_for_data`.
    pub fn wait_token(&self) -> u32 {
        self.header().wait_word.load(Acquire)
    }

    /// Sleep until the wait word moves away from `seen` or `timeout` elapses.
    pub fn wait_for_data(&self, seen: u32, timeout: Option<Duration>) -> WaitOutcome {
        futex_wait(&self.header().wait_word, seen, timeout)
    }
}
