// Reading, peeking and releasing published messages.

use std::ptr;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::time::{Duration, Instant};

use super::lifecycle::Channel;
use crate::error::{ErrorCode, Result};
use crate::IPC::Buffer::layout::SLOT_ALIGN;
use crate::IPC::Buffer::lock::CursorLock;
use crate::IPC::Buffer::RingBuffer;
use crate::IPC::Structs::{MessageHeader, Timestamp, MESSAGE_HEADER_SIZE, MESSAGE_MAGIC};

/// Where a message's bytes live.
pub enum MessageBody<'a> {
    /// Directly in the shared ring; valid until the message is released.
    Borrowed(&'a [u8]),
    /// A private copy, made when the slot wraps the physical end of the buffer.
    Owned(Vec<u8>),
}

/// A message at the head of a channel, not yet consumed.
///
/// The bytes stay valid for as long as the `Message` lives. Dropping it without
/// calling `Channel::release` leaves it at the head for the next reader.
pub struct Message<'a> {
    pub(crate) channel: &'a Channel,
    pub(crate) start: u64,
    pub(crate) header: MessageHeader,
    pub(crate) body: MessageBody<'a>,
}

impl<'a> Message<'a> {
    pub fn payload(&self) -> &[u8] {
        let bytes = match &self.body {
            MessageBody::Borrowed(slice) => slice,
            MessageBody::Owned(vec) => vec.as_slice(),
        };
        &bytes[MESSAGE_HEADER_SIZE..]
    }

    pub fn msg_type(&self) -> u16 {
        self.header.msg_type
    }

    pub fn sender_pid(&self) -> i32 {
        self.header.sender_pid
    }

    pub fn timestamp(&self) -> Timestamp {
        self.header.timestamp
    }

    /// Number of segments the writer supplied (0 for in-place commits).
    pub fn iov_count(&self) -> u16 {
        self.header.iov_count
    }

    /// Slot footprint, header and padding included.
    pub fn total_len(&self) -> usize {
        self.header.total_len as usize
    }

    /// Logical ring offset of the slot.
    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn is_owned(&self) -> bool {
        matches!(self.body, MessageBody::Owned(_))
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }
}

impl Channel {
    /// Wait for the next message.
    ///
    /// `None` waits indefinitely; `Some(Duration::ZERO)` behaves like `peek`.
    /// Returns `TimedOut` when the deadline passes or `interrupt` is called.
    pub fn read(&self, timeout: Option<Duration>) -> Result<Message<'_>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let interrupts = self.interrupt_epoch.load(Acquire);

        loop {
            let seen = self.ring.wait_token();
            match self.next_message() {
                Err(ErrorCode::TimedOut) => {}
                other => return self.record(other),
            }

            if self.interrupt_epoch.load(Acquire) != interrupts {
                return self.record(Err(ErrorCode::TimedOut));
            }
            let remaining = match deadline {
                None => None,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return self.record(Err(ErrorCode::TimedOut));
                    }
                    Some(deadline - now)
                }
            };
            self.ring.wait_for_data(seen, remaining);
        }
    }

    /// The head message, or `TimedOut` if none is published.
    pub fn peek(&self) -> Result<Message<'_>> {
        self.record(self.next_message())
    }

    /// Consume `msg`, freeing its slot for writers.
    ///
    /// Fails with `InvalidArg` if the message belongs to another handle or another
    /// reader has already consumed it.
    pub fn release(&self, msg: Message<'_>) -> Result<()> {
        if !ptr::eq(msg.channel, self) {
            return self.record(Err(ErrorCode::InvalidArg));
        }

        let header = self.header();
        let guard = match CursorLock::acquire(header, self.options.lock_timeout) {
            Ok(guard) => guard,
            Err(e) => return self.record(Err(e)),
        };
        if header.head.load(Acquire) != msg.start {
            drop(guard);
            tracing::debug!(start = msg.start, "message already consumed by another reader");
            return self.record(Err(ErrorCode::InvalidArg));
        }
        header
            .head
            .store(msg.start.wrapping_add(msg.total_len() as u64), Release);
        header.messages_read.fetch_add(1, Relaxed);
        header
            .bytes_read
            .fetch_add(msg.header.payload_len as u64, Relaxed);
        drop(guard);

        drop(msg);
        self.record(Ok(()))
    }

    /// Locate the first deliverable message at `head`, stepping over skip records.
    fn next_message(&self) -> Result<Message<'_>> {
        let header = self.header();
        loop {
            let head = header.head.load(Acquire);
            let tail = header.tail.load(Acquire);
            let available = RingBuffer::distance(head, tail);
            if available == 0 {
                return Err(ErrorCode::TimedOut);
            }
            if available < MESSAGE_HEADER_SIZE as u64 {
                tracing::warn!(head, tail, "committed region shorter than a message header");
                return Err(ErrorCode::Corrupt);
            }

            // Safety: at least a header's worth of bytes is published at head
            let slot = unsafe { self.ring.read_header(head) };
            validate_slot(&slot, available, head)?;

            if slot.is_skip() {
                self.step_over(head, &slot)?;
                continue;
            }

            let len = MESSAGE_HEADER_SIZE + slot.payload_len as usize;
            let body = if self.ring.is_contiguous(head, len) {
                // Safety: published and not released; the Message borrows the channel
                MessageBody::Borrowed(unsafe { self.ring.slice(head, len) })
            } else {
                let mut copy = Vec::new();
                copy.try_reserve_exact(len).map_err(|_| ErrorCode::NoMem)?;
                copy.resize(len, 0);
                unsafe { self.ring.copy_out(head, &mut copy) };
                MessageBody::Owned(copy)
            };

            return Ok(Message {
                channel: self,
                start: head,
                header: slot,
                body,
            });
        }
    }

    /// Advance past a skip record if nobody else has yet.
    fn step_over(&self, head: u64, slot: &MessageHeader) -> Result<()> {
        let header = self.header();
        let _guard = CursorLock::acquire(header, self.options.lock_timeout)?;
        if header.head.load(Acquire) == head {
            header
                .head
                .store(head.wrapping_add(slot.total_len as u64), Release);
            tracing::debug!(head, len = slot.total_len, "stepped over aborted reservation");
        }
        Ok(())
    }
}

fn validate_slot(slot: &MessageHeader, available: u64, head: u64) -> Result<()> {
    let total = slot.total_len as usize;
    let sane = (slot.magic == MESSAGE_MAGIC || slot.is_skip())
        && total >= MESSAGE_HEADER_SIZE
        && total % SLOT_ALIGN == 0
        && total as u64 <= available
        && slot.payload_len as usize <= total - MESSAGE_HEADER_SIZE;
    if sane {
        Ok(())
    } else {
        tracing::warn!(
            head,
            magic = slot.magic,
            total_len = slot.total_len,
            payload_len = slot.payload_len,
            "corrupt slot at head"
        );
        Err(ErrorCode::Corrupt)
    }
}
