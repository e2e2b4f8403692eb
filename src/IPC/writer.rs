// Reserving, filling and publishing slots.

use std::ptr;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use std::time::Instant;

use crossbeam_utils::Backoff;

use super::lifecycle::Channel;
use crate::Core::liveness::current_pid;
use crate::error::{ErrorCode, Result};
use crate::IPC::Buffer::layout::{align_slot, SLOT_ALIGN};
use crate::IPC::Buffer::lock::CursorLock;
use crate::IPC::Buffer::RingBuffer;
use crate::IPC::Structs::{
    MessageHeader, Timestamp, MESSAGE_HEADER_SIZE, MESSAGE_MAGIC, RESERVED_MAGIC, SKIP_MAGIC,
};

/// A reservation obtained from `Channel::begin_write`.
///
/// Dropping a transaction without committing it aborts the reservation.
pub struct Transaction<'a> {
    pub(crate) channel: &'a Channel,
    pub(crate) start: u64,
    pub(crate) footprint: usize,
    pub(crate) epoch: u64,
    finished: bool,
}

impl<'a> Transaction<'a> {
    /// Logical ring offset of the reserved slot.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Bytes reserved in the ring, header and padding included.
    pub fn reserved_len(&self) -> usize {
        self.footprint
    }

    /// Largest payload this reservation can carry.
    pub fn payload_capacity(&self) -> usize {
        self.footprint - MESSAGE_HEADER_SIZE
    }

    /// The reserved payload area, in one piece or two if it wraps the physical end.
    pub fn payload_mut(&mut self) -> (&mut [u8], &mut [u8]) {
        let pos = self.start + MESSAGE_HEADER_SIZE as u64;
        // Safety: [start, start + footprint) belongs to this reservation until it finishes
        unsafe { self.channel.ring.parts_mut(pos, self.payload_capacity()) }
    }

    /// Copy `segments` into the reservation and publish it.
    ///
    /// If the segments do not fit the reservation the transaction is aborted and
    /// `InvalidArg` is returned.
    pub fn commit(mut self, msg_type: u16, segments: &[&[u8]]) -> Result<()> {
        let payload_len: usize = segments.iter().map(|s| s.len()).sum();
        if payload_len > self.payload_capacity() || segments.len() > u16::MAX as usize {
            return Err(ErrorCode::InvalidArg);
        }
        self.check_epoch()?;

        let ring = &self.channel.ring;
        let mut pos = self.start + MESSAGE_HEADER_SIZE as u64;
        for segment in segments {
            // Safety: within our reservation, checked above
            unsafe { ring.copy_in(pos, segment) };
            pos += segment.len() as u64;
        }
        self.finish(msg_type, payload_len, segments.len() as u16)
    }

    /// Publish `len` bytes already written through `payload_mut`.
    pub fn commit_in_place(mut self, msg_type: u16, len: usize) -> Result<()> {
        if len > self.payload_capacity() {
            return Err(ErrorCode::InvalidArg);
        }
        self.check_epoch()?;
        self.finish(msg_type, len, 0)
    }

    /// A recovery since `begin_write` may have handed our region to someone else.
    fn check_epoch(&self) -> Result<()> {
        let current = self
            .channel
            .header()
            .channel_recovered_count
            .load(Acquire);
        if current == self.epoch {
            Ok(())
        } else {
            Err(ErrorCode::ChanStale)
        }
    }

    /// Give the reservation back without publishing a message.
    pub fn abort(mut self) -> Result<()> {
        self.finished = true;
        let res = self
            .channel
            .abort_reservation(self.start, self.footprint, self.epoch);
        self.channel.tx_open.store(false, Release);
        res
    }

    fn finish(&mut self, msg_type: u16, payload_len: usize, iov_count: u16) -> Result<()> {
        self.finished = true;
        let slot = MessageHeader {
            magic: MESSAGE_MAGIC,
            total_len: self.footprint as u32,
            payload_len: payload_len as u32,
            msg_type,
            iov_count,
            sender_pid: current_pid(),
            timestamp: Timestamp::now(),
        };
        let channel = self.channel;
        let res = channel.publish(self.start, self.footprint, self.epoch, &slot);
        channel.tx_open.store(false, Release);
        res
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let res = self
            .channel
            .abort_reservation(self.start, self.footprint, self.epoch);
        self.channel.tx_open.store(false, Release);
        if let Err(e) = res {
            tracing::warn!(start = self.start, "abort of dropped transaction failed: {}", e);
        }
    }
}

impl Channel {
    /// Publish one message in a single step.
    pub fn write(&self, msg_type: u16, payload: &[u8]) -> Result<()> {
        self.writev(msg_type, &[payload])
    }

    /// Publish the concatenation of `segments` as one message.
    pub fn writev(&self, msg_type: u16, segments: &[&[u8]]) -> Result<()> {
        self.record(self.writev_inner(msg_type, segments))
    }

    fn writev_inner(&self, msg_type: u16, segments: &[&[u8]]) -> Result<()> {
        if segments.len() > u16::MAX as usize {
            return Err(ErrorCode::InvalidArg);
        }
        // A single-shot write would queue behind our own open transaction
        if self.tx_open.load(Acquire) {
            return Err(ErrorCode::TxInProgress);
        }

        let payload_len: usize = segments.iter().map(|s| s.len()).sum();
        let footprint = self.footprint_for(payload_len)?;
        let (start, epoch) = self.reserve(footprint)?;

        let mut pos = start + MESSAGE_HEADER_SIZE as u64;
        for segment in segments {
            // Safety: the payload area of our reservation
            unsafe { self.ring.copy_in(pos, segment) };
            pos += segment.len() as u64;
        }

        let slot = MessageHeader {
            magic: MESSAGE_MAGIC,
            total_len: footprint as u32,
            payload_len: payload_len as u32,
            msg_type,
            iov_count: segments.len() as u16,
            sender_pid: current_pid(),
            timestamp: Timestamp::now(),
        };
        self.publish(start, footprint, epoch, &slot)
    }

    /// Reserve room for a payload of up to `payload_size` bytes.
    ///
    /// Only one transaction may be open per handle; a second returns `TxInProgress`.
    pub fn begin_write(&self, payload_size: usize) -> Result<Transaction<'_>> {
        if self
            .tx_open
            .compare_exchange(false, true, AcqRel, Acquire)
            .is_err()
        {
            return self.record(Err(ErrorCode::TxInProgress));
        }

        let reserved = self
            .footprint_for(payload_size)
            .and_then(|footprint| self.reserve(footprint).map(|r| (footprint, r)));
        match reserved {
            Ok((footprint, (start, epoch))) => self.record(Ok(Transaction {
                channel: self,
                start,
                footprint,
                epoch,
                finished: false,
            })),
            Err(e) => {
                self.tx_open.store(false, Release);
                self.record(Err(e))
            }
        }
    }

    /// Commit a transaction opened on this handle with the given payload segments.
    pub fn commit_write(&self, tx: Transaction<'_>, msg_type: u16, segments: &[&[u8]]) -> Result<()> {
        if !ptr::eq(tx.channel, self) {
            return self.record(Err(ErrorCode::InvalidArg));
        }
        self.record(tx.commit(msg_type, segments))
    }

    /// Abort a transaction opened on this handle.
    pub fn abort_write(&self, tx: Transaction<'_>) -> Result<()> {
        if !ptr::eq(tx.channel, self) {
            return self.record(Err(ErrorCode::InvalidArg));
        }
        self.record(tx.abort())
    }

    /// Slot footprint for `payload_len`, or `MsgTooLarge` if no slot could hold it.
    fn footprint_for(&self, payload_len: usize) -> Result<usize> {
        let capacity = self.ring.capacity();
        let too_large = payload_len > capacity.saturating_sub(MESSAGE_HEADER_SIZE)
            || align_slot(MESSAGE_HEADER_SIZE + payload_len) > capacity
            || align_slot(MESSAGE_HEADER_SIZE + payload_len) > u32::MAX as usize;
        if too_large {
            return Err(ErrorCode::MsgTooLarge);
        }
        Ok(align_slot(MESSAGE_HEADER_SIZE + payload_len))
    }

    /// Advance `tx_head` by `footprint`, returning the slot start and recovery epoch.
    ///
    /// The slot gets a placeholder header so the publisher sweep stops in front of it.
    fn reserve(&self, footprint: usize) -> Result<(u64, u64)> {
        let header = self.header();
        let _guard = CursorLock::acquire(header, self.options.lock_timeout)?;

        let head = header.head.load(Acquire);
        let tx_head = header.tx_head.load(Relaxed);
        let used = RingBuffer::distance(head, tx_head);
        if used > self.ring.capacity() as u64 {
            tracing::warn!(head, tx_head, "reservation frontier overran the ring");
            return Err(ErrorCode::Corrupt);
        }
        if footprint as u64 > self.ring.capacity() as u64 - used {
            return Err(ErrorCode::BufferFull);
        }

        // Safety: [tx_head, tx_head + footprint) is free space and now ours
        unsafe {
            self.ring
                .copy_in(tx_head, MessageHeader::reserved(footprint).as_bytes())
        };
        header.tx_head.store(tx_head.wrapping_add(footprint as u64), Release);
        let epoch = header.channel_recovered_count.load(Acquire);
        Ok((tx_head, epoch))
    }

    /// Mark our slot finished, publish every finished slot at `tail`, then wait for
    /// `tail` to pass ours.
    ///
    /// Slots become visible strictly in reservation order. If an earlier reservation
    /// is still open when `commit_timeout` runs out, the call returns `Ok` anyway: the
    /// slot is finished and goes out with the sweep that publishes its predecessor.
    pub(crate) fn publish(
        &self,
        start: u64,
        footprint: usize,
        epoch: u64,
        slot: &MessageHeader,
    ) -> Result<()> {
        let header = self.header();
        let moved = {
            let guard = CursorLock::acquire(header, self.options.lock_timeout)?;
            if header.channel_recovered_count.load(Acquire) != epoch {
                return Err(ErrorCode::ChanStale);
            }
            // Safety: the header area of our own reservation
            unsafe { self.ring.copy_in(start, slot.as_bytes()) };
            self.publish_finished(&guard)?
        };
        if moved {
            self.ring.signal_consumers();
        }
        self.await_publication(start, footprint)
    }

    /// Advance `tail` over every consecutive finished slot. Returns whether it moved.
    ///
    /// Message counters are bumped here, by whichever process does the sweep.
    pub(crate) fn publish_finished(&self, guard: &CursorLock<'_>) -> Result<bool> {
        let header = guard.header();
        let tx_head = header.tx_head.load(Relaxed);
        let old_tail = header.tail.load(Relaxed);
        let mut tail = old_tail;
        let mut damaged = false;

        while tail != tx_head {
            // Safety: every slot in [tail, tx_head) starts with a header written under the lock
            let slot = unsafe { self.ring.read_header(tail) };
            let total = slot.total_len as u64;
            if slot.magic == RESERVED_MAGIC {
                break;
            }
            let sane = slot.is_finished()
                && total >= MESSAGE_HEADER_SIZE as u64
                && total % SLOT_ALIGN as u64 == 0
                && total <= RingBuffer::distance(tail, tx_head);
            if !sane {
                tracing::warn!(
                    tail,
                    tx_head,
                    magic = slot.magic,
                    total_len = slot.total_len,
                    "damaged header among pending reservations"
                );
                damaged = true;
                break;
            }
            if slot.magic == MESSAGE_MAGIC {
                header.messages_written.fetch_add(1, Relaxed);
                header
                    .bytes_written
                    .fetch_add(slot.payload_len as u64, Relaxed);
            }
            tail = tail.wrapping_add(total);
        }

        if tail != old_tail {
            header.tail.store(tail, Release);
        }
        if damaged {
            return Err(ErrorCode::Corrupt);
        }
        Ok(tail != old_tail)
    }

    /// Spin until `tail` covers `[start, start + footprint)`, for at most `commit_timeout`.
    fn await_publication(&self, start: u64, footprint: usize) -> Result<()> {
        let header = self.header();
        let backoff = Backoff::new();
        let mut deadline: Option<Instant> = None;

        loop {
            let passed = header.tail.load(Acquire).wrapping_sub(start) as i64;
            if passed >= footprint as i64 {
                return Ok(());
            }
            if backoff.is_completed() {
                let deadline =
                    *deadline.get_or_insert_with(|| Instant::now() + self.options.commit_timeout);
                if Instant::now() >= deadline {
                    tracing::debug!(
                        start,
                        tail = header.tail.load(Relaxed),
                        "earlier reservation still open, publication handed over"
                    );
                    return Ok(());
                }
                std::thread::yield_now();
            } else {
                backoff.snooze();
            }
        }
    }

    /// Return an unpublished reservation to the ring.
    ///
    /// The most recent reservation is rolled back in place. Anything older is turned
    /// into a skip record so later reservations can still publish in order.
    pub(crate) fn abort_reservation(&self, start: u64, footprint: usize, epoch: u64) -> Result<()> {
        let header = self.header();
        let moved = {
            let guard = CursorLock::acquire(header, self.options.lock_timeout)?;
            if header.channel_recovered_count.load(Acquire) != epoch {
                // Recovery already discarded it
                return Ok(());
            }
            if header.tx_head.load(Relaxed) == start.wrapping_add(footprint as u64) {
                header.tx_head.store(start, Release);
                tracing::debug!(start, footprint, "rolled back reservation");
                return Ok(());
            }

            let skip = MessageHeader {
                magic: SKIP_MAGIC,
                total_len: footprint as u32,
                sender_pid: current_pid(),
                timestamp: Timestamp::now(),
                ..Default::default()
            };
            // Safety: the header area of our own reservation
            unsafe { self.ring.copy_in(start, skip.as_bytes()) };
            tracing::debug!(start, footprint, "aborted reservation left as a skip record");
            self.publish_finished(&guard)?
        };
        if moved {
            self.ring.signal_consumers();
        }
        Ok(())
    }
}
