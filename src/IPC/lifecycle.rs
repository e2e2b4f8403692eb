// Joining, leaving and recovering a named channel.

use std::io;
use std::os::fd::RawFd;
use std::ptr;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::options::{validate_name, ChannelOptions, CreatePolicy, UnlinkPolicy};
use crate::Core::liveness::current_pid;
use crate::Core::notify::{Notifier, WatchedWords};
use crate::Core::SharedMemory::{
    attach_shared_memory, create_shared_memory, unlink_shared_memory, SharedMemoryBackend,
};
use crate::error::{ErrorCode, Result};
use crate::IPC::Buffer::layout::{
    capacity_for, ChannelHeader, CHANNEL_HEADER_SIZE, CHANNEL_MAGIC, MIN_SEGMENT_SIZE, SLOT_ALIGN,
};
use crate::IPC::Buffer::lock::CursorLock;
use crate::IPC::Buffer::RingBuffer;
use crate::IPC::Structs::{MessageHeader, MESSAGE_HEADER_SIZE, RESERVED_MAGIC, SKIP_MAGIC};

/// How often a joiner re-checks a segment that is still being initialised.
const INIT_POLL: Duration = Duration::from_millis(1);

/// Observable state of an attached handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Attached,
    /// The recorded owner process is gone; call `recover` before relying on the channel.
    Stale,
}

/// A process-local handle onto a named shared-memory channel.
///
/// Handles are `Send + Sync`: several threads may read and write through one handle,
/// but at most one two-phase transaction may be open on it at a time.
pub struct Channel {
    pub(crate) ring: RingBuffer,
    pub(crate) options: ChannelOptions,
    pub(crate) name: String,
    pub(crate) last_error: AtomicI32,
    pub(crate) tx_open: AtomicBool,
    pub(crate) interrupt_epoch: AtomicU64,
    pub(crate) notifier: Mutex<Option<Notifier>>,
    detached: bool,
    // Declared last so the mapping outlives everything that points into it.
    pub(crate) shm: Box<dyn SharedMemoryBackend>,
}

impl Channel {
    /// Join or create the channel called `name`, according to `options.create_policy`.
    ///
    /// Joining a channel whose owner process is dead succeeds, but records `ChanStale`
    /// as the handle's last error.
    pub fn join(name: &str, options: ChannelOptions) -> Result<Self> {
        validate_name(name)?;

        match options.create_policy {
            CreatePolicy::JoinOnly => Self::attach(name, options),
            CreatePolicy::CreateOnly => Self::create(name, options),
            CreatePolicy::CreateOrJoin => match Self::attach(name, options.clone()) {
                Err(ErrorCode::ChanNotFound) => match Self::create(name, options.clone()) {
                    // Lost a creation race; the winner's segment is there now
                    Err(ErrorCode::ChanExists) => Self::attach(name, options),
                    other => other,
                },
                other => other,
            },
        }
    }

    fn create(name: &str, options: ChannelOptions) -> Result<Self> {
        if options.size < MIN_SEGMENT_SIZE {
            return Err(ErrorCode::InvalidArg);
        }

        let path = options.segment_path(name);
        let shm = create_shared_memory(&path, options.size).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                ErrorCode::ChanExists
            } else {
                tracing::warn!(path = %path.display(), "failed to create segment: {}", e);
                ErrorCode::ShmMapFailed
            }
        })?;

        // The kernel hands us zeroed pages; fill in the write-once fields, then publish.
        unsafe { init_header(shm.as_ptr(), shm.size(), current_pid()) };
        let ring = unsafe { RingBuffer::new(shm.as_ptr()) };

        tracing::debug!(
            name,
            size = shm.size(),
            capacity = ring.capacity(),
            "created channel"
        );
        Ok(Self::from_parts(name, options, shm, ring))
    }

    fn attach(name: &str, options: ChannelOptions) -> Result<Self> {
        let path = options.segment_path(name);
        let deadline = Instant::now() + options.init_timeout;

        let shm = loop {
            match attach_shared_memory(&path, CHANNEL_HEADER_SIZE) {
                Ok(shm) => break shm,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(ErrorCode::ChanNotFound)
                }
                // The creator has not sized the file yet
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    if Instant::now() >= deadline {
                        tracing::warn!(name, "segment never reached header size");
                        return Err(ErrorCode::BadMagic);
                    }
                    std::thread::sleep(INIT_POLL);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), "failed to map segment: {}", e);
                    return Err(ErrorCode::ShmMapFailed);
                }
            }
        };

        let header = unsafe { &*(shm.as_ptr() as *const ChannelHeader) };
        loop {
            match header.magic.load(Acquire) {
                CHANNEL_MAGIC => break,
                0 if Instant::now() < deadline => std::thread::sleep(INIT_POLL),
                other => {
                    tracing::warn!(name, magic = other, "segment is not a channel");
                    return Err(ErrorCode::BadMagic);
                }
            }
        }

        if header.total_shm_size < MIN_SEGMENT_SIZE
            || header.total_shm_size != shm.size()
            || header.buffer_capacity != capacity_for(header.total_shm_size)
        {
            tracing::warn!(
                name,
                recorded = header.total_shm_size,
                mapped = shm.size(),
                "channel header disagrees with segment size"
            );
            return Err(ErrorCode::Corrupt);
        }

        header.active_connections.fetch_add(1, AcqRel);
        let ring = unsafe { RingBuffer::new(shm.as_ptr()) };
        let channel = Self::from_parts(name, options, shm, ring);

        if channel.is_stale() {
            tracing::warn!(
                name,
                owner_pid = channel.header().owner_pid.load(Relaxed),
                "joined a channel whose owner is gone"
            );
            channel.set_last_error(Some(ErrorCode::ChanStale));
        } else {
            tracing::debug!(name, "joined channel");
        }
        Ok(channel)
    }

    fn from_parts(
        name: &str,
        options: ChannelOptions,
        shm: Box<dyn SharedMemoryBackend>,
        ring: RingBuffer,
    ) -> Self {
        Self {
            ring,
            options,
            name: name.to_owned(),
            last_error: AtomicI32::new(0),
            tx_open: AtomicBool::new(false),
            interrupt_epoch: AtomicU64::new(0),
            notifier: Mutex::new(None),
            detached: false,
            shm,
        }
    }

    /// Detach this handle. The segment is unlinked according to the unlink policy
    /// once no connections remain.
    pub fn leave(mut self) -> Result<()> {
        self.detach()
    }

    fn detach(&mut self) -> Result<()> {
        if self.detached {
            return Ok(());
        }
        self.detached = true;

        // Stop the readiness thread before anything else touches the mapping.
        self.notifier.get_mut().take();

        let header = self.ring.header();
        let remaining = match header
            .active_connections
            .fetch_update(AcqRel, Acquire, |n| n.checked_sub(1))
        {
            Ok(prev) => prev - 1,
            Err(_) => {
                tracing::warn!(name = %self.name, "active connection count already zero");
                0
            }
        };

        let unlink = remaining == 0
            && match self.options.unlink_policy {
                UnlinkPolicy::OwnerLeaves => self.is_owner(),
                UnlinkPolicy::LastConnection => true,
                UnlinkPolicy::Never => false,
            };

        tracing::debug!(name = %self.name, remaining, unlink, "leaving channel");

        if unlink {
            match unlink_shared_memory(self.shm.path()) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %self.shm.path().display(), "failed to unlink segment: {}", e);
                    return Err(ErrorCode::IoctlFailed);
                }
            }
        }
        Ok(())
    }

    /// True if the process recorded as owner is no longer alive.
    pub fn is_stale(&self) -> bool {
        let owner = self.header().owner_pid.load(Acquire);
        !self.options.liveness.is_alive(owner)
    }

    pub fn state(&self) -> ChannelState {
        if self.is_stale() {
            ChannelState::Stale
        } else {
            ChannelState::Attached
        }
    }

    /// Take over a channel whose owner died, discarding its unpublished reservations.
    ///
    /// Fails with `InvalidArg` while the owner is still alive.
    pub fn recover(&self) -> Result<()> {
        if !self.is_stale() {
            return self.record(Err(ErrorCode::InvalidArg));
        }
        self.force_recover()
    }

    /// Recover without checking the owner, e.g. when a dead non-owner wedged the lock.
    ///
    /// Committed data in `[head, tail)` is never touched. Reservations still being
    /// written become skip records; slots already finished behind them are published.
    /// If the previous owner is dead, its connection is dropped from the count.
    pub fn force_recover(&self) -> Result<()> {
        let header = self.header();
        let me = current_pid();
        let guard = CursorLock::seize(header);

        let previous_owner = header.owner_pid.load(Acquire);
        let tail = header.tail.load(Acquire);
        let discarded = self.retire_open_reservations(header, tail);
        header.owner_pid.store(me, Release);
        let epoch = header.channel_recovered_count.fetch_add(1, AcqRel) + 1;
        let swept = self.publish_finished(&guard);
        drop(guard);

        if previous_owner != me && !self.options.liveness.is_alive(previous_owner) {
            // The dead owner never detached; its connection would keep the segment alive forever.
            let _ = header
                .active_connections
                .fetch_update(AcqRel, Acquire, |n| n.checked_sub(1));
        }

        // Wake readers for whatever was published, and writers waiting on the frontier.
        self.ring.signal_consumers();

        tracing::warn!(
            name = %self.name,
            discarded,
            previous_owner,
            epoch,
            "recovered channel"
        );
        self.record(swept.map(|_| ()))
    }

    /// Turn every unfinished reservation in `[tail, tx_head)` into a skip record.
    ///
    /// Returns the number of bytes discarded. A slot that cannot be walked ends the
    /// pending region: `tx_head` is pulled back to it. Caller holds the cursor lock.
    fn retire_open_reservations(&self, header: &ChannelHeader, tail: u64) -> u64 {
        let tx_head = header.tx_head.load(Acquire);
        let mut pos = tail;
        let mut discarded = 0;

        while pos != tx_head {
            // Safety: [tail, tx_head) is reserved space whose slot headers are written under the lock
            let slot = unsafe { self.ring.read_header(pos) };
            let total = slot.total_len as u64;
            let walkable = (slot.magic == RESERVED_MAGIC || slot.is_finished())
                && total >= MESSAGE_HEADER_SIZE as u64
                && total % SLOT_ALIGN as u64 == 0
                && total <= RingBuffer::distance(pos, tx_head);
            if !walkable {
                discarded += RingBuffer::distance(pos, tx_head);
                header.tx_head.store(pos, Release);
                break;
            }
            if slot.magic == RESERVED_MAGIC {
                let skip = MessageHeader {
                    magic: SKIP_MAGIC,
                    total_len: slot.total_len,
                    ..Default::default()
                };
                // Safety: the header area of a reservation whose writer lost it with this recovery
                unsafe { self.ring.copy_in(pos, skip.as_bytes()) };
                discarded += total;
            }
            pos = pos.wrapping_add(total);
        }
        discarded
    }

    /// A descriptor that polls readable when messages have been published.
    ///
    /// Call `acknowledge_fd` after waking, then drain with `peek`/`read` until `TimedOut`.
    pub fn get_fd(&self) -> Result<RawFd> {
        let mut slot = self.notifier.lock();
        if let Some(notifier) = slot.as_ref() {
            return self.record(Ok(notifier.raw_fd()));
        }

        let header = self.header();
        let words = WatchedWords {
            wait_word: ptr::addr_of!(header.wait_word),
            head: ptr::addr_of!(header.head),
            tail: ptr::addr_of!(header.tail),
        };
        match Notifier::spawn(words) {
            Ok(notifier) => {
                let fd = notifier.raw_fd();
                *slot = Some(notifier);
                self.record(Ok(fd))
            }
            Err(e) => {
                tracing::warn!(name = %self.name, "failed to create readiness descriptor: {}", e);
                self.record(Err(ErrorCode::IoctlFailed))
            }
        }
    }

    /// Clear the readiness descriptor returned by `get_fd`.
    pub fn acknowledge_fd(&self) {
        if let Some(notifier) = self.notifier.lock().as_ref() {
            notifier.acknowledge();
        }
    }

    /// Make every `read` currently blocked on this handle return `TimedOut`.
    pub fn interrupt(&self) {
        self.interrupt_epoch.fetch_add(1, AcqRel);
        self.ring.signal_consumers();
    }

    /// The failure recorded by the most recent operation on this handle, if any.
    pub fn last_error(&self) -> Option<ErrorCode> {
        ErrorCode::from_i32(self.last_error.load(Relaxed))
    }

    pub(crate) fn set_last_error(&self, err: Option<ErrorCode>) {
        self.last_error
            .store(err.map_or(0, ErrorCode::as_i32), Relaxed);
    }

    /// Store the outcome of an operation as this handle's last error and pass it on.
    pub(crate) fn record<T>(&self, result: Result<T>) -> Result<T> {
        self.set_last_error(result.as_ref().err().copied());
        result
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Err(e) = self.detach() {
            tracing::warn!(name = %self.name, "detach on drop failed: {}", e);
        }
    }
}

/// Initialise the header of a freshly created, zero-filled segment.
///
/// # Safety
/// `base` must point to at least `size` writable bytes that no other process
/// treats as initialised yet (magic is still zero).
unsafe fn init_header(base: *mut u8, size: usize, owner: i32) {
    let header = base as *mut ChannelHeader;
    ptr::addr_of_mut!((*header).total_shm_size).write(size);
    ptr::addr_of_mut!((*header).buffer_capacity).write(capacity_for(size));

    let header = &*header;
    header.owner_pid.store(owner, Relaxed);
    header.active_connections.store(1, Relaxed);
    // Publishing the magic makes every field above visible to joiners.
    header.magic.store(CHANNEL_MAGIC, Release);
}
