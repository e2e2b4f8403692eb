use std::path::Path;
use std::sync::atomic::Ordering;

use super::lifecycle::Channel;
use super::options::ChannelOptions;
use crate::Core::liveness::current_pid;
use crate::Core::SharedMemory::RawHandle;
use crate::IPC::Buffer::ChannelHeader;

/// Accessors for inspecting a handle, mostly for monitoring and tests.
impl Channel {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Filesystem path of the backing segment.
    pub fn path(&self) -> &Path {
        self.shm.path()
    }

    /// Usable ring size in bytes.
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Size of the whole mapped segment.
    pub fn segment_size(&self) -> usize {
        self.shm.size()
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    /// The shared control block.
    ///
    /// Writing through the atomics bypasses every channel invariant; it exists so
    /// diagnostics and fault-injection tests can inspect or wedge a channel.
    pub fn header(&self) -> &ChannelHeader {
        self.ring.header()
    }

    pub fn raw_handle(&self) -> RawHandle {
        self.shm.raw_handle()
    }

    /// True if this process is recorded as the channel's owner.
    pub fn is_owner(&self) -> bool {
        self.header().owner_pid.load(Ordering::Acquire) == current_pid()
    }

    /// True while a `Transaction` from this handle is open.
    pub fn has_open_transaction(&self) -> bool {
        self.tx_open.load(Ordering::Acquire)
    }
}
