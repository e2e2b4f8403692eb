use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::Core::liveness::{OsLiveness, ProcessLiveness};
use crate::error::{ErrorCode, Result};

/// Longest accepted channel name, in bytes.
pub const MAX_NAME_LEN: usize = 63;

/// What `join` does when the named segment does or does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreatePolicy {
    /// Join if the segment exists, otherwise create it.
    #[default]
    CreateOrJoin,
    /// Fail with `ChanExists` if the segment exists.
    CreateOnly,
    /// Fail with `ChanNotFound` if the segment does not exist.
    JoinOnly,
}

/// When the segment's name is removed from the namespace on `leave`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnlinkPolicy {
    /// Unlink when the owning process leaves as the last connection.
    #[default]
    OwnerLeaves,
    /// Unlink when the last connection leaves, whoever it belongs to.
    LastConnection,
    /// Never unlink; the segment outlives every handle.
    Never,
}

/// Options for joining or creating a channel.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub(crate) size: usize,
    pub(crate) create_policy: CreatePolicy,
    pub(crate) unlink_policy: UnlinkPolicy,
    pub(crate) shm_dir: PathBuf,
    pub(crate) lock_timeout: Duration,
    pub(crate) commit_timeout: Duration,
    pub(crate) init_timeout: Duration,
    pub(crate) liveness: Arc<dyn ProcessLiveness>,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            size: 4 * 1024 * 1024, // 4MB default
            create_policy: CreatePolicy::CreateOrJoin,
            unlink_policy: UnlinkPolicy::OwnerLeaves,
            shm_dir: PathBuf::from("/dev/shm"),
            lock_timeout: Duration::from_millis(100),
            commit_timeout: Duration::from_secs(1),
            init_timeout: Duration::from_secs(1),
            liveness: Arc::new(OsLiveness),
        }
    }
}

impl ChannelOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total segment size (header + buffer) used when creating.
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_create_policy(mut self, policy: CreatePolicy) -> Self {
        self.create_policy = policy;
        self
    }

    pub fn with_unlink_policy(mut self, policy: UnlinkPolicy) -> Self {
        self.unlink_policy = policy;
        self
    }

    /// Directory the channel name is resolved in.
    pub fn with_shm_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shm_dir = dir.into();
        self
    }

    /// How long to spin on the cursor lock before declaring the channel stale.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// How long a commit waits for earlier reservations to publish. After that the
    /// commit returns and its finished slot goes out with the earlier ones.
    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    /// How long a joiner waits for a concurrent creator to finish initialising.
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    pub fn with_liveness(mut self, liveness: Arc<dyn ProcessLiveness>) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn create_policy(&self) -> CreatePolicy {
        self.create_policy
    }

    pub fn unlink_policy(&self) -> UnlinkPolicy {
        self.unlink_policy
    }

    /// Where a channel called `name` lives on the filesystem.
    pub fn segment_path(&self, name: &str) -> PathBuf {
        self.shm_dir.join(name)
    }
}

/// Channel names map onto a single file name in `shm_dir`.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\0');
    if ok {
        Ok(())
    } else {
        Err(ErrorCode::InvalidArg)
    }
}
