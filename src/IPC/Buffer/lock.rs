use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::time::{Duration, Instant};

use crossbeam_utils::Backoff;

use super::layout::ChannelHeader;
use crate::error::{ErrorCode, Result};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// Holds the header's cursor lock; released on drop.
///
/// The critical sections guarded by this lock are O(1) cursor updates, never payload copies.
pub(crate) struct CursorLock<'a> {
    header: &'a ChannelHeader,
}

impl<'a> CursorLock<'a> {
    /// Spin with exponential backoff until the lock is ours.
    ///
    /// Every failed attempt bumps `write_contention_count`. If the lock is still held
    /// after `timeout`, its holder is presumed dead and `ChanStale` is returned.
    pub fn acquire(header: &'a ChannelHeader, timeout: Duration) -> Result<Self> {
        let backoff = Backoff::new();
        let mut deadline: Option<Instant> = None;

        loop {
            if header
                .lock
                .compare_exchange_weak(UNLOCKED, LOCKED, Acquire, Relaxed)
                .is_ok()
            {
                return Ok(Self { header });
            }
            header.write_contention_count.fetch_add(1, Relaxed);

            if backoff.is_completed() {
                let deadline = *deadline.get_or_insert_with(|| Instant::now() + timeout);
                if Instant::now() >= deadline {
                    tracing::warn!(
                        lock = header.lock.load(Relaxed),
                        "cursor lock not released within {:?}",
                        timeout
                    );
                    return Err(ErrorCode::ChanStale);
                }
                std::thread::yield_now();
            } else {
                backoff.snooze();
            }
        }
    }

    /// Take the lock regardless of its current holder. Only for recovery.
    pub fn seize(header: &'a ChannelHeader) -> Self {
        header.lock.swap(LOCKED, Acquire);
        Self { header }
    }

    pub fn header(&self) -> &'a ChannelHeader {
        self.header
    }
}

impl Drop for CursorLock<'_> {
    fn drop(&mut self) {
        self.header.lock.store(UNLOCKED, Release);
    }
}
