//! Readiness descriptor for composing a channel with other I/O sources.
//!
//! A channel's "data available" condition lives in a futex word, which `poll`/`epoll`
//! cannot watch. The notifier bridges the two: a helper thread sleeps on the wait word
//! and bumps an `eventfd` whenever the committed cursor has moved. The descriptor stays
//! readable until [`Notifier::acknowledge`] drains it.
//!
//! ```ignore
//! let fd = channel.get_fd()?;
//! // poll(fd, POLLIN) ...
//! channel.acknowledge_fd();
//! while let Ok(msg) = channel.peek() { /* ... */ channel.release(msg)?; }
//! ```

use std::io::{self, ErrorKind};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::futex::{futex_wait, futex_wake_all};

/// How long the helper sleeps between stop-flag checks when nothing happens.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// The shared words the helper thread watches.
///
/// The pointers target the channel header, which the owning `Channel` keeps mapped
/// until after the notifier has been dropped (and its thread joined).
#[derive(Clone, Copy)]
pub(crate) struct WatchedWords {
    pub wait_word: *const AtomicU32,
    pub head: *const AtomicU64,
    pub tail: *const AtomicU64,
}

unsafe impl Send for WatchedWords {}

pub(crate) struct Notifier {
    event_fd: Arc<OwnedFd>,
    stop: Arc<AtomicBool>,
    wait_word: *const AtomicU32,
    thread: Option<JoinHandle<()>>,
}

unsafe impl Send for Notifier {}
unsafe impl Sync for Notifier {}

impl Notifier {
    pub fn spawn(words: WatchedWords) -> io::Result<Self> {
        let event_fd = Arc::new(create_eventfd()?);
        let stop = Arc::new(AtomicBool::new(false));

        let thread = {
            let event_fd = event_fd.clone();
            let stop = stop.clone();
            std::thread::Builder::new()
                .name("dmxp-notify".into())
                .spawn(move || watch(words, &event_fd, &stop))?
        };

        Ok(Self {
            event_fd,
            stop,
            wait_word: words.wait_word,
            thread: Some(thread),
        })
    }

    pub fn raw_fd(&self) -> RawFd {
        self.event_fd.as_raw_fd()
    }

    /// Drain pending notifications so the descriptor stops polling readable.
    pub fn acknowledge(&self) {
        let mut buf = 0u64;
        let ret = unsafe {
            libc::read(
                self.event_fd.as_raw_fd(),
                &mut buf as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != ErrorKind::WouldBlock {
                tracing::warn!("eventfd drain failed: {}", err);
            }
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        // A spurious wake for other waiters is harmless; they re-check their predicate.
        unsafe { futex_wake_all(&*self.wait_word) };
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn watch(words: WatchedWords, event_fd: &OwnedFd, stop: &AtomicBool) {
    let (wait_word, head, tail) = unsafe { (&*words.wait_word, &*words.head, &*words.tail) };

    let mut last_tail = tail.load(Ordering::Acquire);
    if last_tail != head.load(Ordering::Acquire) {
        signal(event_fd);
    }

    while !stop.load(Ordering::Acquire) {
        let seen = wait_word.load(Ordering::Acquire);
        let current = tail.load(Ordering::Acquire);
        if current != last_tail {
            last_tail = current;
            signal(event_fd);
        }
        futex_wait(wait_word, seen, Some(IDLE_WAIT));
    }
}

fn signal(event_fd: &OwnedFd) {
    let one = 1u64;
    let ret = unsafe {
        libc::write(
            event_fd.as_raw_fd(),
            &one as *const u64 as *const libc::c_void,
            std::mem::size_of::<u64>(),
        )
    };
    if ret < 0 {
        let err = io::Error::last_os_error();
        // EAGAIN means the counter is saturated - the reader is already signaled
        if err.kind() != ErrorKind::WouldBlock {
            tracing::warn!("eventfd signal failed: {}", err);
        }
    }
}

#[cfg(target_os = "linux")]
fn create_eventfd() -> io::Result<OwnedFd> {
    let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: eventfd returned a fresh descriptor we now own
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

#[cfg(not(target_os = "linux"))]
fn create_eventfd() -> io::Result<OwnedFd> {
    Err(io::Error::new(
        ErrorKind::Unsupported,
        "readiness descriptors require eventfd",
    ))
}
