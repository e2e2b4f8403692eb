use std::sync::atomic::AtomicU32;
use std::time::Duration;

/// Why a `futex_wait` returned. Callers must re-check their predicate in every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Woken by a `futex_wake_all` (or spuriously).
    Woken,
    /// The word no longer held `expected` when we tried to sleep.
    ValueChanged,
    /// The timeout elapsed.
    TimedOut,
    /// A signal interrupted the wait.
    Interrupted,
}

// The word lives in a MAP_SHARED mapping, so the private flag must NOT be used:
// waiters and wakers are in different processes.
#[cfg(target_os = "linux")]
pub fn futex_wait(atomic: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
    use std::ptr;
    use std::sync::atomic::Ordering;

    // Check condition first to avoid syscall if possible
    if atomic.load(Ordering::Acquire) != expected {
        return WaitOutcome::ValueChanged;
    }

    let ts = timeout.map(|t| libc::timespec {
        tv_sec: t.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
        tv_nsec: t.subsec_nanos() as libc::c_long,
    });
    let ts_ptr = ts
        .as_ref()
        .map_or(ptr::null(), |t| t as *const libc::timespec);

    let ret = unsafe {
        libc::syscall(
            libc::SYS_futex,
            atomic as *const AtomicU32 as *const u32,
            libc::FUTEX_WAIT,
            expected,
            ts_ptr,
            ptr::null::<u32>(),
            0u32,
        )
    };

    if ret == 0 {
        return WaitOutcome::Woken;
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::ETIMEDOUT) => WaitOutcome::TimedOut,
        Some(libc::EAGAIN) => WaitOutcome::ValueChanged,
        Some(libc::EINTR) => WaitOutcome::Interrupted,
        _ => WaitOutcome::Woken,
    }
}

/// Wake every waiter on `atomic`, in any process. Returns the number woken.
#[cfg(target_os = "linux")]
pub fn futex_wake_all(atomic: &AtomicU32) -> usize {
    let ret = unsafe {
        libc::syscall(
            libc::SYS_futex,
            atomic as *const AtomicU32 as *const u32,
            libc::FUTEX_WAKE,
            i32::MAX, // broadcast: several consumers may share a channel
            std::ptr::null::<libc::timespec>(),
            std::ptr::null::<u32>(),
            0u32,
        )
    };
    ret.max(0) as usize
}

#[cfg(not(target_os = "linux"))]
pub fn futex_wait(atomic: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
    use std::sync::atomic::Ordering;

    // Fallback for non-Linux: short sleep, the caller loops on its predicate
    if atomic.load(Ordering::Acquire) != expected {
        return WaitOutcome::ValueChanged;
    }
    let nap = Duration::from_millis(1);
    match timeout {
        Some(t) if t <= nap => {
            std::thread::sleep(t);
            WaitOutcome::TimedOut
        }
        _ => {
            std::thread::sleep(nap);
            WaitOutcome::Woken
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn futex_wake_all(_atomic: &AtomicU32) -> usize {
    // No-op on non-Linux
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn wait_returns_immediately_when_value_differs() {
        let word = AtomicU32::new(5);
        assert_eq!(
            futex_wait(&word, 4, Some(Duration::from_secs(5))),
            WaitOutcome::ValueChanged
        );
    }

    #[test]
    fn wait_times_out() {
        let word = AtomicU32::new(0);
        let start = Instant::now();
        let outcome = futex_wait(&word, 0, Some(Duration::from_millis(20)));
        assert!(matches!(outcome, WaitOutcome::TimedOut | WaitOutcome::Woken));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn wake_all_releases_waiter() {
        let word = Arc::new(AtomicU32::new(0));
        let waiter = {
            let word = word.clone();
            std::thread::spawn(move || {
                while word.load(Ordering::Acquire) == 0 {
                    futex_wait(&word, 0, Some(Duration::from_millis(500)));
                }
            })
        };
        std::thread::sleep(Duration::from_millis(10));
        word.fetch_add(1, Ordering::Release);
        futex_wake_all(&word);
        waiter.join().unwrap();
    }
}
