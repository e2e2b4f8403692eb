// Process liveness, isolated so the recovery algorithm stays portable and testable.

use std::fmt::Debug;

/// Answers "is this process id still running?".
pub trait ProcessLiveness: Send + Sync + Debug {
    fn is_alive(&self, pid: i32) -> bool;
}

/// Asks the operating system via `kill(pid, 0)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsLiveness;

impl ProcessLiveness for OsLiveness {
    #[cfg(unix)]
    fn is_alive(&self, pid: i32) -> bool {
        if pid <= 0 {
            return false;
        }
        // Signal 0 performs the permission and existence checks without delivering anything.
        let ret = unsafe { libc::kill(pid, 0) };
        if ret == 0 {
            return true;
        }
        // EPERM means the process exists but belongs to someone else
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    fn is_alive(&self, pid: i32) -> bool {
        pid > 0
    }
}

/// The calling process id as stored in the shared header.
pub fn current_pid() -> i32 {
    std::process::id() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_is_alive() {
        assert!(OsLiveness.is_alive(current_pid()));
    }

    #[test]
    fn non_positive_pids_are_dead() {
        assert!(!OsLiveness.is_alive(0));
        assert!(!OsLiveness.is_alive(-1));
    }

    #[test]
    fn reaped_child_is_dead() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id() as i32;
        child.wait().unwrap();
        assert!(!OsLiveness.is_alive(pid));
    }
}
