//! Process-level utilities for the cancellation kill path.

/// Send SIGKILL to a process.
///
/// Returns `true` when the process was killed or no longer exists.
#[cfg(unix)]
pub(crate) fn kill_process(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, libc::SIGKILL) == 0 || !is_process_alive(pid) }
}

#[cfg(not(unix))]
pub(crate) fn kill_process(_pid: u32) -> bool {
    // Non-unix teardown relies on kill_on_drop and explicit stop().
    false
}

/// Check whether a process with the given PID exists, via the null signal.
#[cfg(unix)]
pub(crate) fn is_process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
pub(crate) fn is_process_alive(_pid: u32) -> bool {
    false
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn bogus_pid_is_not_alive() {
        assert!(!is_process_alive(999_999_999));
    }
}
