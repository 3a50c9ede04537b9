//! Signal bridge (spec.md §4.11). There is no `SIGCHLD` to listen for in a thread-per-core
//! model: an unexpectedly dead dispatcher shows up as a panicked `JoinHandle` instead, which
//! [`crate::dispatcher::run_event_dispatchers`] treats the way the original's
//! `SigchldListener` treats an unexpected child death — log it and tear the whole process
//! down. `SIGINT`/`SIGTERM` still mean "begin graceful shutdown", handled here the same way
//! as the original's idempotent `SigintListener`. Grounded on
//! `original_source/src/platform/components/startup/event_dispatcher.c`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

static EXIT_REQUESTED: AtomicBool = AtomicBool::new(false);
static INSTALLED: OnceLock<()> = OnceLock::new();

extern "C" fn on_exit_signal(_signo: libc::c_int) {
    // Async-signal-safe: a single relaxed store, nothing else happens on the signal stack.
    EXIT_REQUESTED.store(true, Ordering::Relaxed);
}

/// Install the `SIGINT`/`SIGTERM` handlers. Idempotent; safe to call from every dispatcher
/// core though only the first call installs anything.
pub fn install() {
    INSTALLED.get_or_init(|| {
        unsafe {
            libc::signal(libc::SIGINT, on_exit_signal as usize as libc::sighandler_t);
            libc::signal(libc::SIGTERM, on_exit_signal as usize as libc::sighandler_t);
        }
    });
}

/// `SigintListener`'s idempotent latch: `true` once either signal has been observed.
pub fn exit_requested() -> bool {
    EXIT_REQUESTED.load(Ordering::Relaxed)
}

#[cfg(test)]
pub(crate) fn reset_for_test() {
    EXIT_REQUESTED.store(false, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // SIGINT/SIGTERM are process-global; serialize tests that raise them.
    static SIGNAL_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn raising_sigint_latches_the_exit_flag() {
        let _guard = SIGNAL_LOCK.lock().unwrap();
        reset_for_test();
        install();
        assert!(!exit_requested());
        unsafe { libc::raise(libc::SIGINT) };
        assert!(exit_requested());
    }
}
