//! Process-wide signal plumbing for the primary event loop.
//!
//! Grounded on `original_source/lib/event/os/shared/PosixEventManager.{hpp,cpp}`'s
//! non-`signalfd` path: a legacy `sigaction` handler that only increments
//! `volatile` counters (the one thing it's safe to do from an
//! async-signal-safe context), polled once per loop iteration. Spec §4.8
//! explicitly allows this as the fallback for "backends without
//! signalfd"; we use it as the only path rather than also wiring up
//! `signalfd`, since the counter approach needs no extra kernel object
//! and keeps the same code working if a kqueue/poll backend is added
//! later (see `DESIGN.md`).
//!
//! Only the primary loop (the first `EventLoop` created process-wide)
//! installs handlers, matching `EventManager::_primaryManagerExists`.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

static PRIMARY_CLAIMED: AtomicBool = AtomicBool::new(false);

static GLOBAL_EXIT: AtomicBool = AtomicBool::new(false);
static SIG_CHLD: AtomicU32 = AtomicU32::new(0);
static SIG_HUP: AtomicU32 = AtomicU32::new(0);
static SIG_USR1: AtomicU32 = AtomicU32::new(0);
static SIG_USR2: AtomicU32 = AtomicU32::new(0);

/// Claims the process-wide primary-loop slot. Returns `true` exactly once
/// across the process's lifetime (until [`release_primary`] is called).
pub fn claim_primary() -> bool {
    PRIMARY_CLAIMED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

/// Releases the primary slot, matching the source's behaviour of handing
/// primary status to the next `EventManager` created after this one is
/// destroyed.
pub fn release_primary() {
    PRIMARY_CLAIMED.store(false, Ordering::SeqCst);
}

extern "C" fn trampoline(sig: libc::c_int) {
    match sig {
        libc::SIGINT | libc::SIGTERM => GLOBAL_EXIT.store(true, Ordering::SeqCst),
        libc::SIGCHLD => {
            SIG_CHLD.fetch_add(1, Ordering::SeqCst);
        }
        libc::SIGHUP => {
            SIG_HUP.fetch_add(1, Ordering::SeqCst);
        }
        libc::SIGUSR1 => {
            SIG_USR1.fetch_add(1, Ordering::SeqCst);
        }
        libc::SIGUSR2 => {
            SIG_USR2.fetch_add(1, Ordering::SeqCst);
        }
        _ => {}
    }
}

fn install_one(sig: libc::c_int) -> std::io::Result<()> {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = trampoline as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        if libc::sigaction(sig, &sa, std::ptr::null_mut()) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Installs handlers for INT, TERM, CHLD, HUP, USR1, USR2, and ignores
/// PIPE (so a write to a closed tun/socket FD surfaces as `EPIPE` rather
/// than killing the process), per spec §4.5's signal surface.
pub fn install() -> std::io::Result<()> {
    for sig in [
        libc::SIGINT,
        libc::SIGTERM,
        libc::SIGCHLD,
        libc::SIGHUP,
        libc::SIGUSR1,
        libc::SIGUSR2,
    ] {
        install_one(sig)?;
    }
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
    Ok(())
}

/// A signal observed this iteration, with any kernel-parseable payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Hup,
    Usr1,
    Usr2,
}

/// Status of an exited/stopped/continued child, mirroring
/// `EventManager`'s `Child*` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStatus {
    Exited(i32),
    Signaled(i32),
    Stopped(i32),
    Continued,
}

/// `true` once INT/TERM has been observed (sticky until the process exits).
pub fn stop_requested() -> bool {
    GLOBAL_EXIT.load(Ordering::SeqCst)
}

/// Lets a non-signal code path (e.g. a test, or `EventLoop::stop()`)
/// request the same shutdown INT/TERM would.
pub fn request_stop() {
    GLOBAL_EXIT.store(true, Ordering::SeqCst);
}

/// Drains the HUP/USR1/USR2 counters, returning one [`Signal`] per
/// pending delivery (coalesced counts collapse to repeated entries, same
/// as re-running the handler that many times would have).
pub fn drain_user_signals() -> Vec<Signal> {
    let mut out = Vec::new();
    for _ in 0..SIG_HUP.swap(0, Ordering::SeqCst) {
        out.push(Signal::Hup);
    }
    for _ in 0..SIG_USR1.swap(0, Ordering::SeqCst) {
        out.push(Signal::Usr1);
    }
    for _ in 0..SIG_USR2.swap(0, Ordering::SeqCst) {
        out.push(Signal::Usr2);
    }
    out
}

/// `true` if at least one `SIGCHLD` is pending reaping.
pub fn take_sigchld_pending() -> bool {
    SIG_CHLD.swap(0, Ordering::SeqCst) > 0
}

/// Reaps every exited/signaled/stopped/continued child via
/// `waitpid(-1, WNOHANG)`, as the spec's CHLD handling requires.
pub fn reap_children() -> Vec<(libc::pid_t, ChildStatus)> {
    let mut out = Vec::new();
    loop {
        let mut status: libc::c_int = 0;
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG | libc::WUNTRACED | libc::WCONTINUED) };
        if pid <= 0 {
            break;
        }
        let cs = if libc::WIFEXITED(status) {
            ChildStatus::Exited(libc::WEXITSTATUS(status))
        } else if libc::WIFSIGNALED(status) {
            ChildStatus::Signaled(libc::WTERMSIG(status))
        } else if libc::WIFSTOPPED(status) {
            ChildStatus::Stopped(libc::WSTOPSIG(status))
        } else {
            ChildStatus::Continued
        };
        out.push((pid, cs));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Signal/primary-slot state is process-global; serialize these tests.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn primary_slot_is_exclusive() {
        let _g = TEST_LOCK.lock().unwrap();
        release_primary();
        assert!(claim_primary());
        assert!(!claim_primary());
        release_primary();
        assert!(claim_primary());
        release_primary();
    }

    #[test]
    fn user_signal_drain_is_empty_when_idle() {
        let _g = TEST_LOCK.lock().unwrap();
        SIG_HUP.store(0, Ordering::SeqCst);
        SIG_USR1.store(0, Ordering::SeqCst);
        SIG_USR2.store(0, Ordering::SeqCst);
        assert!(drain_user_signals().is_empty());
    }

    #[test]
    fn user_signal_counts_collapse_to_repeated_entries() {
        let _g = TEST_LOCK.lock().unwrap();
        SIG_HUP.store(2, Ordering::SeqCst);
        let drained = drain_user_signals();
        assert_eq!(drained, vec![Signal::Hup, Signal::Hup]);
    }
}
