//! Process resource limits, applied once at startup.
//!
//! Grounded on `original_source/lib/event/os/shared/Utils.cpp::setup()`:
//! both limits are best-effort — a failing `setrlimit` is logged and
//! otherwise ignored, never fatal, matching the source's own comment
//! ("not fatal").

/// Sets `RLIMIT_AS` to `vmem_max_kb` KB, if given.
pub fn apply_vmem_max(vmem_max_kb: Option<u64>) {
    let Some(kb) = vmem_max_kb else { return };
    let rlim = libc::rlimit {
        rlim_cur: kb * 1024,
        rlim_max: kb * 1024,
    };
    if unsafe { libc::setrlimit(libc::RLIMIT_AS, &rlim) } != 0 {
        let err = std::io::Error::last_os_error();
        tracing::warn!(vmem_max_kb = kb, error = %err, "could not set RLIMIT_AS");
    }
}

/// Sets `RLIMIT_NOFILE` to `numfd_max`, if given.
pub fn apply_numfd_max(numfd_max: Option<u64>) {
    let Some(n) = numfd_max else { return };
    let rlim = libc::rlimit {
        rlim_cur: n,
        rlim_max: n,
    };
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &rlim) } != 0 {
        let err = std::io::Error::last_os_error();
        tracing::warn!(numfd_max = n, error = %err, "could not set RLIMIT_NOFILE");
    }
}

/// Applies both rlimits from a [`crate::config::RuntimeConfig`].
pub fn apply(vmem_max_kb: Option<u64>, numfd_max: Option<u64>) {
    apply_vmem_max(vmem_max_kb);
    apply_numfd_max(numfd_max);
}
