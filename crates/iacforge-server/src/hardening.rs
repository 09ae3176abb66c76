//! Process hardening for the credential-holding server.
//!
//! Connected cloud secrets live in memory until their handle is revoked or
//! expires. [`harden`] runs before logging and before any credential is
//! loaded: it refuses core dumps and, unless told otherwise, pins pages so
//! they are never swapped out. Failures are reported, not fatal.

use std::io;

/// A hardening step the OS refused.
#[derive(Debug, thiserror::Error)]
pub enum HardeningError {
    #[error("could not disable core dumps: {0}")]
    CoreDumps(#[source] io::Error),

    #[error("could not lock memory: {0} (set IACFORGE_DISABLE_MLOCK=true in development)")]
    MemoryLock(#[source] io::Error),
}

/// Apply every hardening step and return the ones that failed.
///
/// With `lock_pages` false only core dumps are disabled.
pub fn harden(lock_pages: bool) -> Vec<HardeningError> {
    let mut failures = Vec::new();
    if let Err(e) = disable_core_dumps() {
        failures.push(e);
    }
    if lock_pages {
        if let Err(e) = lock_memory() {
            failures.push(e);
        }
    }
    failures
}

/// Set the core file size limit to zero.
///
/// # Errors
///
/// Returns [`HardeningError::CoreDumps`] with the OS error.
#[cfg(unix)]
pub fn disable_core_dumps() -> Result<(), HardeningError> {
    let limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `limit` outlives the call and `setrlimit` only reads it.
    #[allow(unsafe_code)]
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_CORE, &raw const limit) };
    if rc == 0 {
        Ok(())
    } else {
        Err(HardeningError::CoreDumps(io::Error::last_os_error()))
    }
}

#[cfg(not(unix))]
pub fn disable_core_dumps() -> Result<(), HardeningError> {
    Ok(())
}

/// Lock current and future pages into RAM. Needs `CAP_IPC_LOCK` on Linux.
///
/// # Errors
///
/// Returns [`HardeningError::MemoryLock`] with the OS error.
#[cfg(unix)]
pub fn lock_memory() -> Result<(), HardeningError> {
    // SAFETY: flags only; no pointers are passed.
    #[allow(unsafe_code)]
    let rc = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };
    if rc == 0 {
        Ok(())
    } else {
        Err(HardeningError::MemoryLock(io::Error::last_os_error()))
    }
}

#[cfg(not(unix))]
pub fn lock_memory() -> Result<(), HardeningError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_dumps_can_always_be_lowered() {
        assert!(harden(false).is_empty());
    }

    #[cfg(unix)]
    #[test]
    #[allow(unsafe_code)]
    fn core_limit_is_zero_after_hardening() {
        assert!(disable_core_dumps().is_ok());
        let mut limit = libc::rlimit {
            rlim_cur: 1,
            rlim_max: 1,
        };
        // SAFETY: `limit` is a valid, writable rlimit for the call.
        let rc = unsafe { libc::getrlimit(libc::RLIMIT_CORE, &raw mut limit) };
        assert_eq!(rc, 0);
        assert_eq!(limit.rlim_cur, 0);
    }

    #[test]
    fn memory_lock_errors_point_at_the_override() {
        let err = HardeningError::MemoryLock(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(err.to_string().contains("IACFORGE_DISABLE_MLOCK"));
    }
}
