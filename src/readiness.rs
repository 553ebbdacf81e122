//! File readiness: is a freshly created file safe to read, or is its writer
//! still holding it?

use std::fs::File;
use std::io;
use std::path::Path;

/// Result of trying a file for exclusive read access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Opened exclusively; nobody else holds the file.
    Ready,
    /// Another handle holds the file (sharing violation / lock held).
    Locked,
    /// Any other I/O failure: missing file, permission denied, ...
    Unavailable(io::ErrorKind),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

/// Handle proving exclusive access; released on drop.
#[cfg(unix)]
pub(crate) type ExclusiveHandle = nix::fcntl::Flock<File>;
#[cfg(not(unix))]
pub(crate) type ExclusiveHandle = File;

/// Try to open `path` for exclusive read access.
///
/// The handle (and any lock taken) is dropped before returning. A missing file
/// reports `Unavailable`, which callers treat the same as `Locked`.
pub fn check_readiness(path: &Path) -> Readiness {
    match open_exclusive(path) {
        Ok(_handle) => Readiness::Ready,
        Err(e) if is_sharing_violation(&e) => Readiness::Locked,
        Err(e) => Readiness::Unavailable(e.kind()),
    }
}

#[cfg(unix)]
fn open_exclusive(path: &Path) -> io::Result<ExclusiveHandle> {
    use nix::fcntl::{Flock, FlockArg};

    let file = File::open(path)?;
    // Non-blocking exclusive advisory lock; released when the guard drops.
    Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_, errno)| io::Error::from(errno))
}

#[cfg(windows)]
fn open_exclusive(path: &Path) -> io::Result<ExclusiveHandle> {
    use std::os::windows::fs::OpenOptionsExt;

    std::fs::OpenOptions::new()
        .read(true)
        .share_mode(0)
        .open(path)
}

#[cfg(not(any(unix, windows)))]
fn open_exclusive(path: &Path) -> io::Result<ExclusiveHandle> {
    File::open(path)
}

#[cfg(unix)]
fn is_sharing_violation(err: &io::Error) -> bool {
    err.raw_os_error() == Some(nix::errno::Errno::EWOULDBLOCK as i32)
}

#[cfg(windows)]
fn is_sharing_violation(err: &io::Error) -> bool {
    const ERROR_SHARING_VIOLATION: i32 = 32;
    const ERROR_LOCK_VIOLATION: i32 = 33;
    matches!(
        err.raw_os_error(),
        Some(ERROR_SHARING_VIOLATION) | Some(ERROR_LOCK_VIOLATION)
    )
}

#[cfg(not(any(unix, windows)))]
fn is_sharing_violation(_err: &io::Error) -> bool {
    false
}

/// Hold a file the way a still-running writer would. Test helper.
#[cfg(test)]
pub(crate) fn hold_exclusive(path: &Path) -> ExclusiveHandle {
    open_exclusive(path).expect("take exclusive hold on test file")
}
