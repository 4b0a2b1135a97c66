//! Whole-file advisory locking primitives.
//!
//! Uses POSIX record locks (`fcntl(2)` with `F_SETLK`/`F_SETLKW`) rather than
//! BSD `flock(2)`. The distinction matters: POSIX record locks are associated
//! with the `(process, inode)` pair, so a second lock attempt from the same
//! process on the same file never blocks against itself, and all locks a
//! process holds on a file vanish when *any* descriptor open on that file is
//! closed or the process exits. `flock(2)` locks are scoped to the open file
//! description instead and would self-block on a second `open()` — the wrong
//! behaviour here, since §4.2 requires same-process re-entrancy.

use camino::Utf8Path;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use tracing::debug;

use crate::error::{Error, Result};
use crate::observability::LOCK_TARGET;

/// Outcome of attempting to open and lock an existing file.
#[derive(Debug)]
pub enum LockAttempt {
    /// The file existed and the requested lock was acquired.
    Acquired(File),
    /// The file did not exist.
    Missing,
}

/// Outcome of attempting to atomically create and exclusively lock a file.
#[derive(Debug)]
pub enum CreateAttempt {
    /// The file did not previously exist; it now does, empty and exclusively
    /// locked.
    Created(File),
    /// The file already existed.
    Exists,
}

/// Outcome of a non-blocking exclusive lock attempt.
#[derive(Debug)]
pub enum NonBlockingAttempt {
    /// The lock was acquired.
    Acquired(File),
    /// The file did not exist.
    Missing,
    /// Another process holds a conflicting lock right now.
    Contended,
}

/// Blocks until a shared lock is held on `path`.
///
/// Returns [`LockAttempt::Missing`] if the file does not exist.
///
/// # Errors
///
/// Returns [`Error::Io`]/[`Error::Lock`] for any other failure.
pub fn open_shared_blocking(path: &Utf8Path) -> Result<LockAttempt> {
    open_blocking(path, libc::F_RDLCK)
}

/// Blocks until an exclusive lock is held on `path`.
///
/// Returns [`LockAttempt::Missing`] if the file does not exist.
///
/// # Errors
///
/// Returns [`Error::Io`]/[`Error::Lock`] for any other failure.
pub fn open_exclusive_blocking(path: &Utf8Path) -> Result<LockAttempt> {
    open_blocking(path, libc::F_WRLCK)
}

fn open_blocking(path: &Utf8Path, lock_type: libc::c_short) -> Result<LockAttempt> {
    let file = match OpenOptions::new().read(true).write(true).open(path.as_std_path()) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(LockAttempt::Missing),
        Err(err) => return Err(Error::io("open", path, err)),
    };

    fcntl_lock(&file, lock_type, true).map_err(|err| Error::lock(path, err))?;
    Ok(LockAttempt::Acquired(file))
}

/// Attempts to acquire an exclusive lock on `path` without blocking.
///
/// Returns [`NonBlockingAttempt::Missing`] if the file does not exist and
/// [`NonBlockingAttempt::Contended`] if another process holds a conflicting
/// lock.
///
/// # Errors
///
/// Returns [`Error::Io`]/[`Error::Lock`] for any other failure.
pub fn open_exclusive_nonblocking(path: &Utf8Path) -> Result<NonBlockingAttempt> {
    let file = match OpenOptions::new().read(true).write(true).open(path.as_std_path()) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(NonBlockingAttempt::Missing);
        }
        Err(err) => return Err(Error::io("open", path, err)),
    };

    match fcntl_lock(&file, libc::F_WRLCK, false) {
        Ok(()) => Ok(NonBlockingAttempt::Acquired(file)),
        Err(err) if is_contended(&err) => Ok(NonBlockingAttempt::Contended),
        Err(err) => Err(Error::lock(path, err)),
    }
}

/// Atomically creates `path` and locks it exclusively.
///
/// Returns [`CreateAttempt::Exists`] if the file already existed.
///
/// # Errors
///
/// Returns [`Error::Io`]/[`Error::Lock`] for any other failure.
pub fn create_exclusive(path: &Utf8Path) -> Result<CreateAttempt> {
    let file = match OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .mode(0o666)
        .open(path.as_std_path())
    {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(CreateAttempt::Exists),
        Err(err) => return Err(Error::io("create", path, err)),
    };

    fcntl_lock(&file, libc::F_WRLCK, true).map_err(|err| Error::lock(path, err))?;
    debug!(target: LOCK_TARGET, path = %path, "created and exclusively locked");
    Ok(CreateAttempt::Created(file))
}

/// Atomically converts an exclusive lock on `file` to a shared lock, without
/// ever releasing the lock in between.
///
/// # Errors
///
/// Returns [`Error::Lock`] if the underlying `fcntl` call fails.
pub fn downgrade(file: &File, path: &Utf8Path) -> Result<()> {
    fcntl_lock(file, libc::F_RDLCK, true).map_err(|err| Error::lock(path, err))
}

/// Releases the lock on `file` and closes it.
///
/// Dropping the [`File`] closes the descriptor, which releases every POSIX
/// record lock this process holds through it; an explicit unlock first keeps
/// intent visible at call sites and mirrors the source cache's
/// `unlock_close`.
///
/// # Errors
///
/// Returns [`Error::Lock`] if the underlying `fcntl` call fails.
pub fn unlock_close(file: File, path: &Utf8Path) -> Result<()> {
    fcntl_lock(&file, libc::F_UNLCK, true).map_err(|err| Error::lock(path, err))?;
    drop(file);
    Ok(())
}

/// Blocking `fcntl` lock/unlock on an already-open file, exposed to sibling
/// modules that manage their own descriptor (the control file).
pub(crate) fn fcntl_lock_blocking(file: &File, lock_type: libc::c_short) -> io::Result<()> {
    debug!(target: LOCK_TARGET, lock_type, "control file lock request");
    fcntl_lock(file, lock_type, true)
}

fn fcntl_lock(file: &File, lock_type: libc::c_short, blocking: bool) -> io::Result<()> {
    let mut flock: libc::flock = unsafe { std::mem::zeroed() };
    flock.l_type = lock_type;
    flock.l_whence = libc::SEEK_SET as libc::c_short;
    flock.l_start = 0;
    flock.l_len = 0;

    let cmd = if blocking { libc::F_SETLKW } else { libc::F_SETLK };

    // SAFETY: `file` stays alive for the duration of the call and `flock`
    // is a fully-initialised, whole-file record-lock request.
    let result = unsafe { libc::fcntl(file.as_raw_fd(), cmd, &flock) };
    if result == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn is_contended(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(code) if code == libc::EAGAIN || code == libc::EACCES
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn utf8(path: &std::path::Path) -> camino::Utf8PathBuf {
        camino::Utf8PathBuf::from_path_buf(path.to_path_buf()).expect("utf8 path")
    }

    #[test]
    fn open_shared_blocking_reports_missing() {
        let dir = tempdir().expect("tempdir");
        let path = utf8(&dir.path().join("missing"));
        let result = open_shared_blocking(&path).expect("no io error");
        assert!(matches!(result, LockAttempt::Missing));
    }

    #[test]
    fn create_exclusive_then_exists() {
        let dir = tempdir().expect("tempdir");
        let path = utf8(&dir.path().join("entry"));

        let first = create_exclusive(&path).expect("create succeeds");
        assert!(matches!(first, CreateAttempt::Created(_)));

        let second = create_exclusive(&path).expect("second create is ok");
        assert!(matches!(second, CreateAttempt::Exists));
    }

    #[test]
    fn downgrade_then_read_lock_from_same_process_succeeds() {
        let dir = tempdir().expect("tempdir");
        let path = utf8(&dir.path().join("entry"));

        let CreateAttempt::Created(mut file) = create_exclusive(&path).expect("create") else {
            panic!("expected Created");
        };
        file.write_all(b"hello").expect("write payload");
        downgrade(&file, &path).expect("downgrade");

        // Same-process re-entrancy: a second shared attempt must not block.
        let reader = open_shared_blocking(&path).expect("shared lock");
        assert!(matches!(reader, LockAttempt::Acquired(_)));
    }

    #[test]
    fn nonblocking_exclusive_reports_missing() {
        let dir = tempdir().expect("tempdir");
        let path = utf8(&dir.path().join("missing"));
        let result = open_exclusive_nonblocking(&path).expect("no io error");
        assert!(matches!(result, NonBlockingAttempt::Missing));
    }

    #[test]
    fn nonblocking_exclusive_acquires_when_free() {
        let dir = tempdir().expect("tempdir");
        let path = utf8(&dir.path().join("entry"));
        let CreateAttempt::Created(file) = create_exclusive(&path).expect("create") else {
            panic!("expected Created");
        };
        unlock_close(file, &path).expect("unlock");

        let result = open_exclusive_nonblocking(&path).expect("no io error");
        assert!(matches!(result, NonBlockingAttempt::Acquired(_)));
    }
}
