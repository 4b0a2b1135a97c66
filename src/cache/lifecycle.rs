//! Entry-level lock lifecycle operations: acquire, downgrade, release and
//! purge a single cache file, each serialised against the control file.

use std::fs::File;
use std::sync::Arc;

use camino::Utf8Path;

use crate::cache::control::ControlFile;
use crate::cache::fd_registry::DescriptorRegistry;
use crate::cache::lock::{self, CreateAttempt, LockAttempt};
use crate::error::{Error, Result};

/// Opens `path` and takes a shared (read) lock on it, registering the
/// descriptor so a later [`unlock_and_close`] can find it.
///
/// Returns `Ok(None)` if `path` does not exist.
///
/// # Errors
///
/// Returns [`Error::Io`]/[`Error::Lock`] on any other failure.
pub(crate) fn get_read_lock(
    control: &ControlFile,
    registry: &DescriptorRegistry,
    path: &Utf8Path,
) -> Result<Option<Arc<File>>> {
    let _cache_guard = control.lock_shared()?;
    match lock::open_shared_blocking(path)? {
        LockAttempt::Acquired(file) => {
            let file = Arc::new(file);
            registry.insert(path, Arc::clone(&file));
            Ok(Some(file))
        }
        LockAttempt::Missing => Ok(None),
    }
}

/// Atomically creates `path` and takes an exclusive (write) lock on it,
/// registering the descriptor so a later [`unlock_and_close`] can find it.
///
/// Returns `Ok(None)` if `path` already exists — the caller should fall back
/// to [`get_read_lock`].
///
/// # Errors
///
/// Returns [`Error::Io`]/[`Error::Lock`] on any other failure.
pub(crate) fn create_and_lock(
    control: &ControlFile,
    registry: &DescriptorRegistry,
    path: &Utf8Path,
) -> Result<Option<Arc<File>>> {
    let _cache_guard = control.lock_exclusive()?;
    match lock::create_exclusive(path)? {
        CreateAttempt::Created(file) => {
            let file = Arc::new(file);
            registry.insert(path, Arc::clone(&file));
            Ok(Some(file))
        }
        CreateAttempt::Exists => Ok(None),
    }
}

/// Atomically creates `path` and takes an exclusive lock on it, returning a
/// bare, unregistered [`File`] the caller has sole ownership of.
///
/// Used by [`crate::cache::orchestrate::get_or_build`], which needs genuine
/// `&mut File` access to hand to the producer callback — something an
/// `Arc<File>` shared with the registry cannot give out. The caller is
/// responsible for registering the descriptor with [`register`] once it no
/// longer needs exclusive access.
///
/// # Errors
///
/// Returns [`Error::Io`]/[`Error::Lock`] on any other failure.
pub(crate) fn create_and_lock_for_build(
    control: &ControlFile,
    path: &Utf8Path,
) -> Result<Option<File>> {
    let _cache_guard = control.lock_exclusive()?;
    match lock::create_exclusive(path)? {
        CreateAttempt::Created(file) => Ok(Some(file)),
        CreateAttempt::Exists => Ok(None),
    }
}

/// Hands `file` to the descriptor registry under `path`, returning a shared
/// handle future readers (and [`unlock_and_close`]) can see.
pub(crate) fn register(registry: &DescriptorRegistry, path: &Utf8Path, file: File) -> Arc<File> {
    let file = Arc::new(file);
    registry.insert(path, Arc::clone(&file));
    file
}

/// Atomically converts an exclusive lock on `file` to a shared lock.
///
/// Exists to let a builder that just finished writing a new entry start
/// reading it back immediately, without a window in which the lock is held
/// by no one and a concurrent purge could delete the file out from under it.
///
/// # Errors
///
/// Returns [`Error::Lock`] if the underlying `fcntl` call fails.
pub(crate) fn exclusive_to_shared(file: &File, path: &Utf8Path) -> Result<()> {
    lock::downgrade(file, path)
}

/// Releases and closes every descriptor this process holds open against
/// `path`.
///
/// A descriptor whose `Arc` still has other live owners (typically a caller
/// still reading through it) is not force-closed: its lock is released
/// automatically once the last owner drops it, by the OS's own bookkeeping.
///
/// # Errors
///
/// Returns [`Error::Lock`] if an `fcntl` unlock call fails on a descriptor
/// this call does manage to close.
pub(crate) fn unlock_and_close(registry: &DescriptorRegistry, path: &Utf8Path) -> Result<()> {
    for file in registry.take_all(path) {
        if let Ok(file) = Arc::try_unwrap(file) {
            lock::unlock_close(file, path)?;
        }
    }
    Ok(())
}

/// Removes a single file from the cache: takes an exclusive lock, deletes
/// it, releases any descriptors this process held on it, and subtracts its
/// size from the recorded aggregate.
///
/// Blocks until the exclusive lock is available. Use
/// [`crate::cache::eviction::update_and_purge`] to shrink a cache back under
/// its size budget; this removes one named file regardless of budget.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file cannot be removed.
pub(crate) fn purge_file(
    control: &ControlFile,
    registry: &DescriptorRegistry,
    path: &Utf8Path,
) -> Result<()> {
    let mut cache_guard = control.lock_exclusive()?;

    let file = match lock::open_exclusive_blocking(path)? {
        LockAttempt::Acquired(file) => file,
        LockAttempt::Missing => return Ok(()),
    };
    let size = file
        .metadata()
        .map(|meta| meta.len())
        .map_err(|err| Error::io("stat", path, err))?;
    registry.insert(path, Arc::new(file));

    std::fs::remove_file(path.as_std_path()).map_err(|err| Error::io("remove", path, err))?;
    unlock_and_close(registry, path)?;

    let current = cache_guard.read_size()?;
    cache_guard.write_size(current.saturating_sub(size))?;
    Ok(())
}
