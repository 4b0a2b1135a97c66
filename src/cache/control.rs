//! The control file: a single small file whose lock serialises cache-wide
//! structural changes and whose contents record the aggregate byte size.

use camino::{Utf8Path, Utf8PathBuf};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::sync::Mutex;

use crate::cache::lock::{CreateAttempt, create_exclusive, fcntl_lock_blocking};
use crate::error::{Error, Result};

/// Width, in bytes, of the recorded aggregate size on disk.
const SIZE_WIDTH: usize = 8;

/// Holds the control file's descriptor for the lifetime of the [`crate::Cache`].
///
/// All structural mutations (accounting updates, eviction scans, the
/// lifecycle operations in [`crate::cache::lifecycle`]) take a
/// [`ControlFileGuard`] first. The guard's lock type determines whether the
/// operation merely observes the recorded size (shared) or may mutate it
/// (exclusive); it is always released by the time the guard is dropped.
pub(crate) struct ControlFile {
    path: Utf8PathBuf,
    file: Mutex<File>,
}

impl ControlFile {
    /// Opens or creates the control file at `path`, zero-initialising it on
    /// first creation.
    pub(crate) fn open_or_create(path: Utf8PathBuf) -> Result<Self> {
        match create_exclusive(&path)? {
            CreateAttempt::Created(mut file) => {
                #[expect(
                    clippy::host_endian_bytes,
                    reason = "spec mandates host byte order for the control-file integer"
                )]
                let zero = 0u64.to_ne_bytes();
                file.write_all(&zero)
                    .map_err(|err| Error::io("write", &path, err))?;
                fcntl_lock_blocking(&file, libc::F_UNLCK)
                    .map_err(|err| Error::lock(&path, err))?;
                Ok(Self {
                    path,
                    file: Mutex::new(file),
                })
            }
            CreateAttempt::Exists => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .mode(0o666)
                    .open(path.as_std_path())
                    .map_err(|err| Error::io("open", &path, err))?;
                Ok(Self {
                    path,
                    file: Mutex::new(file),
                })
            }
        }
    }

    pub(crate) fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Acquires a shared lock on the control file, for the duration of the
    /// returned guard.
    pub(crate) fn lock_shared(&self) -> Result<ControlFileGuard<'_>> {
        self.lock(libc::F_RDLCK)
    }

    /// Acquires an exclusive lock on the control file, for the duration of
    /// the returned guard.
    pub(crate) fn lock_exclusive(&self) -> Result<ControlFileGuard<'_>> {
        self.lock(libc::F_WRLCK)
    }

    fn lock(&self, lock_type: libc::c_short) -> Result<ControlFileGuard<'_>> {
        let guard = self.file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        fcntl_lock_blocking(&guard, lock_type).map_err(|err| Error::lock(&self.path, err))?;
        Ok(ControlFileGuard {
            control: self,
            file: guard,
        })
    }
}

/// RAII guard holding the control file's advisory lock. Always releases on
/// every exit path — normal return, early return, or panic unwind.
pub(crate) struct ControlFileGuard<'a> {
    control: &'a ControlFile,
    file: std::sync::MutexGuard<'a, File>,
}

impl ControlFileGuard<'_> {
    /// Reads the recorded aggregate size.
    #[expect(
        clippy::host_endian_bytes,
        reason = "spec mandates host byte order for the control-file integer"
    )]
    pub(crate) fn read_size(&mut self) -> Result<u64> {
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|err| Error::io("seek", self.control.path(), err))?;
        let mut buf = [0u8; SIZE_WIDTH];
        self.file
            .read_exact(&mut buf)
            .map_err(|err| Error::io("read", self.control.path(), err))?;
        Ok(u64::from_ne_bytes(buf))
    }

    /// Writes the recorded aggregate size.
    #[expect(
        clippy::host_endian_bytes,
        reason = "spec mandates host byte order for the control-file integer"
    )]
    pub(crate) fn write_size(&mut self, size: u64) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|err| Error::io("seek", self.control.path(), err))?;
        self.file
            .write_all(&size.to_ne_bytes())
            .map_err(|err| Error::io("write", self.control.path(), err))?;
        Ok(())
    }
}

impl Drop for ControlFileGuard<'_> {
    fn drop(&mut self) {
        let _ = fcntl_lock_blocking(&self.file, libc::F_UNLCK);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn utf8(path: &std::path::Path) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(path.to_path_buf()).expect("utf8 path")
    }

    #[test]
    fn new_control_file_starts_at_zero() {
        let dir = tempdir().expect("tempdir");
        let control = ControlFile::open_or_create(utf8(&dir.path().join("p_cache_control")))
            .expect("create control file");
        let mut guard = control.lock_shared().expect("lock shared");
        assert_eq!(guard.read_size().expect("read size"), 0);
    }

    #[test]
    fn reopening_existing_control_file_preserves_size() {
        let dir = tempdir().expect("tempdir");
        let path = utf8(&dir.path().join("p_cache_control"));

        let control = ControlFile::open_or_create(path.clone()).expect("create");
        {
            let mut guard = control.lock_exclusive().expect("lock exclusive");
            guard.write_size(42).expect("write size");
        }
        drop(control);

        let reopened = ControlFile::open_or_create(path).expect("reopen");
        let mut guard = reopened.lock_shared().expect("lock shared");
        assert_eq!(guard.read_size().expect("read size"), 42);
    }
}
