//! Process-local registry of open descriptors held against cache entry
//! files.
//!
//! POSIX record locks are per-`(process, inode)`, not per-descriptor:
//! closing *any* descriptor a process holds on a file drops every lock that
//! process holds on it, even descriptors opened for unrelated reasons. So a
//! descriptor that must stay open to keep a lock alive is shared as
//! `Arc<File>` rather than duplicated with `try_clone`: the OS descriptor is
//! only actually closed once every `Arc` referring to it is gone, whichever
//! one of this registry or a caller still reading from it drops last. The
//! registry exists so [`crate::cache::lifecycle::unlock_and_close`] can find
//! and release every descriptor this process opened against a path, rather
//! than assuming there is exactly one — a process can legitimately hold more
//! than one open descriptor against the same path (concurrent readers, for
//! instance).

use std::collections::HashMap;
use std::fs::File;
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};

/// Maps cache paths to the descriptors this process currently holds open
/// against them.
#[derive(Default)]
pub(crate) struct DescriptorRegistry {
    open: Mutex<HashMap<Utf8PathBuf, Vec<Arc<File>>>>,
}

impl DescriptorRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records that `file` is now an open descriptor against `path`.
    pub(crate) fn insert(&self, path: &Utf8Path, file: Arc<File>) {
        let mut open = self.open.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        open.entry(path.to_path_buf()).or_default().push(file);
    }

    /// Removes and returns every descriptor registered against `path`.
    ///
    /// Returns an empty `Vec` if none are registered, which is not an error:
    /// callers may race to purge an entry nobody currently has open.
    pub(crate) fn take_all(&self, path: &Utf8Path) -> Vec<Arc<File>> {
        let mut open = self.open.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        open.remove(path).unwrap_or_default()
    }

    /// Number of descriptors currently registered against `path`. Exposed
    /// for tests asserting registry bookkeeping.
    #[cfg(test)]
    pub(crate) fn count(&self, path: &Utf8Path) -> usize {
        let open = self.open.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        open.get(path).map_or(0, Vec::len)
    }
}
