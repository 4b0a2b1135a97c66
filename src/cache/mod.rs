//! A multi-process, file-locking, size-bounded on-disk cache.
//!
//! Construct a [`CacheConfig`] and pass it to [`Cache::new`] (or
//! [`shared_cache`] for a process-wide singleton), then drive lookups and
//! builds through [`Cache::get_or_build`]. See the module-level docs on
//! [`orchestrate`] for the full get-or-build state machine.

mod config;
mod control;
mod eviction;
mod fd_registry;
mod lifecycle;
mod lock;
mod mangle;
mod orchestrate;

use std::fs::File;
use std::os::unix::fs::PermissionsExt;
use std::sync::{Arc, OnceLock};

use camino::Utf8Path;

pub use config::CacheConfig;
pub use orchestrate::{CacheEntry, existence_and_mtime, expected_size};

use control::ControlFile;
use fd_registry::DescriptorRegistry;

use crate::error::{Error, Result};

/// Process-local state shared by every [`Cache`] handle cloned from the same
/// construction.
pub(crate) struct CacheInner {
    directory: camino::Utf8PathBuf,
    prefix: String,
    max_bytes: u64,
    control: ControlFile,
    registry: DescriptorRegistry,
}

/// A handle to an on-disk cache.
///
/// Cheap to clone: internally an `Arc` over the directory handle, control
/// file descriptor and descriptor registry, so it may be freely shared
/// across threads.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

impl Cache {
    /// Opens or creates the cache described by `config`.
    ///
    /// Returns `Ok(None)` if `config.directory` is empty — a disabled cache,
    /// not an error. Callers must tolerate a `None` handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadConfig`] if `config.prefix` is empty, or
    /// [`Error::Io`] if the directory cannot be created or the control file
    /// cannot be opened.
    pub fn new(config: CacheConfig) -> Result<Option<Self>> {
        if config.directory.as_str().is_empty() {
            return Ok(None);
        }
        if config.prefix.is_empty() {
            return Err(Error::BadConfig("cache prefix must not be empty".into()));
        }

        ensure_directory(&config.directory)?;
        let control_path = config.directory.join(mangle::control_file_name(&config.prefix));
        let control = ControlFile::open_or_create(control_path)?;

        Ok(Some(Self {
            inner: Arc::new(CacheInner {
                directory: config.directory,
                prefix: config.prefix,
                max_bytes: config.max_bytes,
                control,
                registry: DescriptorRegistry::new(),
            }),
        }))
    }

    /// Directory this cache is rooted at.
    #[must_use]
    pub fn directory(&self) -> &Utf8Path {
        &self.inner.directory
    }

    /// Prefix shared by every file this cache manages.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    /// Runs the get-or-build flow for `source_id` (see [`orchestrate`]).
    ///
    /// # Errors
    ///
    /// See [`orchestrate::get_or_build`].
    pub fn get_or_build<P, V>(
        &self,
        source_id: &str,
        mangle: bool,
        produce: P,
        valid: V,
    ) -> Result<CacheEntry>
    where
        P: FnOnce(&str, &mut File) -> Result<()>,
        V: FnOnce(&Utf8Path, &str) -> bool,
    {
        orchestrate::get_or_build(&self.inner, source_id, mangle, produce, valid)
    }

    /// Removes a single named entry from the cache unconditionally.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file exists but cannot be removed.
    pub fn purge(&self, source_id: &str, mangle: bool) -> Result<()> {
        let path = mangle::cache_file_name(&self.inner.directory, &self.inner.prefix, source_id, mangle)?;
        lifecycle::purge_file(&self.inner.control, &self.inner.registry, &path)
    }

    /// Current recorded aggregate size, in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Lock`]/[`Error::Io`] from the control file.
    pub fn size(&self) -> Result<u64> {
        eviction::get_cache_size(&self.inner.control)
    }
}

fn ensure_directory(directory: &Utf8Path) -> Result<()> {
    match std::fs::create_dir(directory.as_std_path()) {
        Ok(()) => {
            std::fs::set_permissions(directory.as_std_path(), std::fs::Permissions::from_mode(0o775))
                .map_err(|err| Error::io("chmod", directory, err))?;
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(Error::io("mkdir", directory, err)),
    }
}

static SHARED: OnceLock<Option<Cache>> = OnceLock::new();

/// Returns a process-wide shared cache handle, constructing it on first
/// call and reusing it thereafter. Later calls ignore `config` once the
/// singleton has been initialised.
///
/// # Errors
///
/// Returns whatever [`Cache::new`] would return for the first call's
/// `config`.
pub fn shared_cache(config: CacheConfig) -> Result<Option<&'static Cache>> {
    if let Some(cache) = SHARED.get() {
        return Ok(cache.as_ref());
    }
    let cache = Cache::new(config)?;
    Ok(SHARED.get_or_init(|| cache).as_ref())
}
