//! The get-or-build flow: the one entry point most callers need, wiring
//! together the mangler, the lock lifecycle and eviction.

use std::fs::File;
use std::sync::Arc;
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

use crate::cache::eviction;
use crate::cache::lifecycle;
use crate::cache::CacheInner;
use crate::cache::mangle;
use crate::error::{Error, Result};
use crate::observability::ORCHESTRATE_TARGET;

/// A cache entry a caller currently holds a shared (or, briefly, exclusive)
/// lock on.
///
/// Dropping a `CacheEntry` releases the lock through
/// [`lifecycle::unlock_and_close`]. If another owner of the same descriptor
/// is still alive elsewhere in the process — a concurrent reader, say — the
/// explicit `fcntl` unlock is skipped and the kernel releases the lock
/// automatically once the last descriptor referring to the file is closed.
pub struct CacheEntry {
    inner: Arc<CacheInner>,
    path: Utf8PathBuf,
    file: Arc<File>,
}

impl CacheEntry {
    pub(crate) fn new(inner: Arc<CacheInner>, path: Utf8PathBuf, file: Arc<File>) -> Self {
        Self { inner, path, file }
    }

    /// Path of the underlying cache file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// The locked file, for reading.
    #[must_use]
    pub fn file(&self) -> &File {
        &self.file
    }
}

impl Drop for CacheEntry {
    fn drop(&mut self) {
        if let Err(err) = lifecycle::unlock_and_close(&self.inner.registry, &self.path) {
            warn!(target: ORCHESTRATE_TARGET, path = %self.path, %err, "failed to release cache entry lock");
        }
    }
}

/// Runs the get-or-build flow for `source_id`: serve an existing valid entry
/// if one exists, otherwise build one via `produce` and return it.
///
/// `produce` must write the complete artifact to the file it's given and
/// return `Ok(())`, or return `Err` to abort the build — the partially
/// written file is then unlinked. `valid` is called at most once, against an
/// existing entry, to decide whether it should be purged and rebuilt.
///
/// # Errors
///
/// Returns [`Error::NameTooLong`] if the mangled name is too long,
/// [`Error::BuildFailed`] if `produce` fails, [`Error::Unexpected`] if an
/// entry vanishes between losing the creation race and the follow-up read
/// lock, or [`Error::Io`]/[`Error::Lock`] for other failures.
pub(crate) fn get_or_build<P, V>(
    inner: &Arc<CacheInner>,
    source_id: &str,
    mangle: bool,
    produce: P,
    valid: V,
) -> Result<CacheEntry>
where
    P: FnOnce(&str, &mut File) -> Result<()>,
    V: FnOnce(&Utf8Path, &str) -> bool,
{
    let path = mangle::cache_file_name(&inner.directory, &inner.prefix, source_id, mangle)?;

    if path.as_std_path().exists() && !valid(&path, source_id) {
        lifecycle::purge_file(&inner.control, &inner.registry, &path)?;
    }

    if let Some(file) = lifecycle::get_read_lock(&inner.control, &inner.registry, &path)? {
        info!(target: ORCHESTRATE_TARGET, path = %path, "cache hit");
        return Ok(CacheEntry::new(Arc::clone(inner), path, file));
    }

    match lifecycle::create_and_lock_for_build(&inner.control, &path)? {
        Some(file) => build_and_finish(inner, &path, file, produce),
        None => claim_after_lost_race(inner, &path),
    }
}

fn build_and_finish<P>(
    inner: &Arc<CacheInner>,
    path: &Utf8Path,
    mut file: File,
    produce: P,
) -> Result<CacheEntry>
where
    P: FnOnce(&str, &mut File) -> Result<()>,
{
    let source_id = path
        .file_name()
        .and_then(|name| name.strip_prefix(inner.prefix.as_str()))
        .unwrap_or_default();

    if let Err(err) = produce(source_id, &mut file) {
        warn!(target: ORCHESTRATE_TARGET, path = %path, "build failed, unlinking partial entry");
        let _ = std::fs::remove_file(path.as_std_path());
        return Err(err);
    }

    let size = eviction::update_cache_info(&inner.control, path)?;
    if eviction::cache_too_big(size, inner.max_bytes) {
        eviction::update_and_purge(
            &inner.control,
            &inner.directory,
            &inner.prefix,
            &mangle::control_file_name(&inner.prefix),
            inner.max_bytes,
            path,
        )?;
    }

    lifecycle::exclusive_to_shared(&file, path)?;
    let file = lifecycle::register(&inner.registry, path, file);
    info!(target: ORCHESTRATE_TARGET, path = %path, "cache entry built");
    Ok(CacheEntry::new(Arc::clone(inner), path.to_path_buf(), file))
}

fn claim_after_lost_race(inner: &Arc<CacheInner>, path: &Utf8Path) -> Result<CacheEntry> {
    match lifecycle::get_read_lock(&inner.control, &inner.registry, path)? {
        Some(file) => Ok(CacheEntry::new(Arc::clone(inner), path.to_path_buf(), file)),
        None => Err(Error::Unexpected(path.to_path_buf())),
    }
}

/// A validity predicate that accepts an entry when it exists, is non-empty,
/// and was modified no earlier than `source_modified`.
///
/// One of the two canonical predicates: suitable when the cache stores a
/// derivative of a source file whose own modification time is known.
#[must_use]
pub fn existence_and_mtime(source_modified: SystemTime) -> impl Fn(&Utf8Path, &str) -> bool {
    move |path: &Utf8Path, _source_id: &str| {
        let Ok(metadata) = std::fs::metadata(path.as_std_path()) else {
            return false;
        };
        if metadata.len() == 0 {
            return false;
        }
        metadata
            .modified()
            .is_ok_and(|modified| modified >= source_modified)
    }
}

/// A validity predicate that accepts an entry when it exists and its size
/// matches `expected_bytes` exactly.
///
/// The other canonical predicate: suitable when the producer's output size
/// is known ahead of time (e.g. a fixed-format transcode).
#[must_use]
pub fn expected_size(expected_bytes: u64) -> impl Fn(&Utf8Path, &str) -> bool {
    move |path: &Utf8Path, _source_id: &str| {
        std::fs::metadata(path.as_std_path()).is_ok_and(|metadata| metadata.len() == expected_bytes)
    }
}
