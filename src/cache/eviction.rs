//! Aggregate size accounting and least-recently-used eviction.

use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::cache::control::ControlFile;
use crate::cache::lock::{self, NonBlockingAttempt};
use crate::error::{Error, Result};
use crate::observability::EVICTION_TARGET;

/// Eviction stops once the cache is back under this fraction of
/// [`crate::CacheConfig::max_bytes`], so a single build doesn't immediately
/// retrigger a purge on the next build.
const EVICTION_TARGET_NUMERATOR: u64 = 4;
const EVICTION_TARGET_DENOMINATOR: u64 = 5;

/// One entry discovered by a directory scan: its path, on-disk size and
/// last-access time.
struct DirEntryInfo {
    path: Utf8PathBuf,
    size: u64,
    accessed: SystemTime,
}

/// Adds `target`'s on-disk size to the recorded aggregate and returns the
/// new total. Takes an exclusive lock on the control file for the duration.
///
/// # Errors
///
/// Returns [`Error::Io`] if `target`'s metadata cannot be read, or
/// [`Error::Lock`]/[`Error::Io`] from the control file itself.
pub(crate) fn update_cache_info(control: &ControlFile, target: &Utf8Path) -> Result<u64> {
    let mut guard = control.lock_exclusive()?;
    let added = std::fs::metadata(target.as_std_path())
        .map_err(|err| Error::io("stat", target, err))?
        .len();
    let new_size = guard.read_size()?.saturating_add(added);
    guard.write_size(new_size)?;
    debug!(target: EVICTION_TARGET, path = %target, new_size, "updated cache size");
    Ok(new_size)
}

/// Whether `current_size` exceeds `max_bytes`. A `max_bytes` of `0` means
/// unlimited, so this always returns `false` in that case.
pub(crate) const fn cache_too_big(current_size: u64, max_bytes: u64) -> bool {
    max_bytes != 0 && current_size > max_bytes
}

/// Reads the recorded aggregate size under a shared lock.
///
/// # Errors
///
/// Returns [`Error::Lock`]/[`Error::Io`] from the control file.
pub(crate) fn get_cache_size(control: &ControlFile) -> Result<u64> {
    let mut guard = control.lock_shared()?;
    guard.read_size()
}

/// Scans `directory` for files whose basename starts with `prefix`,
/// excluding `control_basename`, and returns them oldest-accessed first
/// alongside their total size.
fn collect_cache_dir_info(
    directory: &Utf8Path,
    prefix: &str,
    control_basename: &str,
) -> Result<(Vec<DirEntryInfo>, u64)> {
    let mut entries = Vec::new();
    let mut total = 0u64;

    let read_dir =
        std::fs::read_dir(directory.as_std_path()).map_err(|err| Error::io("readdir", directory, err))?;

    for dir_entry in read_dir {
        let dir_entry = dir_entry.map_err(|err| Error::io("readdir", directory, err))?;
        let Ok(name) = dir_entry.file_name().into_string() else {
            continue;
        };
        if !name.starts_with(prefix) || name == control_basename {
            continue;
        }

        let metadata = dir_entry
            .metadata()
            .map_err(|err| Error::io("stat", directory, err))?;
        if !metadata.is_file() {
            continue;
        }

        let path = directory.join(&name);
        let size = metadata.len();
        let accessed = metadata
            .accessed()
            .map_err(|err| Error::io("stat", &path, err))?;
        total += size;
        entries.push(DirEntryInfo { path, size, accessed });
    }

    entries.sort_by_key(|entry| entry.accessed);
    Ok((entries, total))
}

/// Recomputes the cache's authoritative size by scanning `directory`, and if
/// it exceeds `max_bytes`, deletes the oldest-accessed entries (skipping
/// `new_file`, whichever file this process just added) until the cache is
/// back under four-fifths of `max_bytes`.
///
/// A `max_bytes` of `0` disables eviction entirely. Candidates this process
/// or another process already holds locked are skipped rather than waited
/// on, so a build in progress elsewhere is never purged out from under it.
///
/// # Errors
///
/// Returns [`Error::Io`] if the directory cannot be scanned, or
/// [`Error::Lock`]/[`Error::Io`] from the control file.
pub(crate) fn update_and_purge(
    control: &ControlFile,
    directory: &Utf8Path,
    prefix: &str,
    control_basename: &str,
    max_bytes: u64,
    new_file: &Utf8Path,
) -> Result<()> {
    if max_bytes == 0 {
        debug!(target: EVICTION_TARGET, "cache is unlimited, skipping purge");
        return Ok(());
    }

    let mut guard = control.lock_exclusive()?;
    let (entries, mut computed_size) = collect_cache_dir_info(directory, prefix, control_basename)?;

    if cache_too_big(computed_size, max_bytes) {
        let target_size = max_bytes * EVICTION_TARGET_NUMERATOR / EVICTION_TARGET_DENOMINATOR;

        for entry in entries {
            if computed_size <= target_size {
                break;
            }
            if entry.path == new_file {
                continue;
            }

            match lock::open_exclusive_nonblocking(&entry.path)? {
                NonBlockingAttempt::Acquired(file) => {
                    debug!(target: EVICTION_TARGET, path = %entry.path, "evicting");
                    if std::fs::remove_file(entry.path.as_std_path()).is_ok() {
                        computed_size = computed_size.saturating_sub(entry.size);
                    }
                    lock::unlock_close(file, &entry.path)?;
                }
                NonBlockingAttempt::Contended | NonBlockingAttempt::Missing => {
                    // Another process has it locked, or it's already gone;
                    // leave it and move on to the next candidate.
                }
            }
        }
    }

    guard.write_size(computed_size)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{FileTime, set_file_atime};
    use tempfile::tempdir;

    fn utf8(path: &std::path::Path) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(path.to_path_buf()).expect("utf8 path")
    }

    fn fresh_control(dir: &std::path::Path) -> ControlFile {
        ControlFile::open_or_create(utf8(&dir.join("p_cache_control"))).expect("control file")
    }

    #[test]
    fn cache_too_big_is_false_when_unlimited() {
        assert!(!cache_too_big(u64::MAX, 0));
    }

    #[test]
    fn cache_too_big_compares_against_max() {
        assert!(cache_too_big(100, 50));
        assert!(!cache_too_big(50, 100));
    }

    #[test]
    fn update_cache_info_accumulates_size() {
        let dir = tempdir().expect("tempdir");
        let control = fresh_control(dir.path());

        let target = utf8(&dir.path().join("pentry"));
        std::fs::write(&target, b"0123456789").expect("write 10 bytes");

        let size = update_cache_info(&control, &target).expect("update");
        assert_eq!(size, 10);

        let size_again = update_cache_info(&control, &target).expect("update again");
        assert_eq!(size_again, 20);
    }

    #[test]
    fn get_cache_size_reads_current_value() {
        let dir = tempdir().expect("tempdir");
        let control = fresh_control(dir.path());
        assert_eq!(get_cache_size(&control).expect("read"), 0);
    }

    #[test]
    fn update_and_purge_evicts_oldest_entries_first() {
        let dir = tempdir().expect("tempdir");
        let control = fresh_control(dir.path());
        let directory = utf8(dir.path());

        let old = utf8(&dir.path().join("pold"));
        let middle = utf8(&dir.path().join("pmiddle"));
        let newest = utf8(&dir.path().join("pnewest"));

        for path in [&old, &middle, &newest] {
            std::fs::write(path, vec![0u8; 100]).expect("write 100 bytes");
        }

        set_file_atime(&old, FileTime::from_unix_time(1_000, 0)).expect("set atime");
        set_file_atime(&middle, FileTime::from_unix_time(2_000, 0)).expect("set atime");
        set_file_atime(&newest, FileTime::from_unix_time(3_000, 0)).expect("set atime");

        update_and_purge(&control, &directory, "p", "pcache_control", 150, &newest)
            .expect("purge succeeds");

        assert!(!old.as_std_path().exists(), "oldest entry should be evicted");
        assert!(newest.as_std_path().exists(), "just-added entry is protected");
    }

    #[test]
    fn update_and_purge_is_noop_when_unlimited() {
        let dir = tempdir().expect("tempdir");
        let control = fresh_control(dir.path());
        let directory = utf8(dir.path());

        let entry = utf8(&dir.path().join("pentry"));
        std::fs::write(&entry, vec![0u8; 1000]).expect("write");

        update_and_purge(&control, &directory, "p", "pcache_control", 0, &entry)
            .expect("no-op succeeds");
        assert!(entry.as_std_path().exists());
    }
}
