//! Validates that purging an entry a reader still has a shared lock on does
//! not corrupt the cache's accounting, and that a subsequent rebuild works.

use std::io::Write as _;

use camino::Utf8PathBuf;
use flock_cache::{Cache, CacheConfig};
use tempfile::tempdir;

fn cache_at(dir: &std::path::Path) -> Cache {
    let directory = Utf8PathBuf::from_path_buf(dir.to_path_buf()).expect("utf8 path");
    let config = CacheConfig::new(directory, "p_", 0).expect("config");
    Cache::new(config).expect("construct").expect("enabled")
}

#[test]
fn purging_an_entry_a_reader_still_holds_does_not_break_later_rebuilds() {
    let dir = tempdir().expect("tempdir");
    let cache = cache_at(dir.path());

    let reader = cache
        .get_or_build(
            "shared-target",
            true,
            |_source_id, file| {
                file.write_all(b"first").map_err(|err| flock_cache::Error::BuildFailed(Box::new(err)))
            },
            |_path, _source_id| true,
        )
        .expect("initial build");

    cache.purge("shared-target", true).expect("purge unconditionally");

    let rebuilt = cache
        .get_or_build(
            "shared-target",
            true,
            |_source_id, file| {
                file.write_all(b"second").map_err(|err| flock_cache::Error::BuildFailed(Box::new(err)))
            },
            |_path, _source_id| true,
        )
        .expect("rebuild succeeds");

    let contents = std::fs::read_to_string(rebuilt.path().as_std_path()).expect("read rebuilt entry");
    assert_eq!(contents, "second");

    // The reader's own descriptor, acquired before the purge, is still valid
    // even though the directory entry it pointed at has been unlinked.
    drop(reader);
    drop(rebuilt);
}

#[test]
fn purging_an_absent_entry_is_a_silent_no_op() {
    let dir = tempdir().expect("tempdir");
    let cache = cache_at(dir.path());

    cache.purge("never-built", true).expect("purging an absent entry must not error");
}

#[test]
fn concurrent_readers_of_the_same_entry_both_see_its_content() {
    let dir = tempdir().expect("tempdir");
    let cache = cache_at(dir.path());

    let first = cache
        .get_or_build(
            "double-read",
            true,
            |_source_id, file| {
                file.write_all(b"value").map_err(|err| flock_cache::Error::BuildFailed(Box::new(err)))
            },
            |_path, _source_id| true,
        )
        .expect("build");

    let second = cache
        .get_or_build("double-read", true, |_source_id, _file| panic!("must not rebuild"), |_path, _source_id| true)
        .expect("second lookup hits");

    assert_eq!(first.path(), second.path());
    drop(first);
    drop(second);
}
