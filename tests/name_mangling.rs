//! Validates that cache entries land at deterministic, mangled paths.

use camino::Utf8PathBuf;
use flock_cache::{Cache, CacheConfig};
use rstest::rstest;
use tempfile::tempdir;

#[rstest]
#[case::question_mark_and_equals("http://host/x?y=1", "p_http###host#x#y#1")]
#[case::plain_identifier("plain-id", "p_plain-id")]
fn mangled_source_ids_produce_expected_basenames(#[case] source_id: &str, #[case] expected_basename: &str) {
    let dir = tempdir().expect("tempdir");
    let directory = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 path");
    let config = CacheConfig::new(directory, "p_", 0).expect("config");
    let cache = Cache::new(config).expect("construct").expect("enabled");

    let entry = cache
        .get_or_build(
            source_id,
            true,
            |_source_id, _file| Ok(()),
            |_path, _source_id| true,
        )
        .expect("build succeeds");

    assert_eq!(entry.path().file_name(), Some(expected_basename));
}

#[test]
fn unmangled_lookup_uses_the_raw_source_id_as_the_basename() {
    let dir = tempdir().expect("tempdir");
    let directory = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 path");
    let config = CacheConfig::new(directory, "p_", 0).expect("config");
    let cache = Cache::new(config).expect("construct").expect("enabled");

    let entry = cache
        .get_or_build("already-safe", false, |_source_id, _file| Ok(()), |_path, _source_id| true)
        .expect("build succeeds");

    assert_eq!(entry.path().file_name(), Some("p_already-safe"));
}

#[test]
fn control_file_is_excluded_from_entry_lookups() {
    let dir = tempdir().expect("tempdir");
    let directory = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 path");
    let config = CacheConfig::new(directory.clone(), "p_", 0).expect("config");
    let cache = Cache::new(config).expect("construct").expect("enabled");
    drop(cache);

    let control_path = directory.join("p_cache_control");
    assert!(control_path.as_std_path().exists());
}
