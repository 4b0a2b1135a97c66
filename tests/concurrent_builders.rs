//! Two real processes race to build the same cache entry. Only the winner
//! should run the producer; the loser must observe the winner's result
//! through the `Exists` → read-lock race-loss path rather than erroring out.
#![cfg(feature = "multi-process-tests")]

use camino::Utf8PathBuf;
use flock_cache::test_support::WorkerProcess;
use tempfile::tempdir;

#[test]
fn only_one_builder_runs_the_producer() {
    let dir = tempdir().expect("tempdir");
    let directory = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 path");

    let mut first = WorkerProcess::spawn("build", &directory, "p_", 0, "race-target", 300);
    first.wait_for_marker("building");

    // The first builder now holds the exclusive lock while it sleeps. The
    // second builder must lose the creation race and fall back to a read
    // lock once the first finishes, rather than erroring.
    let mut second = WorkerProcess::spawn("build", &directory, "p_", 0, "race-target", 0);

    first.wait_for_marker("ready");
    first.wait_success();
    second.wait_success();

    let entry_path = directory.join("p_race-target");
    assert!(entry_path.as_std_path().exists());
    let contents = std::fs::read_to_string(entry_path.as_std_path()).expect("read entry");
    assert_eq!(contents, "built by lock_worker");
}
