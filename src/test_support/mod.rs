//! Fixtures shared by the multi-process integration tests.
//!
//! Spawns the real [`lock_worker`](../bin/lock_worker.rs) binary via
//! [`std::process::Command`] rather than threads, so tests exercise genuine
//! cross-process `fcntl` contention instead of an in-process approximation.

use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};

/// How long [`WorkerProcess::wait_for_marker`] polls before giving up.
const MARKER_TIMEOUT: Duration = Duration::from_secs(10);

/// Locates the `lock_worker` binary built alongside the test harness.
///
/// Mirrors `cargo`'s own convention of placing test/integration binaries
/// next to the test executable under `target/<profile>/`.
#[must_use]
pub fn lock_worker_binary() -> Utf8PathBuf {
    let mut path = std::env::current_exe().expect("current test executable path");
    path.pop(); // test binary name
    if path.ends_with("deps") {
        path.pop();
    }
    path.push(if cfg!(windows) {
        "lock_worker.exe"
    } else {
        "lock_worker"
    });
    Utf8PathBuf::from_path_buf(path).expect("utf8 binary path")
}

/// A running `lock_worker` process.
///
/// Progress is observed through marker files `lock_worker.<id>.<stage>` that
/// `lock_worker` writes into the cache directory as it reaches each stage,
/// rather than through stdout, which keeps both sides off the `print_stdout`
/// hook and gives a synchronisation signal that survives the child being
/// killed mid-run.
pub struct WorkerProcess {
    child: Child,
    directory: Utf8PathBuf,
    source_id: String,
}

impl WorkerProcess {
    /// Spawns `lock_worker <mode> <dir> <prefix> <max_bytes> <id> <hold_ms>`.
    #[must_use]
    pub fn spawn(
        mode: &str,
        dir: &Utf8Path,
        prefix: &str,
        max_bytes: u64,
        source_id: &str,
        hold_ms: u64,
    ) -> Self {
        let child = Command::new(lock_worker_binary().as_std_path())
            .args([
                mode,
                dir.as_str(),
                prefix,
                &max_bytes.to_string(),
                source_id,
                &hold_ms.to_string(),
            ])
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .expect("spawn lock_worker");
        Self {
            child,
            directory: dir.to_path_buf(),
            source_id: source_id.to_string(),
        }
    }

    fn marker_path(&self, stage: &str) -> Utf8PathBuf {
        self.directory.join(format!("lock_worker.{}.{stage}", self.source_id))
    }

    /// Blocks until `lock_worker` creates its `stage` marker file, or panics
    /// if the process exits first without reaching it, or if `stage` never
    /// appears within [`MARKER_TIMEOUT`].
    pub fn wait_for_marker(&mut self, stage: &str) {
        let marker = self.marker_path(stage);
        let deadline = Instant::now() + MARKER_TIMEOUT;
        loop {
            if marker.as_std_path().exists() {
                return;
            }
            if let Ok(Some(status)) = self.child.try_wait() {
                assert!(
                    marker.as_std_path().exists(),
                    "lock_worker exited ({status:?}) before reaching stage {stage:?}"
                );
                return;
            }
            assert!(Instant::now() < deadline, "timed out waiting for lock_worker stage {stage:?}");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Waits for the process to exit, asserting it succeeded.
    pub fn wait_success(&mut self) {
        let status = self.child.wait().expect("wait for lock_worker");
        assert!(status.success(), "lock_worker exited with {status:?}");
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Sleeps briefly. Integration tests poll file-system-visible state rather
/// than relying on fixed delays for correctness, but a short settle time
/// avoids spinning on a file that hasn't been created yet.
pub fn settle() {
    std::thread::sleep(Duration::from_millis(50));
}
