//! Exercises a [`flock_cache::Cache`] from a standalone process, so
//! integration tests can assert genuine cross-process lock behaviour rather
//! than same-process approximations.
//!
//! Usage:
//!
//! ```text
//! lock_worker <build|read> <cache-dir> <prefix> <max-bytes> <source-id> <hold-millis>
//! ```
//!
//! `build` runs the get-or-build flow with a producer that writes a fixed
//! payload and sleeps for `hold-millis` before returning, simulating a slow
//! build while holding the entry's exclusive lock. `read` runs the same flow
//! with a producer that panics if invoked (it must only ever observe a cache
//! hit), then sleeps for `hold-millis` while holding the shared lock.
//!
//! Progress is signalled to a watching harness by creating empty marker
//! files named `lock_worker.<source-id>.<stage>` in the cache directory —
//! `building`, `ready`, or `hit` — the moment that stage is reached, so a
//! test can synchronise on the lock actually being held without guessing at
//! timing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use flock_cache::{Cache, CacheConfig};
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    run().map_err(Into::into)
}

fn run() -> Result<(), String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let [mode, dir, prefix, max_bytes, source_id, hold_millis] = args.as_slice() else {
        return Err("usage: lock_worker <build|read> <dir> <prefix> <max-bytes> <id> <hold-ms>".into());
    };

    let max_bytes: u64 = max_bytes.parse().map_err(|_| "max-bytes must be an integer")?;
    let hold = Duration::from_millis(hold_millis.parse().map_err(|_| "hold-ms must be an integer")?);

    let config = CacheConfig::new(dir.as_str(), prefix.as_str(), max_bytes)
        .map_err(|err| format!("invalid config: {err}"))?;
    let cache = Cache::new(config)
        .map_err(|err| format!("cache construction failed: {err}"))?
        .ok_or("cache unexpectedly disabled")?;

    match mode.as_str() {
        "build" => run_build(&cache, dir, source_id, hold),
        "read" => run_read(&cache, dir, source_id, hold),
        other => Err(format!("unknown mode {other:?}")),
    }
}

fn run_build(cache: &Cache, dir: &str, source_id: &str, hold: Duration) -> Result<(), String> {
    let entry = cache
        .get_or_build(
            source_id,
            true,
            |_source_id, file| {
                use std::io::Write as _;
                announce(dir, source_id, "building")?;
                file.write_all(b"built by lock_worker")
                    .map_err(|err| flock_cache::Error::BuildFailed(Box::new(err)))?;
                std::thread::sleep(hold);
                Ok(())
            },
            |_path, _source_id| true,
        )
        .map_err(|err| format!("build failed: {err}"))?;
    announce(dir, source_id, "ready").map_err(|err| format!("failed to write marker: {err}"))?;
    info!("lock_worker build of {source_id} complete");
    drop(entry);
    Ok(())
}

fn run_read(cache: &Cache, dir: &str, source_id: &str, hold: Duration) -> Result<(), String> {
    let entry = cache
        .get_or_build(
            source_id,
            true,
            |_source_id, _file| panic!("lock_worker read mode must only see cache hits"),
            |_path, _source_id| true,
        )
        .map_err(|err| format!("read failed: {err}"))?;
    announce(dir, source_id, "hit").map_err(|err| format!("failed to write marker: {err}"))?;
    info!("lock_worker read of {source_id} complete");
    std::thread::sleep(hold);
    drop(entry);
    Ok(())
}

/// Marker path for `source_id` at `stage` (`building`, `ready`, or `hit`).
///
/// Test harnesses watching this process must build the identical path from
/// the same cache directory and source id.
fn marker_path(dir: &str, source_id: &str, stage: &str) -> PathBuf {
    Path::new(dir).join(format!("lock_worker.{source_id}.{stage}"))
}

fn announce(dir: &str, source_id: &str, stage: &str) -> Result<(), flock_cache::Error> {
    std::fs::write(marker_path(dir, source_id, stage), b"")
        .map_err(|err| flock_cache::Error::BuildFailed(Box::new(err)))
}
