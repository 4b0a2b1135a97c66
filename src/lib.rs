//! A multi-process, file-locking, size-bounded on-disk cache.
//!
//! Entries are ordinary files in a flat directory, protected by POSIX
//! advisory record locks (`fcntl(2)`) so any number of cooperating processes
//! on the same host can safely build, read and evict them concurrently
//! without a lock server. See [`cache`] for the full API.
//!
//! ```no_run
//! use flock_cache::{Cache, CacheConfig};
//!
//! let config = CacheConfig::new("/tmp/example-cache", "demo_", 16 * 1024 * 1024)?;
//! let Some(cache) = Cache::new(config)? else {
//!     return Ok(());
//! };
//!
//! let entry = cache.get_or_build(
//!     "some-source-id",
//!     true,
//!     |_source_id, file| {
//!         use std::io::Write;
//!         file.write_all(b"built artifact bytes")
//!             .map_err(|err| flock_cache::Error::BuildFailed(Box::new(err)))
//!     },
//!     |_path, _source_id| true,
//! )?;
//! println!("entry at {}", entry.path());
//! # Ok::<(), flock_cache::Error>(())
//! ```

mod cache;
mod error;
mod observability;
#[cfg(any(test, feature = "multi-process-tests"))]
pub mod test_support;

pub use cache::{Cache, CacheConfig, CacheEntry, existence_and_mtime, expected_size, shared_cache};
pub use error::{Error, Result};
