//! Construction-time configuration for a [`crate::Cache`].

use camino::Utf8PathBuf;

use crate::error::{Error, Result};

/// Parameters needed to open or create an on-disk cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory the cache lives in. Created if it does not exist.
    pub directory: Utf8PathBuf,
    /// Prefix prepended to every cache file basename, including the control
    /// file's. Lets multiple independent caches coexist in one directory.
    pub prefix: String,
    /// Soft ceiling, in bytes, on the cache's total size. Checked after
    /// every successful build; `0` disables eviction entirely.
    pub max_bytes: u64,
}

impl CacheConfig {
    /// Creates a configuration, rejecting directories and prefixes that
    /// cannot form valid cache paths.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadConfig`] if `directory` is empty.
    pub fn new(
        directory: impl Into<Utf8PathBuf>,
        prefix: impl Into<String>,
        max_bytes: u64,
    ) -> Result<Self> {
        let directory = directory.into();
        if directory.as_str().is_empty() {
            return Err(Error::BadConfig("cache directory must not be empty".into()));
        }
        Ok(Self {
            directory,
            prefix: prefix.into(),
            max_bytes,
        })
    }
}
