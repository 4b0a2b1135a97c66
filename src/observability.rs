//! Shared tracing configuration for observability instrumentation.
//!
//! Centralises the log targets used by the crate so subscribers can filter
//! observability events per subsystem without pulling in unrelated logs.

/// Target used by lock-acquisition spans and logs.
pub(crate) const LOCK_TARGET: &str = "flock_cache::lock";

/// Target used by accounting and eviction spans and logs.
pub(crate) const EVICTION_TARGET: &str = "flock_cache::eviction";

/// Target used by get-or-build orchestration spans and logs.
pub(crate) const ORCHESTRATE_TARGET: &str = "flock_cache::orchestrate";
