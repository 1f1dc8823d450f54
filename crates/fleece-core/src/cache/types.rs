//! Core data types for handle caching.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

use crate::handle::Handle;

/// Cache key for identifying loaded handles.
///
/// Handles are cached by (model, task, device); equality and hashing are
/// structural. Fields are private so a key cannot change once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    model_name: String,
    task: String,
    device: i32,
}

impl CacheKey {
    pub fn new<M: Into<String>, T: Into<String>>(model_name: M, task: T, device: i32) -> Self {
        Self {
            model_name: model_name.into(),
            task: task.into(),
            device,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    /// Device ordinal; negative means CPU
    pub fn device(&self) -> i32 {
        self.device
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.model_name, self.task, self.device)
    }
}

/// A cached handle with metadata.
#[derive(Clone)]
pub(crate) struct CachedHandle {
    pub handle: Handle,
    pub loaded_at: Instant,
    pub hits: u64,
    /// Cache-wide access sequence of the latest insert or hit
    pub last_access: u64,
}

impl CachedHandle {
    pub fn new(handle: Handle, last_access: u64) -> Self {
        Self {
            handle,
            loaded_at: Instant::now(),
            hits: 0,
            last_access,
        }
    }
}

/// Which path produced the handle for a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServedFrom {
    /// Entry was already cached
    Hit,
    /// This caller ran the load
    Loaded,
    /// This caller waited on another caller's in-flight load
    Coalesced,
}

impl ServedFrom {
    /// True unless this caller paid for the load itself
    pub fn is_cached(self) -> bool {
        !matches!(self, ServedFrom::Loaded)
    }
}

/// Result of a successful [`super::ModelCache::get_or_load`]
#[derive(Clone)]
pub struct Lookup {
    pub handle: Handle,
    pub served_from: ServedFrom,
}

impl fmt::Debug for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lookup")
            .field("served_from", &self.served_from)
            .finish_non_exhaustive()
    }
}

/// Cache statistics for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups served without running a load (including coalesced waiters).
    pub hits: u64,
    /// Loads started because no entry existed (successful or not).
    pub misses: u64,
    /// Entries dropped to make room for a new one.
    pub evictions: u64,
    /// Loads that failed; never cached.
    pub load_failures: u64,
    /// Lookups that joined another caller's in-flight load.
    pub coalesced: u64,
    /// Current number of cached handles.
    pub current_size: usize,
    /// Maximum number of cached handles.
    pub capacity: usize,
    /// Loads currently running.
    pub in_flight: usize,
}

impl CacheStats {
    /// Fraction of lookups served from cache, 0.0 when nothing was looked up yet
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
