//! Bounded model handle cache with single-flight loading and LRU eviction.
//!
//! Bookkeeping (entries, access order, in-flight loads, counters) lives behind
//! one mutex that is never held across an `.await`. Loads run on their own
//! task, so a slow load for one key never blocks hits or loads for another,
//! and a caller that goes away does not cancel the load for the others.

mod types;

pub use types::{CacheKey, CacheStats, Lookup, ServedFrom};

use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::CacheConfig;
use crate::error::{ConfigError, LoadError};
use crate::handle::{Handle, HandleLoader};
use crate::metrics::MetricsRecorder;
use types::CachedHandle;

type LoadOutcome = Result<Handle, LoadError>;
type InFlightLoad = Shared<BoxFuture<'static, LoadOutcome>>;

#[derive(Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    load_failures: u64,
    coalesced: u64,
}

struct CacheState {
    entries: LruCache<CacheKey, CachedHandle>,
    /// Last value handed out as a `last_access`; strictly increasing
    sequence: u64,
    in_flight: HashMap<CacheKey, InFlightLoad>,
    counters: Counters,
}

impl CacheState {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
            sequence: 0,
            in_flight: HashMap::new(),
            counters: Counters::default(),
        }
    }

    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Mark `key` most recently used and return its entry
    fn touch(&mut self, key: &CacheKey) -> Option<&mut CachedHandle> {
        if !self.entries.contains(key) {
            return None;
        }
        let sequence = self.next_sequence();
        let cached = self.entries.get_mut(key)?;
        cached.last_access = sequence;
        Some(cached)
    }

    /// Insert as most recently used, evicting the least recently used entry
    /// when full. Returns the evicted key.
    fn insert(&mut self, key: CacheKey, handle: Handle) -> Option<CacheKey> {
        let sequence = self.next_sequence();
        match self.entries.push(key.clone(), CachedHandle::new(handle, sequence)) {
            // push hands back the old value when the key was already cached
            Some((evicted, _)) if evicted != key => {
                self.counters.evictions += 1;
                Some(evicted)
            }
            _ => None,
        }
    }

    /// Resolve a finished load. Runs exactly once per in-flight marker.
    fn complete_load(&mut self, key: &CacheKey, outcome: &LoadOutcome) {
        self.in_flight.remove(key);
        self.counters.misses += 1;

        match outcome {
            Ok(handle) => {
                if let Some(evicted) = self.insert(key.clone(), Arc::clone(handle)) {
                    info!(
                        model = %evicted.model_name(),
                        task = %evicted.task(),
                        device = evicted.device(),
                        "Evicted LRU handle from cache"
                    );
                }
            }
            Err(_) => self.counters.load_failures += 1,
        }
    }
}

enum Pending {
    Lead(InFlightLoad),
    Join(InFlightLoad),
}

/// Model handle cache.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct ModelCache {
    state: Arc<Mutex<CacheState>>,
    loader: Arc<dyn HandleLoader>,
    metrics: Arc<dyn MetricsRecorder>,
    load_timeout: Option<Duration>,
}

impl ModelCache {
    /// Create a new cache with the given configuration.
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn new(
        config: &CacheConfig,
        loader: Arc<dyn HandleLoader>,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let capacity = NonZeroUsize::new(config.capacity).ok_or(ConfigError::InvalidCapacity)?;

        Ok(Self {
            state: Arc::new(Mutex::new(CacheState::new(capacity))),
            loader,
            metrics,
            load_timeout: config.load_timeout(),
        })
    }

    /// Return the handle for `key`, loading it if needed.
    ///
    /// A cached entry is returned without waiting on any load. If a load for
    /// `key` is already running, this waits for it instead of starting a
    /// second one, and receives the same handle or the same error.
    ///
    /// # Errors
    /// Returns the `LoadError` of the load that served this lookup. Failed
    /// loads are not cached; the next lookup retries.
    pub async fn get_or_load(&self, key: &CacheKey) -> Result<Lookup, LoadError> {
        let pending = {
            let mut state = self.state.lock();

            let hit = state.touch(key).map(|cached| {
                cached.hits += 1;
                Arc::clone(&cached.handle)
            });
            if let Some(handle) = hit {
                state.counters.hits += 1;
                debug!(model = %key.model_name(), task = %key.task(), "Cache hit");
                return Ok(Lookup {
                    handle,
                    served_from: ServedFrom::Hit,
                });
            }

            let existing = state.in_flight.get(key).cloned();
            match existing {
                Some(load) => Pending::Join(load),
                None => {
                    let load = self.spawn_load(key.clone());
                    state.in_flight.insert(key.clone(), load.clone());
                    Pending::Lead(load)
                }
            }
        };

        match pending {
            Pending::Lead(load) => {
                let handle = load.await?;
                Ok(Lookup {
                    handle,
                    served_from: ServedFrom::Loaded,
                })
            }
            Pending::Join(load) => {
                debug!(model = %key.model_name(), task = %key.task(), "Waiting on in-flight load");
                let handle = load.await?;

                let mut state = self.state.lock();
                if let Some(cached) = state.touch(key) {
                    cached.hits += 1;
                }
                state.counters.hits += 1;
                state.counters.coalesced += 1;

                Ok(Lookup {
                    handle,
                    served_from: ServedFrom::Coalesced,
                })
            }
        }
    }

    /// Start the load for `key` on its own task. Caller holds the state lock
    /// and must register the returned future as the key's in-flight marker.
    fn spawn_load(&self, key: CacheKey) -> InFlightLoad {
        let state = Arc::clone(&self.state);
        let loader = Arc::clone(&self.loader);
        let metrics = Arc::clone(&self.metrics);
        let load_timeout = self.load_timeout;
        let task_key = key.clone();

        let task = tokio::spawn(async move {
            let key = task_key;
            info!(
                pid = crate::worker_pid(),
                model = %key.model_name(),
                task = %key.task(),
                device = key.device(),
                "Loading pipeline"
            );

            let started = Instant::now();
            let load = AssertUnwindSafe(loader.load(&key)).catch_unwind();
            let outcome = match load_timeout {
                Some(budget) => match tokio::time::timeout(budget, load).await {
                    Ok(outcome) => outcome,
                    Err(_) => Ok(Err(LoadError::timed_out(&key, budget))),
                },
                None => load.await,
            }
            .unwrap_or_else(|_| Err(LoadError::aborted(&key, "loader panicked")));
            let elapsed = started.elapsed();
            metrics.observe_load(key.model_name(), key.task(), elapsed);

            match &outcome {
                Ok(_) => info!(
                    pid = crate::worker_pid(),
                    model = %key.model_name(),
                    task = %key.task(),
                    elapsed_secs = elapsed.as_secs_f64(),
                    "Loaded pipeline"
                ),
                Err(err) => error!(
                    pid = crate::worker_pid(),
                    model = %key.model_name(),
                    task = %key.task(),
                    error = %err,
                    "Failed to load pipeline"
                ),
            }

            state.lock().complete_load(&key, &outcome);
            outcome
        });

        let cleanup_state = Arc::clone(&self.state);
        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    // The load task never reached complete_load.
                    warn!(model = %key.model_name(), task = %key.task(), error = %join_err, "Load task aborted");
                    let outcome = Err(LoadError::aborted(&key, join_err.to_string()));
                    cleanup_state.lock().complete_load(&key, &outcome);
                    outcome
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Cached handle for `key` without touching recency or counters
    pub fn peek(&self, key: &CacheKey) -> Option<Handle> {
        self.state
            .lock()
            .entries
            .peek(key)
            .map(|cached| Arc::clone(&cached.handle))
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state.lock().entries.contains(key)
    }

    /// Cached keys, least recently used first
    pub fn keys(&self) -> Vec<CacheKey> {
        self.state
            .lock()
            .entries
            .iter()
            .rev()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Age of the cached entry for `key`
    pub fn entry_age(&self, key: &CacheKey) -> Option<Duration> {
        self.state
            .lock()
            .entries
            .peek(key)
            .map(|cached| cached.loaded_at.elapsed())
    }

    /// Hits served by the cached entry for `key` since it was loaded
    pub fn entry_hits(&self, key: &CacheKey) -> Option<u64> {
        self.state.lock().entries.peek(key).map(|cached| cached.hits)
    }

    /// Drop the cached entry for `key`. Not counted as an eviction.
    ///
    /// Returns `true` if an entry was removed.
    pub fn remove(&self, key: &CacheKey) -> bool {
        let removed = self.state.lock().entries.pop(key).is_some();
        if removed {
            info!(model = %key.model_name(), task = %key.task(), "Removed handle from cache");
        }
        removed
    }

    /// Drop every cached entry. In-flight loads are unaffected.
    pub fn clear(&self) {
        let cleared_count = {
            let mut state = self.state.lock();
            let cleared = state.entries.len();
            state.entries.clear();
            cleared
        };
        info!(cleared_count, "Cleared all handles from cache");
    }

    /// Snapshot of the cache counters, taken under the cache lock
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: state.counters.hits,
            misses: state.counters.misses,
            evictions: state.counters.evictions,
            load_failures: state.counters.load_failures,
            coalesced: state.counters.coalesced,
            current_size: state.entries.len(),
            capacity: state.entries.cap().get(),
            in_flight: state.in_flight.len(),
        }
    }

    /// Access sequence of `key`, if cached
    #[doc(hidden)]
    pub fn last_access(&self, key: &CacheKey) -> Option<u64> {
        self.state
            .lock()
            .entries
            .peek(key)
            .map(|cached| cached.last_access)
    }
}
