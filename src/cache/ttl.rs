//! Keyed in-memory store with per-entry time-to-live.
//!
//! Expired entries are evicted lazily when a lookup touches them, and
//! proactively by a background sweep that runs on a fixed interval.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::stats::{CacheStats, Counters};

/// How often the background sweep purges expired entries.
pub const DEFAULT_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// A stored value together with the time it was written and its lifetime.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
  pub data: V,
  pub timestamp: DateTime<Utc>,
  pub ttl: Duration,
}

impl<V> CacheEntry<V> {
  /// An entry is expired once strictly more than `ttl` has elapsed.
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    now - self.timestamp > self.ttl
  }
}

struct State<V> {
  entries: HashMap<String, CacheEntry<V>>,
  default_ttl: Duration,
  counters: Counters,
}

struct Shared<V> {
  state: Mutex<State<V>>,
  clock: Arc<dyn Clock>,
}

impl<V> Shared<V> {
  fn purge_expired(&self) -> usize {
    let now = self.clock.now();
    let mut state = self.state.lock();
    let before = state.entries.len();
    state.entries.retain(|_, entry| !entry.is_expired(now));
    let purged = before - state.entries.len();
    state.counters.evictions += purged as u64;
    purged
  }
}

/// Generic TTL cache keyed by string.
///
/// All operations take a single mutex per instance. Calling any method after
/// [`TtlCache::destroy`] is a caller error: nothing guards against it, and the
/// instance keeps working without its sweep.
pub struct TtlCache<V> {
  shared: Arc<Shared<V>>,
  sweep: CancellationToken,
}

impl<V: Clone + Send + 'static> TtlCache<V> {
  /// Create a cache on the system clock with the default sweep interval.
  pub fn new(default_ttl: Duration) -> Self {
    Self::with_clock(default_ttl, DEFAULT_SWEEP_INTERVAL, Arc::new(SystemClock))
  }

  /// Create a cache with an explicit sweep interval and clock.
  ///
  /// The sweep is only started when called from inside a tokio runtime;
  /// elsewhere expired entries are evicted lazily.
  pub fn with_clock(
    default_ttl: Duration,
    sweep_interval: std::time::Duration,
    clock: Arc<dyn Clock>,
  ) -> Self {
    let shared = Arc::new(Shared {
      state: Mutex::new(State {
        entries: HashMap::new(),
        default_ttl,
        counters: Counters::default(),
      }),
      clock,
    });
    let sweep = CancellationToken::new();
    spawn_sweep(Arc::downgrade(&shared), sweep_interval, sweep.clone());

    Self { shared, sweep }
  }

  /// Look up a value, counting a hit or a miss.
  ///
  /// An expired entry is removed and counted as both an eviction and a miss.
  pub fn get(&self, key: &str) -> Option<V> {
    let now = self.shared.clock.now();
    let mut guard = self.shared.state.lock();
    let state = &mut *guard;

    match state.entries.get(key).map(|entry| entry.is_expired(now)) {
      None => {
        state.counters.misses += 1;
        None
      }
      Some(true) => {
        state.entries.remove(key);
        state.counters.evictions += 1;
        state.counters.misses += 1;
        trace!(key, "Evicted expired entry on read");
        None
      }
      Some(false) => {
        state.counters.hits += 1;
        state.entries.get(key).map(|entry| entry.data.clone())
      }
    }
  }

  /// Insert or replace a value. `ttl` falls back to the default TTL.
  pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
    let timestamp = self.shared.clock.now();
    let mut state = self.shared.state.lock();
    let ttl = ttl.unwrap_or(state.default_ttl);
    state.entries.insert(
      key.into(),
      CacheEntry {
        data: value,
        timestamp,
        ttl,
      },
    );
  }

  /// Presence check.
  ///
  /// Evicts an expired entry (counting the eviction) but never counts a hit
  /// or a miss.
  pub fn has(&self, key: &str) -> bool {
    let now = self.shared.clock.now();
    let mut guard = self.shared.state.lock();
    let state = &mut *guard;

    match state.entries.get(key).map(|entry| entry.is_expired(now)) {
      None => false,
      Some(true) => {
        state.entries.remove(key);
        state.counters.evictions += 1;
        false
      }
      Some(false) => true,
    }
  }

  /// Remove an entry regardless of expiry. Returns whether one was removed.
  pub fn delete(&self, key: &str) -> bool {
    self.shared.state.lock().entries.remove(key).is_some()
  }

  /// Remove every entry, counting each as an eviction.
  pub fn clear(&self) {
    let mut state = self.shared.state.lock();
    let removed = state.entries.len();
    state.entries.clear();
    state.counters.evictions += removed as u64;
  }

  pub fn stats(&self) -> CacheStats {
    let state = self.shared.state.lock();
    CacheStats::new(state.counters, state.entries.len())
  }

  /// Zero the counters without touching stored entries.
  pub fn reset_stats(&self) {
    self.shared.state.lock().counters.reset();
  }

  /// Snapshot of every unexpired entry. Expired entries are skipped but not evicted.
  pub fn get_all(&self) -> HashMap<String, V> {
    let now = self.shared.clock.now();
    let state = self.shared.state.lock();
    state
      .entries
      .iter()
      .filter(|(_, entry)| !entry.is_expired(now))
      .map(|(key, entry)| (key.clone(), entry.data.clone()))
      .collect()
  }

  /// Change the TTL applied to future `set` calls without an explicit TTL.
  pub fn set_default_ttl(&self, ttl: Duration) {
    self.shared.state.lock().default_ttl = ttl;
  }

  pub fn default_ttl(&self) -> Duration {
    self.shared.state.lock().default_ttl
  }

  /// Remove every expired entry now. Returns how many were removed.
  pub fn purge_expired(&self) -> usize {
    self.shared.purge_expired()
  }

  pub fn len(&self) -> usize {
    self.shared.state.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Stop the background sweep and clear the cache.
  pub fn destroy(&self) {
    self.sweep.cancel();
    self.clear();
  }

  pub fn is_destroyed(&self) -> bool {
    self.sweep.is_cancelled()
  }
}

impl<V> Drop for TtlCache<V> {
  fn drop(&mut self) {
    self.sweep.cancel();
  }
}

/// Lifecycle operations shared by every cache regardless of value type.
pub trait CacheControl: Send + Sync {
  fn clear(&self);
  fn destroy(&self);
  fn stats(&self) -> CacheStats;
}

impl<V: Clone + Send + 'static> CacheControl for TtlCache<V> {
  fn clear(&self) {
    TtlCache::clear(self)
  }

  fn destroy(&self) {
    TtlCache::destroy(self)
  }

  fn stats(&self) -> CacheStats {
    TtlCache::stats(self)
  }
}

/// Start the periodic sweep.
///
/// The task holds only a weak reference, so it ends on its own once the
/// cache is dropped, and tokio never waits on it at shutdown.
fn spawn_sweep<V: Send + 'static>(
  shared: Weak<Shared<V>>,
  every: std::time::Duration,
  token: CancellationToken,
) {
  if every.is_zero() {
    return;
  }
  let Ok(runtime) = tokio::runtime::Handle::try_current() else {
    debug!("No tokio runtime, cache sweep disabled");
    return;
  };
  let Some(start) = tokio::time::Instant::now().checked_add(every) else {
    debug!(?every, "Sweep interval out of range, cache sweep disabled");
    return;
  };

  runtime.spawn(async move {
    let mut interval = tokio::time::interval_at(start, every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        _ = token.cancelled() => break,
        _ = interval.tick() => {
          let Some(shared) = shared.upgrade() else {
            break;
          };
          let purged = shared.purge_expired();
          if purged > 0 {
            debug!(purged, "Swept expired cache entries");
          }
        }
      }
    }
  });
}
