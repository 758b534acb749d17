//! Cache layer that orchestrates tiered lookups with network fetching.

use color_eyre::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, trace};

use super::filter::Filter;
use super::snapshot::SnapshotStore;
use super::traits::{CacheResult, Cacheable};
use super::ttl::TtlCache;

/// One logical "list records matching filter" request.
#[derive(Debug, Clone)]
pub struct ListRequest {
  /// Exact TTL cache key for this request
  pub key: String,
  /// Conditions evaluated against snapshot records
  pub filter: Filter,
  /// Maximum number of records to return
  pub limit: Option<usize>,
  /// Identifier lookups never consult the snapshot tier
  pub by_id: bool,
}

impl ListRequest {
  fn allows_snapshot(&self) -> bool {
    !self.by_id && !self.filter.is_empty()
  }
}

/// Cache layer that manages tiered lookups and network fetching.
///
/// By default two concurrent misses on the same key both call the fetcher and
/// the last write wins. With in-flight dedupe enabled, misses on one key are
/// serialized and later callers are served from the TTL cache.
#[derive(Clone, Default)]
pub struct CacheLayer {
  inflight: Option<Arc<InflightLocks>>,
}

impl CacheLayer {
  pub fn new() -> Self {
    Self::default()
  }

  /// Share one fetch between concurrent misses on the same key.
  pub fn with_inflight_dedupe(mut self, enabled: bool) -> Self {
    self.inflight = enabled.then(|| Arc::new(InflightLocks::default()));
    self
  }

  /// Fetch a list through the cache tiers.
  ///
  /// 1. TTL cache hit on the exact key: return it
  /// 2. Non-empty filter and snapshot matches: return the matches
  /// 3. Otherwise call the fetcher, upsert every record into the snapshot
  ///    store and cache the full result (empty included) under the key
  ///
  /// Fetcher errors propagate and leave both tiers untouched.
  pub async fn fetch_list<T, F, Fut>(
    &self,
    ttl: &TtlCache<Arc<Vec<T>>>,
    snapshots: &SnapshotStore<T>,
    request: &ListRequest,
    fetcher: F,
  ) -> Result<CacheResult<T>>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
  {
    let entity = T::entity_type();

    if let Some(cached) = ttl.get(&request.key) {
      trace!(entity, key = %request.key, "TTL cache hit");
      return Ok(CacheResult::from_ttl_cache(cached));
    }

    if request.allows_snapshot() && !snapshots.is_empty() {
      let mut matched = snapshots.filter(&request.filter);
      if !matched.is_empty() {
        if let Some(limit) = request.limit {
          matched.truncate(limit);
        }
        debug!(entity, count = matched.len(), "Served from snapshot store");
        return Ok(CacheResult::from_snapshot(matched));
      }
    }

    let _guard = match &self.inflight {
      Some(locks) => {
        let guard = locks.acquire(&request.key).await;
        // Another caller may have filled the key while we waited.
        if ttl.has(&request.key) {
          if let Some(cached) = ttl.get(&request.key) {
            trace!(entity, key = %request.key, "Served by concurrent fetch");
            return Ok(CacheResult::from_ttl_cache(cached));
          }
        }
        Some(guard)
      }
      None => None,
    };

    let records = fetcher().await?;
    let inserted = snapshots.upsert_all(&records);
    let records = Arc::new(records);
    ttl.set(request.key.clone(), Arc::clone(&records), None);

    debug!(
      entity,
      count = records.len(),
      new_snapshots = inserted,
      "Fetched from remote"
    );
    Ok(CacheResult::from_network(records))
  }
}

/// Per-key async locks for in-flight dedupe.
#[derive(Default)]
struct InflightLocks {
  locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl InflightLocks {
  async fn acquire(self: &Arc<Self>, key: &str) -> InflightGuard {
    let lock = {
      let mut locks = self.locks.lock();
      Arc::clone(locks.entry(key.to_string()).or_default())
    };
    let guard = lock.lock_owned().await;

    InflightGuard {
      owner: Arc::clone(self),
      key: key.to_string(),
      _guard: guard,
    }
  }
}

struct InflightGuard {
  owner: Arc<InflightLocks>,
  key: String,
  _guard: OwnedMutexGuard<()>,
}

impl Drop for InflightGuard {
  fn drop(&mut self) {
    let mut locks = self.owner.locks.lock();
    // The map and this guard hold the only references: nobody is waiting.
    if locks
      .get(&self.key)
      .is_some_and(|lock| Arc::strong_count(lock) <= 2)
    {
      locks.remove(&self.key);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::clock::ManualClock;
  use crate::cache::traits::Provenance;
  use crate::cache::ttl::DEFAULT_SWEEP_INTERVAL;
  use chrono::Duration;
  use color_eyre::eyre::eyre;
  use color_eyre::Report;
  use serde::Serialize;
  use std::sync::atomic::{AtomicU32, Ordering};

  #[derive(Debug, Clone, PartialEq, Serialize)]
  #[serde(rename_all = "camelCase")]
  struct Item {
    object_id: String,
    owner: String,
  }

  impl Cacheable for Item {
    fn cache_key(&self) -> String {
      self.object_id.clone()
    }

    fn entity_type() -> &'static str {
      "items"
    }
  }

  fn item(id: &str, owner: &str) -> Item {
    Item {
      object_id: id.to_string(),
      owner: owner.to_string(),
    }
  }

  fn tiers() -> (TtlCache<Arc<Vec<Item>>>, SnapshotStore<Item>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let ttl = TtlCache::with_clock(Duration::minutes(30), DEFAULT_SWEEP_INTERVAL, clock.clone());
    (ttl, SnapshotStore::new(), clock)
  }

  fn request(key: &str, filter: Filter) -> ListRequest {
    ListRequest {
      key: key.to_string(),
      filter,
      limit: None,
      by_id: false,
    }
  }

  #[tokio::test]
  async fn test_miss_fetches_then_hits_ttl() {
    let (ttl, snapshots, _clock) = tiers();
    let layer = CacheLayer::new();
    let calls = AtomicU32::new(0);
    let req = request("items:a", Filter::new().with("owner", "Jane"));

    for expected in [Provenance::Api, Provenance::TtlCache] {
      let result = layer
        .fetch_list(&ttl, &snapshots, &req, || async {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok::<_, Report>(vec![item("1", "Jane"), item("2", "Jane")])
        })
        .await
        .unwrap();
      assert_eq!(result.source, expected);
      assert_eq!(result.count(), 2);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(snapshots.len(), 2);
  }

  #[tokio::test]
  async fn test_snapshot_serves_other_keys() {
    let (ttl, snapshots, _clock) = tiers();
    let layer = CacheLayer::new();
    snapshots.upsert_all(&[item("1", "Jane"), item("2", "Bob")]);

    let result = layer
      .fetch_list(
        &ttl,
        &snapshots,
        &request("items:bob", Filter::new().with("owner", "Bob")),
        || async { Err::<Vec<Item>, _>(eyre!("should not be called")) },
      )
      .await
      .unwrap();

    assert_eq!(result.source, Provenance::Snapshot);
    assert_eq!(*result.data, vec![item("2", "Bob")]);
  }

  #[tokio::test]
  async fn test_empty_filter_skips_snapshot() {
    let (ttl, snapshots, _clock) = tiers();
    snapshots.upsert(item("1", "Jane"));

    let result = CacheLayer::new()
      .fetch_list(&ttl, &snapshots, &request("items:all", Filter::new()), || async {
        Ok::<_, Report>(vec![item("1", "Jane"), item("3", "Ann")])
      })
      .await
      .unwrap();

    assert_eq!(result.source, Provenance::Api);
    assert_eq!(snapshots.len(), 2);
  }

  #[tokio::test]
  async fn test_by_id_skips_snapshot() {
    let (ttl, snapshots, _clock) = tiers();
    snapshots.upsert(item("1", "Jane"));
    let mut req = request("items:id", Filter::new().with("objectId", "1"));
    req.by_id = true;

    let result = CacheLayer::new()
      .fetch_list(&ttl, &snapshots, &req, || async { Ok::<_, Report>(vec![item("1", "Janet")]) })
      .await
      .unwrap();

    assert_eq!(result.source, Provenance::Api);
    assert_eq!(snapshots.get("1"), Some(item("1", "Janet")));
  }

  #[tokio::test]
  async fn test_snapshot_results_respect_limit() {
    let (ttl, snapshots, _clock) = tiers();
    snapshots.upsert_all(&[item("1", "Jane"), item("2", "Jane"), item("3", "Jane")]);
    let mut req = request("items:jane", Filter::new().with("owner", "Jane"));
    req.limit = Some(2);

    let result = CacheLayer::new()
      .fetch_list(&ttl, &snapshots, &req, || async { Ok::<_, Report>(vec![]) })
      .await
      .unwrap();
    assert_eq!(result.source, Provenance::Snapshot);
    assert_eq!(result.count(), 2);
  }

  #[tokio::test]
  async fn test_fetch_error_caches_nothing() {
    let (ttl, snapshots, _clock) = tiers();
    let req = request("items:err", Filter::new());

    let err = CacheLayer::new()
      .fetch_list(&ttl, &snapshots, &req, || async {
        Err::<Vec<Item>, _>(eyre!("boom"))
      })
      .await
      .unwrap_err();

    assert_eq!(err.to_string(), "boom");
    assert!(ttl.is_empty());
    assert!(snapshots.is_empty());
  }

  #[tokio::test]
  async fn test_expired_entry_refetches() {
    let (ttl, snapshots, clock) = tiers();
    let layer = CacheLayer::new();
    let calls = AtomicU32::new(0);
    let req = request("items:all", Filter::new());

    for _ in 0..2 {
      layer
        .fetch_list(&ttl, &snapshots, &req, || async {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok::<_, Report>(vec![item("1", "Jane")])
        })
        .await
        .unwrap();
      clock.advance(Duration::minutes(31));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(ttl.stats().evictions, 1);
  }

  #[tokio::test]
  async fn test_concurrent_misses_share_fetch_when_deduped() {
    let (ttl, snapshots, _clock) = tiers();
    let layer = CacheLayer::new().with_inflight_dedupe(true);
    let calls = AtomicU32::new(0);
    let req = request("items:all", Filter::new());

    let fetch = || {
      layer.fetch_list(&ttl, &snapshots, &req, || async {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok::<_, Report>(vec![item("1", "Jane")])
      })
    };
    let (a, b) = tokio::join!(fetch(), fetch());

    let mut sources = vec![a.unwrap().source, b.unwrap().source];
    sources.sort_by_key(|s| s.as_str());
    assert_eq!(sources, vec![Provenance::Api, Provenance::TtlCache]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_concurrent_misses_both_fetch_by_default() {
    let (ttl, snapshots, _clock) = tiers();
    let layer = CacheLayer::new();
    let calls = AtomicU32::new(0);
    let req = request("items:all", Filter::new());

    let fetch = || {
      layer.fetch_list(&ttl, &snapshots, &req, || async {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok::<_, Report>(vec![item("1", "Jane")])
      })
    };
    let (a, b) = tokio::join!(fetch(), fetch());

    assert_eq!(a.unwrap().source, Provenance::Api);
    assert_eq!(b.unwrap().source, Provenance::Api);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }
}
