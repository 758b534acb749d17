//! Unbounded, identity-keyed record store used as a fallback tier.
//!
//! Every record that comes back from the remote service is upserted here, so
//! later queries can sometimes be answered from what has already been seen.
//! Nothing expires; only an explicit clear empties the store.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::trace;

use super::filter::Filter;
use super::traits::Cacheable;

struct Inner<T> {
  /// Records in first-seen order
  records: Vec<T>,
  /// cache_key -> position in `records`
  index: HashMap<String, usize>,
}

/// Append/upsert list keyed by [`Cacheable::cache_key`].
pub struct SnapshotStore<T> {
  inner: Mutex<Inner<T>>,
}

impl<T: Cacheable> SnapshotStore<T> {
  pub fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        records: Vec::new(),
        index: HashMap::new(),
      }),
    }
  }

  /// Insert a record, or overwrite the stored one with the same identity.
  ///
  /// Returns true if the identity was new. Records without an identity are
  /// not stored.
  pub fn upsert(&self, record: T) -> bool {
    let key = record.cache_key();
    if key.is_empty() {
      trace!(entity = T::entity_type(), "Skipping snapshot of record without id");
      return false;
    }

    let mut inner = self.inner.lock();
    if let Some(&position) = inner.index.get(&key) {
      inner.records[position] = record;
      false
    } else {
      let position = inner.records.len();
      inner.records.push(record);
      inner.index.insert(key, position);
      true
    }
  }

  /// Upsert every record. Returns how many identities were new.
  pub fn upsert_all(&self, records: &[T]) -> usize {
    records
      .iter()
      .filter(|record| self.upsert((*record).clone()))
      .count()
  }

  pub fn get(&self, key: &str) -> Option<T> {
    let inner = self.inner.lock();
    inner
      .index
      .get(key)
      .map(|&position| inner.records[position].clone())
  }

  /// All records matching `filter`, in first-seen order.
  pub fn filter(&self, filter: &Filter) -> Vec<T> {
    let inner = self.inner.lock();
    inner
      .records
      .iter()
      .filter(|record| filter.matches(*record))
      .cloned()
      .collect()
  }

  pub fn all(&self) -> Vec<T> {
    self.inner.lock().records.clone()
  }

  pub fn len(&self) -> usize {
    self.inner.lock().records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn clear(&self) {
    let mut inner = self.inner.lock();
    inner.records.clear();
    inner.index.clear();
  }
}

impl<T: Cacheable> Default for SnapshotStore<T> {
  fn default() -> Self {
    Self::new()
  }
}
