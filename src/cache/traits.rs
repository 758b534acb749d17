//! Core traits and types for the caching system.

use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Trait for entities that can be cached.
///
/// Implementors must provide a stable identity; the snapshot tier keeps at
/// most one record per identity.
pub trait Cacheable: Clone + Send + Sync + Serialize + 'static {
  /// Unique identifier for this entity (e.g., the tracker's object id).
  /// An empty key means the record has no usable identity.
  fn cache_key(&self) -> String;

  /// Entity type name (e.g., "userStories", "projects")
  fn entity_type() -> &'static str;

  /// Map a filter field name onto the serialized field it compares against.
  ///
  /// The default compares against the name as given.
  fn resolve_field(name: &str) -> Cow<'_, str> {
    Cow::Borrowed(name)
  }
}

/// Result from a cache operation, including data and the tier that served it.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The records, in the order they were fetched
  pub data: Arc<Vec<T>>,
  /// Where the data came from
  pub source: Provenance,
}

impl<T> CacheResult<T> {
  /// Records freshly fetched from the remote service.
  pub fn from_network(data: Arc<Vec<T>>) -> Self {
    Self {
      data,
      source: Provenance::Api,
    }
  }

  /// A full result set previously stored under the same cache key.
  pub fn from_ttl_cache(data: Arc<Vec<T>>) -> Self {
    Self {
      data,
      source: Provenance::TtlCache,
    }
  }

  /// A filtered subset of previously seen records. Possibly stale or incomplete.
  pub fn from_snapshot(data: Vec<T>) -> Self {
    Self {
      data: Arc::new(data),
      source: Provenance::Snapshot,
    }
  }

  pub fn count(&self) -> usize {
    self.data.len()
  }
}

/// Indicates which tier satisfied a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Provenance {
  /// Exact cache key hit in the TTL cache
  #[serde(rename = "ttl-cache")]
  TtlCache,
  /// Filtered from the snapshot store
  #[serde(rename = "cache")]
  Snapshot,
  /// Fetched from the remote service
  #[serde(rename = "api")]
  Api,
}

impl Provenance {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::TtlCache => "ttl-cache",
      Self::Snapshot => "cache",
      Self::Api => "api",
    }
  }
}

impl fmt::Display for Provenance {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
