//! Generic caching layer shielding callers from a slow remote service.
//!
//! This module is tracker-agnostic and provides:
//! - A TTL cache with hit/miss/eviction statistics and a background sweep
//! - A non-expiring snapshot store that upserts records by identity
//! - Exact-match filters evaluated against snapshot records
//! - A cache layer composing both tiers in front of a network fetcher

mod clock;
mod filter;
mod layer;
mod snapshot;
mod stats;
mod traits;
mod ttl;

pub use clock::{Clock, ManualClock, SystemClock};
pub use filter::{values_equal, Filter};
pub use layer::{CacheLayer, ListRequest};
pub use snapshot::SnapshotStore;
pub use stats::{hit_rate, CacheStats, Counters};
pub use traits::{CacheResult, Cacheable, Provenance};
pub use ttl::{CacheControl, CacheEntry, TtlCache, DEFAULT_SWEEP_INTERVAL};
