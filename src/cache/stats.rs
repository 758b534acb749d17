//! Hit/miss/eviction accounting.

use serde::Serialize;

/// Raw counters kept by a cache instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
  pub hits: u64,
  pub misses: u64,
  pub evictions: u64,
}

impl Counters {
  pub fn reset(&mut self) {
    *self = Self::default();
  }
}

/// Point-in-time statistics for one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
  pub hits: u64,
  pub misses: u64,
  pub evictions: u64,
  /// Entries currently stored, including expired ones not yet evicted.
  pub size: usize,
  /// Percentage of lookups that hit, rounded to two decimals.
  pub hit_rate: f64,
}

impl CacheStats {
  pub fn new(counters: Counters, size: usize) -> Self {
    Self {
      hits: counters.hits,
      misses: counters.misses,
      evictions: counters.evictions,
      size,
      hit_rate: hit_rate(counters.hits, counters.misses),
    }
  }
}

/// `hits / (hits + misses) * 100`, rounded to 2 decimal places; 0 with no lookups.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
  let total = hits + misses;
  if total == 0 {
    return 0.0;
  }
  let percent = hits as f64 / total as f64 * 100.0;
  (percent * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_hit_rate_no_lookups() {
    assert_eq!(hit_rate(0, 0), 0.0);
  }

  #[test]
  fn test_hit_rate_rounds_to_two_decimals() {
    assert_eq!(hit_rate(2, 1), 66.67);
    assert_eq!(hit_rate(1, 2), 33.33);
    assert_eq!(hit_rate(1, 0), 100.0);
    assert_eq!(hit_rate(1, 7), 12.5);
  }

  #[test]
  fn test_stats_serialize_camel_case() {
    let stats = CacheStats::new(
      Counters {
        hits: 3,
        misses: 1,
        evictions: 2,
      },
      5,
    );
    let json = serde_json::to_value(stats).unwrap();
    assert_eq!(json["hitRate"], 75.0);
    assert_eq!(json["size"], 5);
    assert_eq!(json["evictions"], 2);
  }
}
