//! Per-entity cache ownership.
//!
//! The registry is an explicit object held by the client rather than a set of
//! globals. Caches are still created lazily on first access.

use chrono::Duration;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::cache::{CacheControl, CacheStats, Clock, SnapshotStore, SystemClock, TtlCache};
use crate::config::CacheConfig;

use super::types::{Defect, Entity, EntityType, Iteration, Project, User, UserStory};

/// TTL cache holding full, formatted result sets of one entity type.
pub type EntityCache<T> = TtlCache<Arc<Vec<T>>>;

/// Default lifetime of registry caches: long enough to survive navigating
/// away from a view and back.
pub const DEFAULT_TTL_SECS: i64 = 30 * 60;

type Slot<T> = Mutex<Option<Arc<EntityCache<T>>>>;

/// Parameters used for every cache the registry creates.
#[derive(Debug, Clone, Copy)]
pub struct RegistrySettings {
  pub default_ttl: Duration,
  pub sweep_interval: std::time::Duration,
}

impl Default for RegistrySettings {
  fn default() -> Self {
    Self {
      default_ttl: Duration::seconds(DEFAULT_TTL_SECS),
      sweep_interval: crate::cache::DEFAULT_SWEEP_INTERVAL,
    }
  }
}

/// A TTL too large for a duration saturates to the longest one, so entries
/// never expire. `Config::from_yaml` rejects such values before they get here.
impl From<&CacheConfig> for RegistrySettings {
  fn from(config: &CacheConfig) -> Self {
    Self {
      default_ttl: config.default_ttl().unwrap_or(Duration::MAX),
      sweep_interval: std::time::Duration::from_secs(config.sweep_interval_secs),
    }
  }
}

/// Owns one TTL cache per entity type.
pub struct CacheRegistry {
  settings: RegistrySettings,
  clock: Arc<dyn Clock>,
  projects: Slot<Project>,
  users: Slot<User>,
  iterations: Slot<Iteration>,
  user_stories: Slot<UserStory>,
  defects: Slot<Defect>,
}

impl Default for CacheRegistry {
  fn default() -> Self {
    Self::new(RegistrySettings::default())
  }
}

impl CacheRegistry {
  pub fn new(settings: RegistrySettings) -> Self {
    Self::with_clock(settings, Arc::new(SystemClock))
  }

  /// Registry whose caches read time from `clock`.
  pub fn with_clock(settings: RegistrySettings, clock: Arc<dyn Clock>) -> Self {
    Self {
      settings,
      clock,
      projects: Mutex::new(None),
      users: Mutex::new(None),
      iterations: Mutex::new(None),
      user_stories: Mutex::new(None),
      defects: Mutex::new(None),
    }
  }

  pub fn projects(&self) -> Arc<EntityCache<Project>> {
    self.get_or_create(&self.projects)
  }

  pub fn users(&self) -> Arc<EntityCache<User>> {
    self.get_or_create(&self.users)
  }

  pub fn iterations(&self) -> Arc<EntityCache<Iteration>> {
    self.get_or_create(&self.iterations)
  }

  pub fn user_stories(&self) -> Arc<EntityCache<UserStory>> {
    self.get_or_create(&self.user_stories)
  }

  pub fn defects(&self) -> Arc<EntityCache<Defect>> {
    self.get_or_create(&self.defects)
  }

  /// The cache for `T`, created on first access.
  pub fn cache<T: Entity>(&self) -> Arc<EntityCache<T>> {
    T::ttl_cache(self)
  }

  /// Whether the cache for `entity` currently exists.
  pub fn is_instantiated(&self, entity: EntityType) -> bool {
    self.peek(entity).is_some()
  }

  /// Empty every existing cache. Instances stay alive and usable.
  pub fn clear_all(&self) {
    for entity in EntityType::ALL {
      if let Some(cache) = self.peek(entity) {
        cache.clear();
      }
    }
    debug!("Cleared all caches");
  }

  /// Destroy every existing cache and forget it.
  ///
  /// The next access of any entity type creates a fresh instance.
  pub fn destroy_all(&self) {
    for entity in EntityType::ALL {
      if let Some(cache) = self.take(entity) {
        cache.destroy();
      }
    }
    debug!("Destroyed all caches");
  }

  /// Statistics for one entity type; zeroed if its cache was never created.
  pub fn stats(&self, entity: EntityType) -> CacheStats {
    self
      .peek(entity)
      .map(|cache| cache.stats())
      .unwrap_or_default()
  }

  /// Statistics for every entity type.
  pub fn aggregated_stats(&self) -> BTreeMap<EntityType, CacheStats> {
    EntityType::ALL
      .into_iter()
      .map(|entity| (entity, self.stats(entity)))
      .collect()
  }

  fn get_or_create<T: Entity>(&self, slot: &Slot<T>) -> Arc<EntityCache<T>> {
    let mut slot = slot.lock();
    let cache = slot.get_or_insert_with(|| {
      debug!(entity = T::TYPE.as_str(), "Creating cache");
      Arc::new(TtlCache::with_clock(
        self.settings.default_ttl,
        self.settings.sweep_interval,
        Arc::clone(&self.clock),
      ))
    });
    Arc::clone(cache)
  }

  fn peek(&self, entity: EntityType) -> Option<Arc<dyn CacheControl>> {
    fn erase<T: Entity>(slot: &Slot<T>) -> Option<Arc<dyn CacheControl>> {
      slot
        .lock()
        .as_ref()
        .map(|cache| Arc::clone(cache) as Arc<dyn CacheControl>)
    }

    match entity {
      EntityType::Projects => erase(&self.projects),
      EntityType::Users => erase(&self.users),
      EntityType::Iterations => erase(&self.iterations),
      EntityType::UserStories => erase(&self.user_stories),
      EntityType::Defects => erase(&self.defects),
    }
  }

  fn take(&self, entity: EntityType) -> Option<Arc<dyn CacheControl>> {
    fn erase<T: Entity>(slot: &Slot<T>) -> Option<Arc<dyn CacheControl>> {
      slot
        .lock()
        .take()
        .map(|cache| cache as Arc<dyn CacheControl>)
    }

    match entity {
      EntityType::Projects => erase(&self.projects),
      EntityType::Users => erase(&self.users),
      EntityType::Iterations => erase(&self.iterations),
      EntityType::UserStories => erase(&self.user_stories),
      EntityType::Defects => erase(&self.defects),
    }
  }
}

/// Non-expiring snapshot stores, one per entity type.
#[derive(Default)]
pub struct SnapshotStores {
  pub projects: SnapshotStore<Project>,
  pub users: SnapshotStore<User>,
  pub iterations: SnapshotStore<Iteration>,
  pub user_stories: SnapshotStore<UserStory>,
  pub defects: SnapshotStore<Defect>,
}

impl SnapshotStores {
  pub fn get<T: Entity>(&self) -> &SnapshotStore<T> {
    T::snapshots(self)
  }

  pub fn len(&self, entity: EntityType) -> usize {
    match entity {
      EntityType::Projects => self.projects.len(),
      EntityType::Users => self.users.len(),
      EntityType::Iterations => self.iterations.len(),
      EntityType::UserStories => self.user_stories.len(),
      EntityType::Defects => self.defects.len(),
    }
  }

  pub fn clear_all(&self) {
    self.projects.clear();
    self.users.clear();
    self.iterations.clear();
    self.user_stories.clear();
    self.defects.clear();
  }
}
