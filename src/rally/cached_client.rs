//! Cached Rally client that fronts a remote query service with tiered caching.

use color_eyre::{Report, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{
  CacheLayer, CacheResult, CacheStats, Clock, Filter, ListRequest, Provenance, SystemClock,
};
use crate::config::{CacheConfig, Config};

use super::cache::{normalize_filter, query_key};
use super::client::{Condition, Operator, RallyClient, RemoteQuery, RemoteQueryService};
use super::fields::{resolve, Matching};
use super::formatter::ChunkedFormatter;
use super::registry::{CacheRegistry, RegistrySettings, SnapshotStores};
use super::types::{Defect, Entity, EntityType, Iteration, Project, Record, User, UserStory};

/// Records returned by [`CachedRallyClient::fetch`], tagged with the tier
/// that served them.
#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
  pub records: Vec<Record>,
  pub provenance: Provenance,
  pub count: usize,
}

impl<T: Entity> From<CacheResult<T>> for FetchResult {
  fn from(result: CacheResult<T>) -> Self {
    let records: Vec<Record> = result
      .data
      .iter()
      .cloned()
      .map(Entity::into_record)
      .collect();
    Self {
      count: records.len(),
      records,
      provenance: result.source,
    }
  }
}

/// Rally client with transparent caching.
///
/// Lookups go through the TTL cache (exact request), then the snapshot store
/// (previously seen records, exact field match), then the remote service.
pub struct CachedRallyClient<R> {
  remote: R,
  registry: CacheRegistry,
  snapshots: SnapshotStores,
  layer: CacheLayer,
  formatter: ChunkedFormatter,
  default_project: Option<String>,
}

impl CachedRallyClient<RallyClient> {
  /// Create a cached WSAPI client from the loaded configuration.
  pub fn from_config(config: &Config) -> Result<Self> {
    let remote = RallyClient::new(config)?;
    Ok(Self::new(remote, &config.cache).with_default_project(config.default_project.clone()))
  }
}

impl<R: RemoteQueryService> CachedRallyClient<R> {
  pub fn new(remote: R, config: &CacheConfig) -> Self {
    Self::with_clock(remote, config, Arc::new(SystemClock))
  }

  pub fn with_clock(remote: R, config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
    Self {
      remote,
      registry: CacheRegistry::with_clock(RegistrySettings::from(config), clock),
      snapshots: SnapshotStores::default(),
      layer: CacheLayer::new().with_inflight_dedupe(config.dedupe_inflight),
      formatter: ChunkedFormatter::new(config.chunk_size),
      default_project: None,
    }
  }

  /// Scope queries on project-owned entities to `project` unless the filter
  /// names a project itself.
  pub fn with_default_project(mut self, project: Option<String>) -> Self {
    self.default_project = project;
    self
  }

  pub fn registry(&self) -> &CacheRegistry {
    &self.registry
  }

  pub fn snapshots(&self) -> &SnapshotStores {
    &self.snapshots
  }

  /// List records of `entity` matching every field in `filter`.
  ///
  /// Collaborator errors are returned unchanged and nothing is cached. An
  /// empty result is a success with `count == 0`.
  pub async fn fetch(
    &self,
    entity: EntityType,
    filter: &Filter,
    limit: Option<usize>,
  ) -> Result<FetchResult> {
    let result: FetchResult = match entity {
      EntityType::Projects => self.fetch_typed::<Project>(filter, limit).await?.into(),
      EntityType::Users => self.fetch_typed::<User>(filter, limit).await?.into(),
      EntityType::Iterations => self.fetch_typed::<Iteration>(filter, limit).await?.into(),
      EntityType::UserStories => self.fetch_typed::<UserStory>(filter, limit).await?.into(),
      EntityType::Defects => self.fetch_typed::<Defect>(filter, limit).await?.into(),
    };
    Ok(result)
  }

  /// Typed variant of [`fetch`](Self::fetch).
  pub async fn fetch_typed<T: Entity>(
    &self,
    filter: &Filter,
    limit: Option<usize>,
  ) -> Result<CacheResult<T>> {
    let (request, query) = self.plan::<T>(filter, limit);
    let cache = T::ttl_cache(&self.registry);

    let result = self
      .layer
      .fetch_list(&cache, T::snapshots(&self.snapshots), &request, || async {
        let raw = self.remote.query(T::TYPE, &query).await?;
        Ok::<_, Report>(self.formatter.format::<T>(raw).await)
      })
      .await?;

    debug!(
      entity = T::TYPE.as_str(),
      provenance = %result.source,
      count = result.count(),
      "Fetch complete"
    );
    Ok(result)
  }

  /// Build the cache request and the remote query for one logical fetch.
  fn plan<T: Entity>(&self, filter: &Filter, limit: Option<usize>) -> (ListRequest, RemoteQuery) {
    let filter = normalize_filter::<T>(filter);

    let by_id = filter
      .iter()
      .any(|(name, _)| resolve(T::FIELDS, name).is_some_and(|field| field.identifier));
    let limit = if by_id { Some(1) } else { limit };

    let mut conditions: Vec<Condition> = filter
      .iter()
      .map(|(name, value)| {
        let mapping = resolve(T::FIELDS, name);
        let operator = match mapping {
          Some(field) if field.matching == Matching::Contains && value.is_string() => {
            Operator::Contains
          }
          _ => Operator::Equals,
        };
        Condition {
          field: mapping.map(|field| field.api_name()).unwrap_or(name).to_string(),
          operator,
          value: value.clone(),
        }
      })
      .collect();

    if !by_id {
      if let (Some(project_field), Some(project)) = (T::PROJECT_FIELD, &self.default_project) {
        if filter.get(project_field).is_none() {
          let field = resolve(T::FIELDS, project_field)
            .map(|field| field.api_name())
            .unwrap_or(project_field);
          conditions.push(Condition {
            field: field.to_string(),
            operator: Operator::Equals,
            value: project.clone().into(),
          });
        }
      }
    }

    let request = ListRequest {
      key: query_key::<T>(&filter, limit),
      filter,
      limit,
      by_id,
    };
    (request, RemoteQuery { conditions, limit })
  }

  pub async fn get_projects(&self) -> Result<Vec<Project>> {
    self.list(&Filter::new()).await
  }

  pub async fn get_users(&self) -> Result<Vec<User>> {
    self.list(&Filter::new()).await
  }

  /// Iterations of `project`, or of the default project when `None`.
  pub async fn get_iterations(&self, project: Option<&str>) -> Result<Vec<Iteration>> {
    let filter = match project {
      Some(project) => Filter::new().with("project", project),
      None => Filter::new(),
    };
    self.list(&filter).await
  }

  pub async fn get_user_stories(&self, filter: &Filter) -> Result<Vec<UserStory>> {
    self.list(filter).await
  }

  pub async fn get_defects(&self, filter: &Filter) -> Result<Vec<Defect>> {
    self.list(filter).await
  }

  /// Look up one story by its formatted id (e.g. `US123`).
  pub async fn get_user_story(&self, formatted_id: &str) -> Result<Option<UserStory>> {
    let filter = Filter::new().with("formattedId", formatted_id);
    let mut stories = self.list::<UserStory>(&filter).await?;
    Ok((!stories.is_empty()).then(|| stories.swap_remove(0)))
  }

  async fn list<T: Entity>(&self, filter: &Filter) -> Result<Vec<T>> {
    let result = self.fetch_typed::<T>(filter, None).await?;
    Ok(Arc::unwrap_or_clone(result.data))
  }

  /// Prefetch the lists most views start from.
  ///
  /// Projects and users are fetched concurrently; iterations too when a
  /// default project is configured. Returns the record count per entity.
  pub async fn warm_up(&self) -> Result<BTreeMap<EntityType, usize>> {
    let iterations = async {
      match self.default_project {
        Some(_) => self.get_iterations(None).await.map(|found| Some(found.len())),
        None => Ok(None),
      }
    };

    let (projects, users, iterations) =
      futures::try_join!(self.get_projects(), self.get_users(), iterations)?;

    let mut counts = BTreeMap::new();
    counts.insert(EntityType::Projects, projects.len());
    counts.insert(EntityType::Users, users.len());
    if let Some(iterations) = iterations {
      counts.insert(EntityType::Iterations, iterations);
    }

    info!(?counts, "Cache warmed");
    Ok(counts)
  }

  /// Empty every cache and snapshot store. Cache instances stay alive.
  pub fn clear_all(&self) {
    self.registry.clear_all();
    self.snapshots.clear_all();
  }

  /// Destroy every cache and stop its sweep. Later fetches start from scratch.
  pub fn destroy_all(&self) {
    self.registry.destroy_all();
    self.snapshots.clear_all();
  }

  /// Cache statistics for one entity type, or for all of them.
  pub fn stats(&self, entity: Option<EntityType>) -> BTreeMap<EntityType, CacheStats> {
    match entity {
      Some(entity) => BTreeMap::from([(entity, self.registry.stats(entity))]),
      None => self.registry.aggregated_stats(),
    }
  }
}
