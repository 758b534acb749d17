//! Rally WSAPI integration: record types, normalization, and the cached client.

pub mod api_types;
pub mod cache;
pub mod cached_client;
pub mod client;
pub mod fields;
pub mod formatter;
pub mod registry;
pub mod sanitize;
pub mod types;

pub use cached_client::{CachedRallyClient, FetchResult};
pub use client::{RallyClient, RemoteQuery, RemoteQueryService};
pub use formatter::ChunkedFormatter;
pub use registry::{CacheRegistry, SnapshotStores};
pub use types::{Defect, Entity, EntityType, Iteration, Project, Record, User, UserStory};
