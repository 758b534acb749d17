use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{header, Client};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::{Config, RallyConfig};

use super::api_types::ApiQueryResponse;
use super::fields::RawRecord;
use super::types::EntityType;

const API_PATH: &str = "slm/webservice/v2.0/";
const API_KEY_HEADER: &str = "ZSESSIONID";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// The remote source of raw records.
///
/// Implementations must support equality and substring predicates ANDed
/// together, plus an optional result limit. Errors are returned unchanged to
/// the caller of the cached client.
#[async_trait]
pub trait RemoteQueryService: Send + Sync {
  async fn query(&self, entity: EntityType, query: &RemoteQuery) -> Result<Vec<RawRecord>>;
}

#[async_trait]
impl<S: RemoteQueryService + ?Sized> RemoteQueryService for Arc<S> {
  async fn query(&self, entity: EntityType, query: &RemoteQuery) -> Result<Vec<RawRecord>> {
    (**self).query(entity, query).await
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
  Equals,
  Contains,
}

impl Operator {
  fn as_wsapi(&self) -> &'static str {
    match self {
      Self::Equals => "=",
      Self::Contains => "contains",
    }
  }
}

/// One `field <op> value` predicate, using the remote field name.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
  pub field: String,
  pub operator: Operator,
  pub value: Value,
}

/// A remote query: conditions ANDed together, plus an optional limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteQuery {
  pub conditions: Vec<Condition>,
  pub limit: Option<usize>,
}

impl RemoteQuery {
  /// Render the conditions in WSAPI query syntax.
  ///
  /// WSAPI only accepts binary `AND`, so several conditions nest to the left:
  /// `(((A = "x") AND (B = "y")) AND (C contains "z"))`. Returns `None`
  /// without conditions.
  pub fn to_wsapi(&self) -> Option<String> {
    let mut terms = self.conditions.iter().map(|condition| {
      format!(
        "({} {} {})",
        condition.field,
        condition.operator.as_wsapi(),
        wsapi_literal(&condition.value)
      )
    });

    let first = terms.next()?;
    Some(terms.fold(first, |acc, term| format!("({} AND {})", acc, term)))
  }
}

fn wsapi_literal(value: &Value) -> String {
  match value {
    Value::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
    Value::Null => "null".to_string(),
    other => other.to_string(),
  }
}

/// Rally WSAPI v2.0 client
#[derive(Clone)]
pub struct RallyClient {
  http: Client,
  base: Url,
  workspace: Option<String>,
  page_size: usize,
}

impl RallyClient {
  pub fn new(config: &Config) -> Result<Self> {
    let api_key = Config::get_api_key()?;
    Self::with_api_key(&config.rally, &api_key)
  }

  pub fn with_api_key(config: &RallyConfig, api_key: &str) -> Result<Self> {
    let mut headers = header::HeaderMap::new();
    let mut key = header::HeaderValue::from_str(api_key)
      .map_err(|e| eyre!("Invalid Rally API key: {}", e))?;
    key.set_sensitive(true);
    headers.insert(API_KEY_HEADER, key);

    let http = Client::builder()
      .default_headers(headers)
      .user_agent(concat!("rally-sync/", env!("CARGO_PKG_VERSION")))
      .timeout(REQUEST_TIMEOUT)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base: api_base(&config.url)?,
      workspace: config.workspace.clone(),
      page_size: config.effective_page_size(),
    })
  }

  /// URL of one result page. `start` is 1-based.
  fn page_url(
    &self,
    entity: EntityType,
    query: Option<&str>,
    start: usize,
    page_size: usize,
  ) -> Result<Url> {
    let mut url = self
      .base
      .join(entity.api_type())
      .map_err(|e| eyre!("Invalid endpoint for {}: {}", entity, e))?;

    {
      let mut pairs = url.query_pairs_mut();
      pairs
        .append_pair("fetch", "true")
        .append_pair("start", &start.to_string())
        .append_pair("pagesize", &page_size.to_string());
      if let Some(query) = query {
        pairs.append_pair("query", query);
      }
      if let Some(workspace) = &self.workspace {
        pairs.append_pair("workspace", workspace);
      }
    }

    Ok(url)
  }
}

#[async_trait]
impl RemoteQueryService for RallyClient {
  async fn query(&self, entity: EntityType, query: &RemoteQuery) -> Result<Vec<RawRecord>> {
    let wsapi = query.to_wsapi();
    let page_size = match query.limit {
      Some(limit) => limit.clamp(1, self.page_size),
      None => self.page_size,
    };

    let mut records = Vec::new();
    let mut start = 1;

    loop {
      let url = self.page_url(entity, wsapi.as_deref(), start, page_size)?;
      debug!(%entity, start, page_size, query = wsapi.as_deref().unwrap_or(""), "WSAPI request");

      let response = self
        .http
        .get(url)
        .send()
        .await
        .map_err(|e| eyre!("Failed to query {}: {}", entity, e))?;

      if !response.status().is_success() {
        return Err(eyre!("Rally API error for {}: {}", entity, response.status()));
      }

      let body: ApiQueryResponse = response
        .json()
        .await
        .map_err(|e| eyre!("Failed to parse {} response: {}", entity, e))?;
      let result = body.query_result;

      if !result.errors.is_empty() {
        return Err(eyre!("Rally query for {} failed: {}", entity, result.errors.join("; ")));
      }
      for warning in &result.warnings {
        warn!(%entity, "WSAPI warning: {}", warning);
      }

      let received = result.results.len();
      records.extend(result.results);

      if let Some(limit) = query.limit {
        if records.len() >= limit {
          records.truncate(limit);
          break;
        }
      }
      if received == 0 || start - 1 + received >= result.total_result_count {
        break;
      }
      start += received;
    }

    Ok(records)
  }
}

/// `<url>/slm/webservice/v2.0/`, keeping any path prefix on `url`.
fn api_base(url: &str) -> Result<Url> {
  let mut root = Url::parse(url).map_err(|e| eyre!("Invalid Rally URL {}: {}", url, e))?;
  if !root.path().ends_with('/') {
    let path = format!("{}/", root.path());
    root.set_path(&path);
  }
  root
    .join(API_PATH)
    .map_err(|e| eyre!("Invalid Rally URL {}: {}", url, e))
}
