//! Caching implementations for Rally types.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::borrow::Cow;

use crate::cache::{Cacheable, Filter};

use super::fields::{resolve, short_ref};
use super::types::{Defect, Entity, Iteration, Project, User, UserStory};

// ============================================================================
// Cacheable implementations
// ============================================================================

macro_rules! cacheable {
  ($($ty:ty),* $(,)?) => {
    $(
      impl Cacheable for $ty {
        fn cache_key(&self) -> String {
          self.object_id.clone()
        }

        fn entity_type() -> &'static str {
          <$ty as Entity>::TYPE.as_str()
        }

        fn resolve_field(name: &str) -> Cow<'_, str> {
          match resolve(<$ty as Entity>::FIELDS, name) {
            Some(field) => Cow::Borrowed(field.normalized),
            None => Cow::Borrowed(name),
          }
        }
      }
    )*
  };
}

cacheable!(Project, User, Iteration, UserStory, Defect);

// ============================================================================
// Query keys
// ============================================================================

/// Rewrite filter keys to the entity's normalized field names.
///
/// Values of reference fields given as full WSAPI ref URLs are shortened to
/// their `/type/id` form, the same form the formatter stores on normalized
/// records. Other values and unknown keys pass through verbatim.
pub fn normalize_filter<T: Entity>(filter: &Filter) -> Filter {
  filter
    .iter()
    .map(|(name, value)| match resolve(T::FIELDS, name) {
      Some(field) => {
        let value = match value {
          Value::String(s) if field.reference => Value::String(short_ref(s)),
          other => other.clone(),
        };
        (field.normalized.to_string(), value)
      }
      None => (name.to_string(), value.clone()),
    })
    .collect()
}

/// Cache key for one list request.
///
/// `"<entityType>:" + hex(sha256(canonical JSON of filter and limit))`. The
/// filter must already be normalized; its keys serialize sorted.
pub fn query_key<T: Entity>(filter: &Filter, limit: Option<usize>) -> String {
  let canonical = json!({
    "filter": filter,
    "limit": limit,
  });

  let mut hasher = Sha256::new();
  hasher.update(canonical.to_string().as_bytes());
  format!("{}:{}", T::TYPE.as_str(), hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_key_independent_of_field_casing() {
    let external = normalize_filter::<UserStory>(&Filter::new().with("Project", "/project/123"));
    let normalized = normalize_filter::<UserStory>(&Filter::new().with("project", "/project/123"));
    assert_eq!(
      query_key::<UserStory>(&external, None),
      query_key::<UserStory>(&normalized, None)
    );
  }

  #[test]
  fn test_key_independent_of_insertion_order() {
    let a = Filter::new().with("state", "Open").with("owner", "Jane");
    let b = Filter::new().with("owner", "Jane").with("state", "Open");
    assert_eq!(query_key::<Defect>(&a, None), query_key::<Defect>(&b, None));
  }

  #[test]
  fn test_key_distinguishes_entity_limit_and_filter() {
    let filter = Filter::new().with("name", "Sprint 1");
    let key = query_key::<Iteration>(&filter, None);

    assert!(key.starts_with("iterations:"));
    assert_ne!(key, query_key::<Project>(&filter, None));
    assert_ne!(key, query_key::<Iteration>(&filter, Some(1)));
    assert_ne!(
      key,
      query_key::<Iteration>(&Filter::new().with("name", "Sprint 2"), None)
    );
  }

  #[test]
  fn test_ref_urls_normalized_in_filter() {
    let filter = normalize_filter::<UserStory>(
      &Filter::new().with(
        "Project",
        "https://rally1.rallydev.com/slm/webservice/v2.0/project/123",
      ),
    );
    assert_eq!(filter.get("project"), Some(&Value::from("/project/123")));
  }

  #[test]
  fn test_free_text_values_kept_verbatim() {
    let text = "see https://host/slm/webservice/v2.0/docs";
    let filter = normalize_filter::<UserStory>(&Filter::new().with("Name", text));
    assert_eq!(filter.get("name"), Some(&Value::from(text)));
  }

  #[test]
  fn test_resolve_field_for_users() {
    assert_eq!(User::resolve_field("UserName"), "userName");
    assert_eq!(User::resolve_field("Department"), "Department");
  }
}
