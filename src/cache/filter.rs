//! Field filters evaluated against cached records.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use super::traits::Cacheable;

/// A set of `field = value` conditions, all of which must hold.
///
/// Fields are kept sorted so two filters built in different orders compare
/// and serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Filter(BTreeMap<String, Value>);

impl Filter {
  pub fn new() -> Self {
    Self::default()
  }

  /// Builder-style insert.
  pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
    self.insert(field, value);
    self
  }

  pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
    self.0.insert(field.into(), value.into());
  }

  pub fn get(&self, field: &str) -> Option<&Value> {
    self.0.get(field)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
    self.0.iter().map(|(field, value)| (field.as_str(), value))
  }

  /// True iff every condition equals the corresponding field on `record`.
  ///
  /// Comparison is exact; there is no substring matching at this level.
  /// A missing field never matches.
  pub fn matches<T: Cacheable>(&self, record: &T) -> bool {
    let Ok(Value::Object(fields)) = serde_json::to_value(record) else {
      return false;
    };

    self.0.iter().all(|(name, expected)| {
      let field = T::resolve_field(name);
      fields
        .get(field.as_ref())
        .is_some_and(|actual| values_equal(actual, expected))
    })
  }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Filter {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    let mut filter = Filter::new();
    for (field, value) in iter {
      filter.insert(field, value);
    }
    filter
  }
}

/// JSON equality, loosened for values that arrive as text.
///
/// Numbers compare by value (`3` equals `3.0`), a number equals its decimal
/// string, and a bool equals `"true"`/`"false"`. Identifiers are normalized
/// to strings but callers often pass them as numbers, and command-line
/// filters are always strings.
pub fn values_equal(actual: &Value, expected: &Value) -> bool {
  match (actual, expected) {
    (Value::Number(a), Value::Number(b)) => {
      a == b || a.as_f64().zip(b.as_f64()).is_some_and(|(a, b)| a == b)
    }
    (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
      *s == n.to_string()
        || s
          .trim()
          .parse::<f64>()
          .ok()
          .zip(n.as_f64())
          .is_some_and(|(a, b)| a == b)
    }
    (Value::String(s), Value::Bool(b)) | (Value::Bool(b), Value::String(s)) => {
      s.trim().eq_ignore_ascii_case(if *b { "true" } else { "false" })
    }
    _ => actual == expected,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[derive(Debug, Clone, Serialize)]
  #[serde(rename_all = "camelCase")]
  struct Item {
    object_id: String,
    name: String,
    project: Option<String>,
  }

  impl Cacheable for Item {
    fn cache_key(&self) -> String {
      self.object_id.clone()
    }

    fn entity_type() -> &'static str {
      "items"
    }
  }

  fn item(id: &str, name: &str, project: Option<&str>) -> Item {
    Item {
      object_id: id.to_string(),
      name: name.to_string(),
      project: project.map(String::from),
    }
  }

  #[test]
  fn test_all_conditions_must_hold() {
    let filter = Filter::new()
      .with("project", "/project/1")
      .with("name", "Login");
    assert!(filter.matches(&item("1", "Login", Some("/project/1"))));
    assert!(!filter.matches(&item("2", "Login", Some("/project/2"))));
    assert!(!filter.matches(&item("3", "Logout", Some("/project/1"))));
  }

  #[test]
  fn test_no_substring_matching() {
    let filter = Filter::new().with("name", "Log");
    assert!(!filter.matches(&item("1", "Login", None)));
  }

  #[test]
  fn test_missing_field_never_matches() {
    let filter = Filter::new().with("owner", "Jane");
    assert!(!filter.matches(&item("1", "Login", None)));
  }

  #[test]
  fn test_numeric_id_matches_string_id() {
    let filter = Filter::new().with("objectId", 42);
    assert!(filter.matches(&item("42", "x", None)));
  }

  #[test]
  fn test_numbers_compare_by_value() {
    assert!(values_equal(&json!(3.0), &json!(3)));
    assert!(values_equal(&json!(3.0), &json!("3")));
    assert!(values_equal(&json!(2.5), &json!("2.5")));
    assert!(!values_equal(&json!(3.0), &json!("3.5")));
    assert!(!values_equal(&json!(3.0), &json!("three")));
  }

  #[test]
  fn test_bools_match_their_text() {
    assert!(values_equal(&json!(true), &json!("true")));
    assert!(values_equal(&json!(false), &json!("False")));
    assert!(!values_equal(&json!(true), &json!("false")));
    assert!(!values_equal(&json!(true), &json!("yes")));
  }

  #[test]
  fn test_insertion_order_does_not_matter() {
    let a = Filter::new().with("a", 1).with("b", "x");
    let b: Filter = [("b", json!("x")), ("a", json!(1))].into_iter().collect();
    assert_eq!(a, b);
    assert_eq!(
      serde_json::to_string(&a).unwrap(),
      serde_json::to_string(&b).unwrap()
    );
  }
}
