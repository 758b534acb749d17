//! Serde-deserializable types matching Rally WSAPI responses.
//!
//! Records themselves stay loosely typed (`RawRecord`); only the envelope is
//! decoded here.

use serde::Deserialize;

use super::fields::RawRecord;

/// Top-level body of a WSAPI collection query.
#[derive(Debug, Deserialize)]
pub struct ApiQueryResponse {
  #[serde(rename = "QueryResult")]
  pub query_result: ApiQueryResult,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApiQueryResult {
  #[serde(default)]
  pub results: Vec<RawRecord>,
  #[serde(default)]
  pub total_result_count: usize,
  #[serde(default)]
  pub errors: Vec<String>,
  #[serde(default)]
  pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_decode_query_result() {
    let body = r#"{
      "QueryResult": {
        "_rallyAPIMajor": "2",
        "Errors": [],
        "Warnings": ["Please update your client"],
        "TotalResultCount": 2,
        "StartIndex": 1,
        "PageSize": 200,
        "Results": [
          {"ObjectID": 1, "Name": "One"},
          {"ObjectID": 2, "Name": "Two"}
        ]
      }
    }"#;

    let response: ApiQueryResponse = serde_json::from_str(body).unwrap();
    let result = response.query_result;
    assert_eq!(result.total_result_count, 2);
    assert_eq!(result.results.len(), 2);
    assert_eq!(result.results[1]["Name"], "Two");
    assert!(result.errors.is_empty());
    assert_eq!(result.warnings.len(), 1);
  }

  #[test]
  fn test_decode_error_envelope() {
    let body = r#"{"QueryResult": {"Errors": ["Could not parse: bad query"]}}"#;
    let response: ApiQueryResponse = serde_json::from_str(body).unwrap();
    assert_eq!(response.query_result.errors, vec!["Could not parse: bad query"]);
    assert!(response.query_result.results.is_empty());
  }
}
