//! Raw WSAPI records and the field-mapping tables used to read them.
//!
//! A raw record can carry a field under its WSAPI name (`FormattedID`) or
//! under its already-normalized name (`formattedId`). Each entity declares an
//! ordered table of the names to try; the WSAPI name comes first.

use serde_json::{Map, Value};

use super::sanitize::sanitize_html;

/// A loosely-typed record as returned by the remote service.
pub type RawRecord = Map<String, Value>;

/// Shown when a record has no owner.
pub const UNKNOWN_OWNER: &str = "Unknown";

/// How a filter on this field is sent to the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matching {
  Equals,
  /// Substring search, applied only when querying the remote service
  Contains,
}

/// One normalized field and the raw names it may appear under.
#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
  pub normalized: &'static str,
  /// Raw names in priority order. The first one is the WSAPI name.
  pub raw: &'static [&'static str],
  pub matching: Matching,
  /// Single-valued identifier (lookups by it return at most one record)
  pub identifier: bool,
  /// Holds a ref to another object, normalized to its `/type/id` path
  pub reference: bool,
}

impl FieldMapping {
  pub const fn new(normalized: &'static str, raw: &'static [&'static str]) -> Self {
    Self {
      normalized,
      raw,
      matching: Matching::Equals,
      identifier: false,
      reference: false,
    }
  }

  pub const fn contains(mut self) -> Self {
    self.matching = Matching::Contains;
    self
  }

  pub const fn identifier(mut self) -> Self {
    self.identifier = true;
    self
  }

  pub const fn reference(mut self) -> Self {
    self.reference = true;
    self
  }

  /// The name the remote service knows this field by.
  pub fn api_name(&self) -> &'static str {
    self.raw.first().copied().unwrap_or(self.normalized)
  }

  fn answers_to(&self, name: &str) -> bool {
    self.normalized.eq_ignore_ascii_case(name)
      || self.raw.iter().any(|raw| raw.eq_ignore_ascii_case(name))
  }
}

/// Find the mapping for a field given either its raw or normalized name.
pub fn resolve<'a>(fields: &'a [FieldMapping], name: &str) -> Option<&'a FieldMapping> {
  fields.iter().find(|field| field.answers_to(name))
}

/// Typed accessors over a raw record, driven by a field-mapping table.
///
/// Every accessor tolerates missing or mistyped fields.
pub struct RawView<'a> {
  raw: &'a RawRecord,
  fields: &'static [FieldMapping],
}

impl<'a> RawView<'a> {
  pub fn new(raw: &'a RawRecord, fields: &'static [FieldMapping]) -> Self {
    Self { raw, fields }
  }

  /// First non-null value under any of the field's raw names.
  pub fn value(&self, normalized: &str) -> Option<&'a Value> {
    let mapping = self.fields.iter().find(|f| f.normalized == normalized)?;
    mapping
      .raw
      .iter()
      .filter_map(|name| self.raw.get(*name))
      .find(|value| !value.is_null())
  }

  /// String or number rendered as text.
  pub fn text(&self, normalized: &str) -> Option<String> {
    match self.value(normalized)? {
      Value::String(s) => Some(s.clone()),
      Value::Number(n) => Some(n.to_string()),
      Value::Bool(b) => Some(b.to_string()),
      _ => None,
    }
  }

  pub fn text_or_default(&self, normalized: &str) -> String {
    self.text(normalized).unwrap_or_default()
  }

  /// Free text with markup stripped. Empty results become `None`.
  pub fn html(&self, normalized: &str) -> Option<String> {
    let text = sanitize_html(&self.text(normalized)?);
    (!text.is_empty()).then_some(text)
  }

  pub fn number(&self, normalized: &str) -> Option<f64> {
    match self.value(normalized)? {
      Value::Number(n) => n.as_f64(),
      Value::String(s) => s.trim().parse().ok(),
      _ => None,
    }
  }

  pub fn flag(&self, normalized: &str) -> bool {
    match self.value(normalized) {
      Some(Value::Bool(b)) => *b,
      Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
      _ => false,
    }
  }

  /// A reference field as a short path such as `/project/123`.
  ///
  /// Accepts `{"_ref": ...}` objects and bare ref strings.
  pub fn reference(&self, normalized: &str) -> Option<String> {
    match self.value(normalized)? {
      Value::String(s) => Some(short_ref(s)),
      Value::Object(obj) => obj
        .get("_ref")
        .and_then(Value::as_str)
        .map(short_ref),
      _ => None,
    }
  }

  /// Display name of a reference field.
  pub fn reference_name(&self, normalized: &str) -> Option<String> {
    let obj = self.value(normalized)?.as_object()?;
    ["_refObjectName", "Name", "name", "DisplayName", "displayName"]
      .iter()
      .filter_map(|key| obj.get(*key).and_then(Value::as_str))
      .find(|name| !name.is_empty())
      .map(String::from)
  }

  /// A plain string, or the display name when the field is a reference.
  pub fn label(&self, normalized: &str) -> Option<String> {
    match self.value(normalized)? {
      Value::String(s) if !s.is_empty() => Some(s.clone()),
      Value::Object(_) => self.reference_name(normalized),
      _ => None,
    }
  }

  /// Owner display name, or the unknown-owner sentinel.
  pub fn owner(&self, normalized: &str) -> String {
    self
      .label(normalized)
      .unwrap_or_else(|| UNKNOWN_OWNER.to_string())
  }

  /// Object id as text, falling back to the tail of the record's own `_ref`.
  pub fn object_id(&self, normalized: &str) -> String {
    self
      .text(normalized)
      .or_else(|| {
        self
          .raw
          .get("_ref")
          .and_then(Value::as_str)
          .and_then(|r| r.trim_end_matches('/').rsplit('/').next())
          .filter(|tail| !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()))
          .map(String::from)
      })
      .unwrap_or_default()
  }
}

/// Shorten a WSAPI ref URL to its `/type/id` path.
///
/// `https://rally1.rallydev.com/slm/webservice/v2.0/project/123` -> `/project/123`.
/// Anything that doesn't look like a WSAPI URL is returned unchanged.
pub fn short_ref(reference: &str) -> String {
  match reference.split_once("/webservice/") {
    Some((_, rest)) => match rest.split_once('/') {
      Some((_version, path)) => format!("/{}", path.trim_end_matches(".js")),
      None => reference.to_string(),
    },
    None => reference.to_string(),
  }
}
