//! Markup stripping for free-text fields.

use fancy_regex::Regex;
use std::sync::LazyLock;

static TAG: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"<[^<>]*>").expect("tag pattern is valid"));

/// Strip markup tags from `input`.
///
/// Tags are removed repeatedly until nothing changes, so nested fragments
/// such as `<<b>script>` cannot reassemble into a tag. Any stray angle
/// brackets left afterwards are dropped. The result never contains `<` or
/// `>`, which makes the function idempotent.
pub fn sanitize_html(input: &str) -> String {
  let mut text = input.to_string();
  loop {
    let stripped = TAG.replace_all(&text, "").into_owned();
    if stripped == text {
      break;
    }
    text = stripped;
  }

  text.retain(|c| c != '<' && c != '>');
  text.trim().to_string()
}
