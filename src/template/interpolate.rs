//! Text interpolation for `value` fields

use serde_json::Value;
use tera::{Context, Tera};

/// Render `template` with `item` and `context` in scope.
///
/// Strings without template markers are returned as they are.
pub fn interpolate(template: &str, item: &Value, context: &Value) -> tera::Result<String> {
    if !["{{", "{%", "{#"].iter().any(|marker| template.contains(marker)) {
        return Ok(template.to_string());
    }
    let mut scope = Context::new();
    scope.insert("item", item);
    scope.insert("context", context);
    Tera::one_off(template, &scope, false)
}
