//! Tool schema cleaning and tool-name sanitization

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value, json};

use crate::error::GatewayError;

/// JSON Schema keywords the upstream rejects
const UNSUPPORTED_KEYWORDS: &[&str] = &[
    "$schema",
    "$ref",
    "$defs",
    "definitions",
    "additionalProperties",
    "minLength",
    "maxLength",
    "minItems",
    "maxItems",
    "uniqueItems",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "default",
    "examples",
    "const",
    "title",
    "patternProperties",
    "propertyNames",
];

const MAX_TOOL_NAME_LEN: usize = 64;

fn valid_name() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.:-]{0,63}$").expect("valid tool name regex"))
}

/// Whether the upstream accepts `name` as-is
pub fn is_valid_tool_name(name: &str) -> bool {
    valid_name().is_match(name)
}

/// Rewrite `name` into the upstream's allowed character set
///
/// Disallowed characters become `_`, a name not starting with a letter or
/// underscore gets an `_` prefix, and the result is capped at 64 characters.
pub fn sanitize_tool_name(name: &str) -> Cow<'_, str> {
    if is_valid_tool_name(name) {
        return Cow::Borrowed(name);
    }

    let mut sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if !sanitized.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        sanitized.insert(0, '_');
    }

    sanitized.truncate(MAX_TOOL_NAME_LEN);
    Cow::Owned(sanitized)
}

/// Validate and clean a tool's parameter schema
///
/// A missing schema becomes an empty object schema; anything other than a
/// JSON object is rejected.
pub fn tool_parameters(tool: &str, schema: Option<Value>) -> Result<Value, GatewayError> {
    let mut schema = match schema {
        None | Some(Value::Null) => return Ok(json!({"type": "object", "properties": {}})),
        Some(schema @ Value::Object(_)) => schema,
        Some(_) => {
            return Err(GatewayError::InvalidRequest(format!(
                "parameters of tool `{tool}` must be a JSON object"
            )));
        }
    };

    clean_schema(&mut schema);
    Ok(schema)
}

/// Strip unsupported keywords recursively
pub fn clean_schema(schema: &mut Value) {
    match schema {
        Value::Object(map) => clean_object(map),
        Value::Array(items) => items.iter_mut().for_each(clean_schema),
        _ => {}
    }
}

fn clean_object(map: &mut Map<String, Value>) {
    map.retain(|key, _| !UNSUPPORTED_KEYWORDS.contains(&key.as_str()));

    let is_string = map.get("type").and_then(Value::as_str) == Some("string");
    if !is_string {
        map.remove("format");
    }

    for (key, value) in map.iter_mut() {
        if key == "properties" {
            // Property names are user data, only their schemas are cleaned
            if let Value::Object(properties) = value {
                properties.values_mut().for_each(clean_schema);
            }
        } else {
            clean_schema(value);
        }
    }
}
