//! Attribute lookups over span attribute JSON

use serde_json::Value as JsonValue;

/// Look up an attribute by path in a span attribute payload.
///
/// Instrumentation libraries report attributes either nested
/// (`{"llm": {"token_count": {"prompt": 3}}}`) or flattened
/// (`{"llm.token_count.prompt": 3}`), and sometimes a mix of both
/// (`{"llm": {"token_count.prompt": 3}}`). Every split of the path into
/// dotted segments is tried, shortest first segment first.
pub fn attribute<'a>(attributes: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    if path.is_empty() {
        return Some(attributes);
    }
    let map = attributes.as_object()?;
    (1..=path.len()).find_map(|split| {
        let key = path[..split].join(".");
        map.get(&key)
            .and_then(|value| attribute(value, &path[split..]))
    })
}

/// Integer attribute value. Floats, strings and other types yield None.
pub fn attribute_i64(attributes: &JsonValue, path: &[&str]) -> Option<i64> {
    attribute(attributes, path).and_then(JsonValue::as_i64)
}

/// Identifier-like attribute value: a trimmed non-blank string, or a number
/// rendered as text
pub fn attribute_string(attributes: &JsonValue, path: &[&str]) -> Option<String> {
    match attribute(attributes, path)? {
        JsonValue::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Length of an array attribute, or 0 when absent or not an array
pub fn attribute_len(attributes: &JsonValue, path: &[&str]) -> usize {
    attribute(attributes, path)
        .and_then(JsonValue::as_array)
        .map_or(0, Vec::len)
}
