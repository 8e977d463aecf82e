//! Recursive key-case conversion between server and client conventions
//!
//! The server speaks snake_case, the client canonical form is camelCase.
//! Conversion is generic over JSON values; callers pass an exemption list
//! of keys whose values must survive byte-identical (view-stage
//! descriptors embed literal strings as kwarg keys, and rewriting those
//! silently corrupts stage semantics).

use serde_json::{Map, Value};

/// Convert all object keys to camelCase, recursively
///
/// Keys named in `exempt` are still renamed, but their values are passed
/// through untouched at every depth below them.
pub fn to_camel_case(value: Value, exempt: &[&str]) -> Value {
    convert(value, exempt, camel)
}

/// Convert all object keys to snake_case, recursively
///
/// Used for request bodies on endpoints that take server-convention
/// payloads (e.g. similarity sort). Same exemption contract as
/// [`to_camel_case`].
pub fn to_snake_case(value: Value, exempt: &[&str]) -> Value {
    convert(value, exempt, snake)
}

fn convert(value: Value, exempt: &[&str], rename: fn(&str) -> String) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, val) in map {
                let renamed = rename(&key);
                if exempt.contains(&key.as_str()) {
                    out.insert(renamed, val);
                } else {
                    out.insert(renamed, convert(val, exempt, rename));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| convert(item, exempt, rename))
                .collect(),
        ),
        other => other,
    }
}

/// snake_case -> camelCase, preserving any leading underscores
fn camel(key: &str) -> String {
    let prefix_len = key.len() - key.trim_start_matches('_').len();
    let (prefix, rest) = key.split_at(prefix_len);

    let mut out = String::with_capacity(key.len());
    out.push_str(prefix);

    let mut upper_next = false;
    for ch in rest.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// camelCase -> snake_case, preserving any leading underscores
fn snake(key: &str) -> String {
    let prefix_len = key.len() - key.trim_start_matches('_').len();
    let (prefix, rest) = key.split_at(prefix_len);

    let mut out = String::with_capacity(key.len() + 4);
    out.push_str(prefix);

    for ch in rest.chars() {
        if ch.is_uppercase() {
            out.push('_');
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
