//! View-stage helpers
//!
//! Stages are opaque descriptors of the shape
//! `{ "_cls": ..., "kwargs": [[key, value], ...] }`. Comparison must
//! ignore private kwargs (keys starting with `_`), which carry
//! server-side bookkeeping that differs between otherwise equal views.

use serde_json::{json, Value};

/// Serialize stages with private kwargs dropped
pub fn filter_view(stages: &Value) -> String {
    let filtered: Vec<Value> = stages
        .as_array()
        .map(|stages| {
            stages
                .iter()
                .map(|stage| {
                    let kwargs: Vec<Value> = stage["kwargs"]
                        .as_array()
                        .map(|kwargs| {
                            kwargs
                                .iter()
                                .filter(|pair| {
                                    !pair[0]
                                        .as_str()
                                        .is_some_and(|key| key.starts_with('_'))
                                })
                                .cloned()
                                .collect()
                        })
                        .unwrap_or_default();
                    json!({ "kwargs": kwargs, "_cls": stage["_cls"] })
                })
                .collect()
        })
        .unwrap_or_default();

    serde_json::to_string(&filtered).unwrap_or_else(|_| "[]".to_string())
}

/// Whether two stage lists are equal modulo private kwargs
pub fn views_are_equal(a: &Value, b: &Value) -> bool {
    filter_view(a) == filter_view(b)
}
