//! State reducer: server snapshot -> canonical state + route target
//!
//! Server payloads arrive in snake_case with `colorscale` and `config`
//! nested inside `state`. The reducer normalizes naming, maps the wire
//! `view_name` onto the canonical saved-view slug, and computes the URL
//! the router should apply.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;
use tracing::trace;

use fovea_common::case::to_camel_case;
use fovea_common::events::StateUpdatePayload;
use fovea_common::state::{DatasetVariables, Description, Navigation};
use fovea_common::{Error, Result};

/// Payload fields whose values must never be key-case-rewritten
///
/// `view` embeds opaque literal strings as kwarg keys; `view_name` is a
/// raw saved-view identifier. This list is a contract: extending or
/// shrinking it silently corrupts view-stage semantics.
pub const CASE_EXEMPT_FIELDS: &[&str] = &["view", "view_name"];

/// Percent-encoding set matching JavaScript's `encodeURIComponent`
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Where the router should go, and what the destination needs to hydrate
#[derive(Debug, Clone, PartialEq)]
pub struct RouteTarget {
    /// Path component, e.g. `/datasets/quickstart`
    pub path: String,
    /// Query string without the leading `?`; may be empty
    pub search: String,
    /// Hydration payload for the destination route
    pub nav: Navigation,
}

impl RouteTarget {
    /// Full location string; omits the `?` when the query is empty
    pub fn href(&self) -> String {
        if self.search.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.search)
        }
    }
}

/// URL inputs taken from the current location instead of the payload
/// (stateless mode)
#[derive(Debug, Clone, Default)]
pub struct UrlOverride {
    pub dataset: Option<String>,
    pub view: Option<String>,
}

/// A fully reduced state update
#[derive(Debug, Clone, PartialEq)]
pub struct Reduced {
    pub description: Description,
    pub colorscale: Option<Value>,
    pub config: Option<Value>,
    pub refresh: bool,
    pub target: RouteTarget,
}

/// Reduce a server snapshot against the current query string
///
/// `url_override` is `Some` in stateless mode, where the URL keeps
/// tracking the current location rather than the session payload.
pub fn reduce(
    payload: &StateUpdatePayload,
    current_search: &str,
    url_override: Option<&UrlOverride>,
) -> Result<Reduced> {
    let mut state = match payload.state.clone() {
        Value::Object(map) => map,
        other => {
            return Err(Error::Transport(format!(
                "state update carried a non-object state: {other}"
            )))
        }
    };

    let colorscale = state.remove("colorscale");
    let config = state.remove("config");

    let converted = to_camel_case(Value::Object(state), CASE_EXEMPT_FIELDS);
    let description = description_from(converted)?;

    let (url_dataset, url_view) = match url_override {
        Some(over) => (over.dataset.as_deref(), over.view.as_deref()),
        None => (
            description.dataset.as_deref(),
            description.saved_view_slug.as_deref(),
        ),
    };

    let search = set_view_param(current_search, url_view);
    let path = resolve_path(url_dataset);
    trace!(%path, refresh = payload.refresh, "reduced state update");

    let variables = description
        .dataset
        .is_some()
        .then(|| DatasetVariables {
            view: description.view_or_null(),
        });

    let nav = Navigation {
        state: description.clone(),
        colorscale: colorscale.clone(),
        config: config.clone(),
        refresh: payload.refresh,
        variables,
    };

    Ok(Reduced {
        description,
        colorscale,
        config,
        refresh: payload.refresh,
        target: RouteTarget { path, search, nav },
    })
}

fn description_from(converted: Value) -> Result<Description> {
    let mut map = match converted {
        Value::Object(map) => map,
        other => {
            return Err(Error::Transport(format!(
                "state did not normalize to an object: {other}"
            )))
        }
    };

    // wire payloads carry the saved-view slug as view_name
    if !map.contains_key("savedViewSlug") {
        if let Some(slug) = map.remove("viewName") {
            map.insert("savedViewSlug".to_string(), slug);
        }
    } else {
        map.remove("viewName");
    }

    Ok(serde_json::from_value(Value::Object(map))?)
}

/// Set or remove the `view` query parameter, leaving every other
/// parameter byte-identical and in place
///
/// When replacing, the new value lands where the first `view` parameter
/// was; when adding, it appends. All other `view` occurrences are
/// dropped.
pub fn set_view_param(current_search: &str, slug: Option<&str>) -> String {
    let raw = current_search.strip_prefix('?').unwrap_or(current_search);

    let mut params: Vec<String> = Vec::new();
    let mut first_view = None;
    for pair in raw.split('&').filter(|pair| !pair.is_empty()) {
        if param_name(pair) == "view" {
            first_view.get_or_insert(params.len());
        } else {
            params.push(pair.to_string());
        }
    }

    if let Some(slug) = slug {
        let entry = format!("view={}", utf8_percent_encode(slug, COMPONENT));
        let at = first_view.unwrap_or(params.len());
        params.insert(at, entry);
    }

    params.join("&")
}

fn param_name(pair: &str) -> &str {
    pair.split('=').next().unwrap_or(pair)
}

/// Compute the canonical path component for a dataset
pub fn resolve_path(dataset: Option<&str>) -> String {
    match dataset {
        Some(dataset) => format!("/datasets/{}", utf8_percent_encode(dataset, COMPONENT)),
        None => "/".to_string(),
    }
}
