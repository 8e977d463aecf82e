//! Canonical session state types
//!
//! The server pushes full snapshots; the client never merges, it
//! replaces. Everything here serializes in the client's camelCase
//! convention.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A label selected in the sample grid or modal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedLabel {
    /// Field the label lives under
    pub field: String,
    /// Label document id
    pub label_id: String,
    /// Owning sample id
    pub sample_id: String,
    /// Frame number for video samples
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_number: Option<u32>,
}

/// The authoritative session snapshot for this tab
///
/// Replaced wholesale on every server push. Setter handlers may patch it
/// optimistically between pushes; the next push supersedes any patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Description {
    /// Dataset identifier; doubles as the URL slug
    pub dataset: Option<String>,

    /// Ordered view-stage list; opaque to the client
    pub view: Value,

    /// URL-safe identifier of a named, persisted view
    pub saved_view_slug: Option<String>,

    /// Opaque field-visibility stage descriptor
    pub field_visibility_stage: Option<Value>,

    /// Selected sample ids
    pub selected: BTreeSet<String>,

    /// Selected labels, in selection order
    pub selected_labels: Vec<SelectedLabel>,

    /// Active slice for grouped datasets
    pub group_slice: Option<String>,

    /// Forward-compatible passthrough of unrecognized snapshot fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Description {
    fn default() -> Self {
        Self {
            dataset: None,
            view: Value::Array(Vec::new()),
            saved_view_slug: None,
            field_visibility_stage: None,
            selected: BTreeSet::new(),
            selected_labels: Vec::new(),
            group_slice: None,
            extra: Map::new(),
        }
    }
}

impl Description {
    /// The view as a GraphQL variable: `null` when no stages are set
    pub fn view_or_null(&self) -> Value {
        match &self.view {
            Value::Array(stages) if stages.is_empty() => Value::Null,
            other => other.clone(),
        }
    }
}

/// Connection readiness of the push channel
///
/// `Closed` is terminal for this layer; reconnection belongs to whoever
/// owns the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyState {
    Connecting,
    Open,
    Closed,
}

/// What a history entry carries so the destination route can hydrate
/// its state synchronously on arrival
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Navigation {
    /// Canonical state for the destination
    pub state: Description,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colorscale: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,

    /// Whether this navigation was forced by a refresh flag
    #[serde(default)]
    pub refresh: bool,

    /// Query variables for the data-fetching layer; present only when a
    /// dataset is present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<DatasetVariables>,
}

/// Variables the route loader feeds into the dataset query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetVariables {
    /// The resolved view, or `null` for the full dataset
    pub view: Value,
}
