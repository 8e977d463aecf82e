//! GraphQL mutations over HTTP
//!
//! Every mutation carries the subscription identifier so the backend can
//! distinguish the origin of state changes and avoid echoing a client's
//! own edits back to it. Responses are either boolean acknowledgements
//! or the updated entity.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use fovea_common::{Error, Result};

/// Set the active dataset (or clear it with a null name)
pub const SET_DATASET: &str = "\
mutation setDataset($subscription: String!, $session: String, $name: String) {
  setDataset(subscription: $subscription, session: $session, name: $name)
}";

/// Replace the view; returns the resolved stage list
pub const SET_VIEW: &str = "\
mutation setView(
  $subscription: String!
  $session: String
  $view: BSONArray!
  $savedViewSlug: String
  $datasetName: String!
  $form: StateForm!
) {
  setView(
    subscription: $subscription
    session: $session
    view: $view
    savedViewSlug: $savedViewSlug
    datasetName: $datasetName
    form: $form
  )
}";

/// Switch the active slice of a grouped dataset
pub const SET_GROUP_SLICE: &str = "\
mutation setGroupSlice(
  $subscription: String!
  $session: String
  $view: BSONArray!
  $slice: String!
) {
  setGroupSlice(
    subscription: $subscription
    session: $session
    view: $view
    slice: $slice
  ) {
    id
  }
}";

/// Replace the selected-samples set
pub const SET_SELECTED: &str = "\
mutation setSelected($subscription: String!, $session: String, $selected: [String!]!) {
  setSelected(subscription: $subscription, session: $session, selected: $selected)
}";

/// Replace the selected-labels list
pub const SET_SELECTED_LABELS: &str = "\
mutation setSelectedLabels(
  $subscription: String!
  $session: String
  $selectedLabels: [SelectedLabelInput!]!
) {
  setSelectedLabels(
    subscription: $subscription
    session: $session
    selectedLabels: $selectedLabels
  )
}";

/// Replace or clear the field-visibility stage
pub const SET_FIELD_VISIBILITY_STAGE: &str = "\
mutation setFieldVisibilityStage($subscription: String!, $session: String, $stage: BSON) {
  setFieldVisibilityStage(subscription: $subscription, session: $session, stage: $stage)
}";

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

/// Thin GraphQL-over-HTTP client
#[derive(Debug, Clone)]
pub struct GraphqlClient {
    http: reqwest::Client,
    endpoint: String,
}

impl GraphqlClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            endpoint: format!("{base_url}/graphql"),
        }
    }

    /// Execute one document; server-side errors become `Error::Graphql`
    pub async fn execute(&self, document: &str, variables: Value) -> Result<Value> {
        let operation = operation_name(document);
        debug!(operation, "executing GraphQL document");

        let response = self
            .http
            .post(&self.endpoint)
            .json(&json!({ "query": document, "variables": variables }))
            .send()
            .await?
            .error_for_status()?;

        let body: GraphqlResponse = response.json().await?;
        if !body.errors.is_empty() {
            let messages: Vec<&str> = body
                .errors
                .iter()
                .map(|error| error.message.as_str())
                .collect();
            warn!(operation, ?messages, "GraphQL document failed");
            return Err(Error::Graphql(messages.join("; ")));
        }

        Ok(body.data.unwrap_or(Value::Null))
    }
}

/// Pull the operation name out of a document, for logging
fn operation_name(document: &str) -> &str {
    document
        .split_whitespace()
        .nth(1)
        .map(|name| name.split('(').next().unwrap_or(name))
        .unwrap_or("unknown")
}
