//! Setter registry: local session edits, round-tripped through the
//! backend
//!
//! A closed set of session fields, each with exactly one handler
//! registered at startup. Every handler issues exactly one backend
//! mutation carrying the subscription identifier, then patches local
//! state optimistically; failures propagate to the caller's error
//! boundary unretried. Rapid repeated calls may race; the store is
//! last-write-wins and handlers never assume theirs is the only write
//! in flight.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use fovea_common::case::to_snake_case;
use fovea_common::state::{DatasetVariables, Description, Navigation, SelectedLabel};
use fovea_common::view::views_are_equal;
use fovea_common::{Error, Result};

use crate::mutations::{
    GraphqlClient, SET_DATASET, SET_FIELD_VISIBILITY_STAGE, SET_GROUP_SLICE, SET_SELECTED,
    SET_SELECTED_LABELS, SET_VIEW,
};
use crate::reducer::{resolve_path, set_view_param, RouteTarget};
use crate::router::Router;
use crate::store::SessionStore;

/// Everything a setter handler needs: current reactive state and a
/// mutation-issuing capability
pub struct SessionContext {
    pub store: Arc<SessionStore>,
    pub router: Arc<Mutex<Router>>,
    pub graphql: GraphqlClient,
    pub http: reqwest::Client,
    pub base_url: String,
    pub subscription: Uuid,
}

/// The closed set of session fields with registered setters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionField {
    DatasetName,
    View,
    ViewName,
    Refresh,
    FieldVisibilityStage,
    SimilarityParameters,
    GroupSlice,
    SelectedSamples,
    SelectedLabels,
}

impl SessionField {
    /// Every recognized field, for registration and totality checks
    pub const ALL: [SessionField; 9] = [
        SessionField::DatasetName,
        SessionField::View,
        SessionField::ViewName,
        SessionField::Refresh,
        SessionField::FieldVisibilityStage,
        SessionField::SimilarityParameters,
        SessionField::GroupSlice,
        SessionField::SelectedSamples,
        SessionField::SelectedLabels,
    ];
}

/// Similarity-search parameters for sorting by embedding distance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortBySimilarityParameters {
    pub brain_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse: Option<bool>,
    /// Text prompt or query ids; when absent the current selection is
    /// the query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dist_field: Option<String>,
}

/// A new value for one session field; `None` means reset to default
#[derive(Debug, Clone, PartialEq)]
pub enum SetterValue {
    DatasetName(Option<String>),
    View(Value),
    ViewName(Option<String>),
    Refresh,
    FieldVisibilityStage(Option<Value>),
    SimilarityParameters(SortBySimilarityParameters),
    GroupSlice(String),
    SelectedSamples(BTreeSet<String>),
    SelectedLabels(Vec<SelectedLabel>),
}

impl SetterValue {
    /// The field this value targets
    pub fn field(&self) -> SessionField {
        match self {
            SetterValue::DatasetName(_) => SessionField::DatasetName,
            SetterValue::View(_) => SessionField::View,
            SetterValue::ViewName(_) => SessionField::ViewName,
            SetterValue::Refresh => SessionField::Refresh,
            SetterValue::FieldVisibilityStage(_) => SessionField::FieldVisibilityStage,
            SetterValue::SimilarityParameters(_) => SessionField::SimilarityParameters,
            SetterValue::GroupSlice(_) => SessionField::GroupSlice,
            SetterValue::SelectedSamples(_) => SessionField::SelectedSamples,
            SetterValue::SelectedLabels(_) => SessionField::SelectedLabels,
        }
    }
}

type Handler = for<'a> fn(&'a SessionContext, SetterValue) -> BoxFuture<'a, Result<()>>;

/// Field-to-handler mapping, closed at startup
pub struct SetterRegistry {
    handlers: HashMap<SessionField, Handler>,
}

impl SetterRegistry {
    /// Register every handler; the registry is never extended at runtime
    pub fn new() -> Self {
        let mut handlers: HashMap<SessionField, Handler> = HashMap::new();
        handlers.insert(SessionField::DatasetName, |ctx, value| {
            Box::pin(on_set_dataset(ctx, value))
        });
        handlers.insert(SessionField::View, |ctx, value| {
            Box::pin(on_set_view(ctx, value))
        });
        handlers.insert(SessionField::ViewName, |ctx, value| {
            Box::pin(on_set_view_name(ctx, value))
        });
        handlers.insert(SessionField::Refresh, |ctx, value| {
            Box::pin(on_refresh(ctx, value))
        });
        handlers.insert(SessionField::FieldVisibilityStage, |ctx, value| {
            Box::pin(on_set_field_visibility_stage(ctx, value))
        });
        handlers.insert(SessionField::SimilarityParameters, |ctx, value| {
            Box::pin(on_set_similarity_parameters(ctx, value))
        });
        handlers.insert(SessionField::GroupSlice, |ctx, value| {
            Box::pin(on_set_group_slice(ctx, value))
        });
        handlers.insert(SessionField::SelectedSamples, |ctx, value| {
            Box::pin(on_set_selected(ctx, value))
        });
        handlers.insert(SessionField::SelectedLabels, |ctx, value| {
            Box::pin(on_set_selected_labels(ctx, value))
        });
        Self { handlers }
    }

    /// Dispatch a new value to its field's handler
    pub async fn apply(&self, ctx: &SessionContext, value: SetterValue) -> Result<()> {
        let field = value.field();
        debug!(?field, "applying session setter");
        let handler = self
            .handlers
            .get(&field)
            .ok_or_else(|| Error::Precondition(format!("no handler registered for {field:?}")))?;
        handler(ctx, value).await
    }
}

impl Default for SetterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The dataset the current description names, or a precondition error
async fn require_dataset(ctx: &SessionContext) -> Result<(String, Description)> {
    let description = ctx.store.description().await;
    match description.dataset.clone() {
        Some(dataset) => Ok((dataset, description)),
        None => Err(Error::Precondition("no dataset".to_string())),
    }
}

/// Push a history entry reflecting a changed dataset/saved-view, using
/// the same path rules as the reducer
async fn push_url(ctx: &SessionContext, dataset: Option<&str>, slug: Option<&str>) {
    let description = ctx.store.description().await;
    let state = ctx.store.snapshot().await;

    let variables = dataset.map(|_| DatasetVariables {
        view: description.view_or_null(),
    });
    let nav = Navigation {
        state: description,
        colorscale: state.colorscale,
        config: state.config,
        refresh: false,
        variables,
    };

    let mut router = ctx.router.lock().await;
    let search = set_view_param(&router.location().search, slug);
    let path = resolve_path(dataset);
    router.push(RouteTarget { path, search, nav });
}

async fn on_set_dataset(ctx: &SessionContext, value: SetterValue) -> Result<()> {
    let SetterValue::DatasetName(name) = value else {
        return Err(mismatch(SessionField::DatasetName));
    };

    ctx.graphql
        .execute(
            SET_DATASET,
            json!({
                "subscription": ctx.subscription,
                "session": null,
                "name": name,
            }),
        )
        .await?;

    ctx.store
        .patch(|description| {
            description.dataset = name.clone();
            description.view = Value::Array(Vec::new());
            description.saved_view_slug = None;
            description.field_visibility_stage = None;
            description.group_slice = None;
            description.selected.clear();
            description.selected_labels.clear();
        })
        .await;

    push_url(ctx, name.as_deref(), None).await;
    Ok(())
}

async fn on_set_view(ctx: &SessionContext, value: SetterValue) -> Result<()> {
    let SetterValue::View(view) = value else {
        return Err(mismatch(SessionField::View));
    };
    let (dataset, _) = require_dataset(ctx).await?;

    let data = ctx
        .graphql
        .execute(
            SET_VIEW,
            json!({
                "subscription": ctx.subscription,
                "session": null,
                "view": view,
                "savedViewSlug": null,
                "datasetName": dataset,
                "form": {},
            }),
        )
        .await?;
    let resolved = data.get("setView").cloned().unwrap_or(view);

    ctx.store
        .patch(|description| {
            // selections only survive a view change that is a no-op
            // modulo private kwargs
            if !views_are_equal(&description.view, &resolved) {
                description.selected.clear();
                description.selected_labels.clear();
            }
            description.view = resolved.clone();
            description.saved_view_slug = None;
            description.field_visibility_stage = None;
        })
        .await;

    push_url(ctx, Some(&dataset), None).await;
    Ok(())
}

async fn on_set_view_name(ctx: &SessionContext, value: SetterValue) -> Result<()> {
    let SetterValue::ViewName(slug) = value else {
        return Err(mismatch(SessionField::ViewName));
    };
    let (dataset, _) = require_dataset(ctx).await?;

    let data = ctx
        .graphql
        .execute(
            SET_VIEW,
            json!({
                "subscription": ctx.subscription,
                "session": null,
                "view": [],
                "savedViewSlug": slug,
                "datasetName": dataset,
                "form": {},
            }),
        )
        .await?;
    let resolved = data
        .get("setView")
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));

    ctx.store
        .patch(|description| {
            description.view = resolved.clone();
            description.saved_view_slug = slug.clone();
            description.field_visibility_stage = None;
            description.selected.clear();
            description.selected_labels.clear();
        })
        .await;

    push_url(ctx, Some(&dataset), slug.as_deref()).await;
    Ok(())
}

/// Force a reload without a state change by re-issuing the current view;
/// the backend answers with a refresh-flagged push
async fn on_refresh(ctx: &SessionContext, value: SetterValue) -> Result<()> {
    let SetterValue::Refresh = value else {
        return Err(mismatch(SessionField::Refresh));
    };
    let (dataset, description) = require_dataset(ctx).await?;

    ctx.graphql
        .execute(
            SET_VIEW,
            json!({
                "subscription": ctx.subscription,
                "session": null,
                "view": description.view,
                "savedViewSlug": description.saved_view_slug,
                "datasetName": dataset,
                "form": {},
            }),
        )
        .await?;
    Ok(())
}

async fn on_set_field_visibility_stage(ctx: &SessionContext, value: SetterValue) -> Result<()> {
    let SetterValue::FieldVisibilityStage(stage) = value else {
        return Err(mismatch(SessionField::FieldVisibilityStage));
    };

    ctx.graphql
        .execute(
            SET_FIELD_VISIBILITY_STAGE,
            json!({
                "subscription": ctx.subscription,
                "session": null,
                "stage": stage,
            }),
        )
        .await?;

    ctx.store
        .patch(|description| description.field_visibility_stage = stage.clone())
        .await;
    Ok(())
}

/// Similarity sort goes to the dedicated `/sort` endpoint, which takes
/// server-convention (snake_case) bodies
async fn on_set_similarity_parameters(ctx: &SessionContext, value: SetterValue) -> Result<()> {
    let SetterValue::SimilarityParameters(parameters) = value else {
        return Err(mismatch(SessionField::SimilarityParameters));
    };
    let (dataset, description) = require_dataset(ctx).await?;

    let mut body = json!({
        "dataset": dataset,
        "view": description.view,
        "subscription": ctx.subscription,
    });
    let extra = to_snake_case(serde_json::to_value(&parameters)?, &[]);
    if let (Value::Object(body), Value::Object(extra)) = (&mut body, extra) {
        body.extend(extra);
    }

    ctx.http
        .post(format!("{}/sort", ctx.base_url))
        .json(&body)
        .send()
        .await?
        .error_for_status()?;

    ctx.store
        .patch(|description| {
            description.extra.insert(
                "similarityParameters".to_string(),
                serde_json::to_value(&parameters).unwrap_or(Value::Null),
            );
        })
        .await;
    Ok(())
}

async fn on_set_group_slice(ctx: &SessionContext, value: SetterValue) -> Result<()> {
    let SetterValue::GroupSlice(slice) = value else {
        return Err(mismatch(SessionField::GroupSlice));
    };
    let (_, description) = require_dataset(ctx).await?;

    ctx.graphql
        .execute(
            SET_GROUP_SLICE,
            json!({
                "subscription": ctx.subscription,
                "session": null,
                "view": description.view,
                "slice": slice,
            }),
        )
        .await?;

    ctx.store
        .patch(|description| description.group_slice = Some(slice.clone()))
        .await;
    Ok(())
}

async fn on_set_selected(ctx: &SessionContext, value: SetterValue) -> Result<()> {
    let SetterValue::SelectedSamples(selected) = value else {
        return Err(mismatch(SessionField::SelectedSamples));
    };

    ctx.graphql
        .execute(
            SET_SELECTED,
            json!({
                "subscription": ctx.subscription,
                "session": null,
                "selected": selected,
            }),
        )
        .await?;

    ctx.store
        .patch(|description| description.selected = selected.clone())
        .await;
    Ok(())
}

async fn on_set_selected_labels(ctx: &SessionContext, value: SetterValue) -> Result<()> {
    let SetterValue::SelectedLabels(labels) = value else {
        return Err(mismatch(SessionField::SelectedLabels));
    };

    ctx.graphql
        .execute(
            SET_SELECTED_LABELS,
            json!({
                "subscription": ctx.subscription,
                "session": null,
                "selectedLabels": labels,
            }),
        )
        .await?;

    ctx.store
        .patch(|description| description.selected_labels = labels.clone())
        .await;
    Ok(())
}

fn mismatch(field: SessionField) -> Error {
    Error::Precondition(format!("{field:?} handler received a mismatched payload"))
}
