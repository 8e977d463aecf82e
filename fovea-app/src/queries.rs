//! Dataset query and the route loader built on it
//!
//! The dataset document fetches the read-only reference data the rest of
//! the app consumes: field schemas, mask targets, run metadata,
//! skeletons, app config. The raw response needs the schema collapse and
//! mask-target transforms before use.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use fovea_common::schema::{
    collapse_fields, convert_targets, Field, MaskTarget, RawTarget, StrictField,
};
use fovea_common::{Error, Result};

use crate::mutations::GraphqlClient;
use crate::router::{dataset_slug, HistoryEntry, RouteLoader};
use crate::store::SessionStore;

/// Full dataset description query
pub const DATASET: &str = "\
query dataset($name: String!, $view: BSONArray = null) {
  dataset(name: $name, view: $view) {
    id
    name
    mediaType
    defaultGroupSlice
    groupField
    groupMediaTypes {
      name
      mediaType
    }
    appConfig {
      gridMediaField
      mediaFields
      plugins
      sidebarGroups {
        name
        paths
      }
    }
    sampleFields {
      ftype
      subfield
      embeddedDocType
      path
      dbField
    }
    frameFields {
      ftype
      subfield
      embeddedDocType
      path
      dbField
    }
    maskTargets {
      name
      targets {
        target
        value
      }
    }
    defaultMaskTargets {
      target
      value
    }
    evaluations {
      key
      version
      timestamp
      viewStages
      config {
        cls
        predField
        gtField
      }
    }
    brainMethods {
      key
      version
      timestamp
      viewStages
      config {
        cls
        embeddingsField
        method
        patchesField
      }
    }
    savedViews {
      id
      name
      slug
      description
      viewStages
    }
    skeletons {
      name
      labels
      edges
    }
    defaultSkeleton {
      labels
      edges
    }
    lastLoadedAt
    createdAt
    version
    viewCls
  }
}";

/// Raw query response shape, before transforms
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawDataset {
    id: String,
    name: String,
    media_type: Option<String>,
    group_field: Option<String>,
    default_group_slice: Option<String>,
    sample_fields: Vec<Field>,
    frame_fields: Vec<Field>,
    mask_targets: Vec<NamedTargets>,
    default_mask_targets: Vec<RawTarget>,
    brain_methods: Value,
    evaluations: Value,
    saved_views: Value,
    skeletons: Value,
    default_skeleton: Value,
    app_config: Value,
    view_cls: Option<String>,
    version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct NamedTargets {
    name: String,
    targets: Vec<RawTarget>,
}

/// Transformed dataset reference data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub id: String,
    pub name: String,
    pub media_type: Option<String>,
    pub group_field: Option<String>,
    pub default_group_slice: Option<String>,
    /// Sample schema, collapsed into a tree
    pub sample_fields: Vec<StrictField>,
    /// Frame schema, collapsed into a tree
    pub frame_fields: Vec<StrictField>,
    /// Per-field mask targets, keyed by field name then target value
    pub mask_targets: BTreeMap<String, BTreeMap<String, MaskTarget>>,
    pub default_mask_targets: BTreeMap<String, MaskTarget>,
    pub brain_methods: Value,
    pub evaluations: Value,
    pub saved_views: Value,
    pub skeletons: Value,
    pub default_skeleton: Value,
    pub app_config: Value,
    pub view_cls: Option<String>,
    pub version: Option<String>,
}

/// Reshape a raw dataset response into its canonical client form
pub fn transform_dataset(raw: Value) -> Result<Dataset> {
    let raw: RawDataset = serde_json::from_value(raw)?;

    let mask_targets = raw
        .mask_targets
        .iter()
        .map(|named| (named.name.clone(), convert_targets(&named.targets)))
        .collect();

    Ok(Dataset {
        id: raw.id,
        name: raw.name,
        media_type: raw.media_type,
        group_field: raw.group_field,
        default_group_slice: raw.default_group_slice,
        sample_fields: collapse_fields(raw.sample_fields),
        frame_fields: collapse_fields(raw.frame_fields),
        mask_targets,
        default_mask_targets: convert_targets(&raw.default_mask_targets),
        brain_methods: raw.brain_methods,
        evaluations: raw.evaluations,
        saved_views: raw.saved_views,
        skeletons: raw.skeletons,
        default_skeleton: raw.default_skeleton,
        app_config: raw.app_config,
        view_cls: raw.view_cls,
        version: raw.version,
    })
}

/// Route loader that resolves the dataset query for dataset paths
///
/// The root path has no data dependency and loads immediately.
pub struct DatasetLoader {
    graphql: GraphqlClient,
    store: Arc<SessionStore>,
}

impl DatasetLoader {
    pub fn new(graphql: GraphqlClient, store: Arc<SessionStore>) -> Self {
        Self { graphql, store }
    }
}

impl RouteLoader for DatasetLoader {
    fn load<'a>(&'a self, entry: &'a HistoryEntry) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let Some(slug) = dataset_slug(&entry.path) else {
                self.store.set_dataset(None).await;
                return Ok(());
            };

            let view = entry
                .nav
                .as_ref()
                .and_then(|nav| nav.variables.as_ref())
                .map(|variables| variables.view.clone())
                .unwrap_or(Value::Null);

            debug!(%slug, "loading dataset route");
            let data = self
                .graphql
                .execute(DATASET, json!({ "name": slug, "view": view }))
                .await?;

            let raw = data.get("dataset").cloned().unwrap_or(Value::Null);
            if raw.is_null() {
                return Err(Error::Graphql(format!("dataset {slug} not found")));
            }

            let dataset = transform_dataset(raw)?;
            info!(name = %dataset.name, "dataset loaded");
            self.store.set_dataset(Some(dataset)).await;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_collapses_schema_and_targets() {
        let dataset = transform_dataset(json!({
            "id": "68",
            "name": "quickstart",
            "mediaType": "image",
            "sampleFields": [
                { "path": "ground_truth", "ftype": "EmbeddedDocumentField" },
                { "path": "ground_truth.detections", "ftype": "ListField" }
            ],
            "frameFields": [],
            "maskTargets": [
                {
                    "name": "segmentation",
                    "targets": [
                        { "target": "1", "value": "cat" },
                        { "target": "#0000ff", "value": "sky" }
                    ]
                }
            ],
            "defaultMaskTargets": [{ "target": "255", "value": "other" }]
        }))
        .unwrap();

        assert_eq!(dataset.sample_fields.len(), 1);
        assert_eq!(dataset.sample_fields[0].fields[0].name, "detections");

        let segmentation = &dataset.mask_targets["segmentation"];
        assert_eq!(segmentation["1"], MaskTarget::Plain("cat".to_string()));
        assert_eq!(
            segmentation["#0000ff"],
            MaskTarget::Rgb {
                label: "sky".to_string(),
                int_target: 2,
            }
        );
        assert_eq!(
            dataset.default_mask_targets["255"],
            MaskTarget::Plain("other".to_string())
        );
    }

    #[test]
    fn dataset_document_queries_the_reference_data() {
        for field in [
            "sampleFields",
            "frameFields",
            "maskTargets",
            "brainMethods",
            "evaluations",
            "savedViews",
            "skeletons",
            "appConfig",
        ] {
            assert!(DATASET.contains(field), "dataset query is missing {field}");
        }
    }
}
