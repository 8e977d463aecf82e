//! Dataset schema and mask-target helpers
//!
//! The dataset query returns field schemas as flat dotted paths and mask
//! targets as `{target, value}` pairs; both need reshaping before the
//! rest of the client can use them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A field as returned by the dataset query: one entry per dotted path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Field {
    pub path: String,
    pub ftype: String,
    pub subfield: Option<String>,
    pub embedded_doc_type: Option<String>,
    pub db_field: Option<String>,
}

/// A field with its children resolved into a tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StrictField {
    pub name: String,
    pub path: String,
    pub ftype: String,
    pub subfield: Option<String>,
    pub embedded_doc_type: Option<String>,
    pub db_field: Option<String>,
    pub fields: Vec<StrictField>,
}

#[derive(Default)]
struct Node {
    field: Option<Field>,
    children: BTreeMap<String, Node>,
}

/// Collapse flat dotted field paths into a nested schema tree
///
/// A parent that only ever appears as a path prefix still gets a node,
/// with empty type information.
pub fn collapse_fields(paths: Vec<Field>) -> Vec<StrictField> {
    let mut root = Node::default();

    for field in paths {
        let keys: Vec<&str> = field.path.split('.').collect();
        let mut node = &mut root;
        for (depth, key) in keys.iter().enumerate() {
            node = node.children.entry((*key).to_string()).or_default();
            if depth == keys.len() - 1 {
                node.field = Some(field.clone());
            }
        }
    }

    to_strict(root.children)
}

fn to_strict(children: BTreeMap<String, Node>) -> Vec<StrictField> {
    children
        .into_iter()
        .map(|(name, node)| {
            let field = node.field.unwrap_or_default();
            StrictField {
                name,
                path: field.path,
                ftype: field.ftype,
                subfield: field.subfield,
                embedded_doc_type: field.embedded_doc_type,
                db_field: field.db_field,
                fields: to_strict(node.children),
            }
        })
        .collect()
}

/// A mask target as returned by the dataset query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTarget {
    pub target: String,
    pub value: String,
}

/// A resolved mask-target lookup value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaskTarget {
    /// Integer-keyed target for non-RGB masks: just the label
    Plain(String),
    /// RGB-keyed target; `int_target` starts at 1 because 0 is reserved
    /// for background
    Rgb {
        label: String,
        #[serde(rename = "intTarget")]
        int_target: u32,
    },
}

/// Reshape a target list into a lookup keyed by target value
pub fn convert_targets(targets: &[RawTarget]) -> BTreeMap<String, MaskTarget> {
    targets
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            let resolved = if raw.target.parse::<f64>().is_ok() {
                MaskTarget::Plain(raw.value.clone())
            } else {
                MaskTarget::Rgb {
                    label: raw.value.clone(),
                    int_target: index as u32 + 1,
                }
            };
            (raw.target.clone(), resolved)
        })
        .collect()
}
