//! Document identity and page schema
//!
//! The engine treats a document snapshot as opaque JSON. The page schema
//! below is only used to seed new documents; nothing in the collaboration
//! core interprets component semantics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Business identifier of a document
pub type DocumentId = String;

/// Per-document optimistic-lock counter
pub type Version = u64;

/// Version assigned to a freshly created document
pub const INITIAL_VERSION: Version = 1;

/// Page schema: a root id and a flat map of node id to component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSchema {
    pub root_id: i64,
    pub components: BTreeMap<String, Component>,
}

/// One node of a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub children: Vec<i64>,
    #[serde(default = "empty_object")]
    pub props: serde_json::Value,
    #[serde(default = "empty_object")]
    pub styles: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl PageSchema {
    /// Blank page containing only the root component
    pub fn default_page() -> Self {
        let root_id = 1;
        let mut components = BTreeMap::new();
        components.insert(
            root_id.to_string(),
            Component {
                id: root_id,
                name: "Page".to_string(),
                desc: "Page root".to_string(),
                parent_id: None,
                children: Vec::new(),
                props: empty_object(),
                styles: empty_object(),
            },
        );
        Self { root_id, components }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
