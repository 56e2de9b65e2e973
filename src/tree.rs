//! Node Tree Model
//!
//! The serialized page document produced by the visual editor: a flat map of
//! node id to node, linked by ordered child ids and parent back-references.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{ExportError, ExportResult};

/// Reserved id of the single root node.
pub const ROOT_ID: &str = "ROOT";

/// A node's component type as the editor serializes it: either a bare string or
/// a resolver record (`{ "resolvedName": "Text" }`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComponentTypeRef {
    Name(String),
    Resolved {
        #[serde(rename = "resolvedName")]
        resolved_name: String,
    },
}

impl ComponentTypeRef {
    pub fn name(&self) -> &str {
        match self {
            ComponentTypeRef::Name(name) => name,
            ComponentTypeRef::Resolved { resolved_name } => resolved_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    #[serde(rename = "type")]
    pub component_type: ComponentTypeRef,
    #[serde(default)]
    pub props: Map<String, Value>,
    #[serde(default)]
    pub is_canvas: bool,
    #[serde(default, alias = "nodes")]
    pub children: Vec<String>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Node {
    pub fn new(component_type: &str) -> Self {
        Node {
            component_type: ComponentTypeRef::Name(component_type.to_string()),
            props: Map::new(),
            is_canvas: false,
            children: Vec::new(),
            parent: None,
            hidden: false,
            display_name: None,
        }
    }

    pub fn component_type(&self) -> &str {
        self.component_type.name()
    }

    /// A prop counts as set when it is present, not null and not an empty string.
    pub fn prop(&self, name: &str) -> Option<&Value> {
        self.props.get(name).filter(|v| is_set(v))
    }
}

pub fn is_set(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// The whole document. Nodes are kept in a sorted map so that every scan that
/// does not follow `children` order still visits nodes deterministically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeTree {
    nodes: BTreeMap<String, Node>,
}

impl NodeTree {
    pub fn new() -> Self {
        NodeTree::default()
    }

    /// Parse the editor's page state. The editor sometimes hands the document
    /// over as a JSON string rather than an object; both are accepted.
    pub fn from_value(value: Value) -> ExportResult<Self> {
        let value = match value {
            Value::String(raw) => serde_json::from_str::<Value>(&raw)
                .map_err(|e| ExportError::InvalidRequest(format!("pageState: {}", e)))?,
            other => other,
        };
        serde_json::from_value(value)
            .map_err(|e| ExportError::InvalidRequest(format!("pageState: {}", e)))
    }

    pub fn from_json(json: &str) -> ExportResult<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| ExportError::InvalidRequest(format!("pageState: {}", e)))?;
        Self::from_value(value)
    }

    pub fn insert(&mut self, id: &str, node: Node) {
        self.nodes.insert(id.to_string(), node);
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn entry(&self, id: &str) -> Option<(&String, &Node)> {
        self.nodes.get_key_value(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn root(&self) -> Option<&Node> {
        self.nodes.get(ROOT_ID)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Node)> {
        self.nodes.iter()
    }

    /// Depth-first pre-order walk from ROOT in `children` order, skipping hidden
    /// subtrees. Assumes the tree has been validated.
    pub fn visible_preorder(&self) -> Vec<&str> {
        let mut order = Vec::new();
        let mut stack = vec![ROOT_ID];
        while let Some(id) = stack.pop() {
            let Some((key, node)) = self.entry(id) else {
                continue;
            };
            if node.hidden {
                continue;
            }
            order.push(key.as_str());
            for child in node.children.iter().rev() {
                stack.push(child.as_str());
            }
        }
        order
    }
}
