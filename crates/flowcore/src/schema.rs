use crate::value::{FlowValue, VariableType};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Node type names that carry control-flow meaning for the engine
pub mod node_types {
    pub const START: &str = "start";
    pub const END: &str = "end";
    pub const CONDITION: &str = "condition";
    pub const LOOP: &str = "loop";
    pub const BREAK: &str = "break";
    pub const CONTINUE: &str = "continue";
    pub const HTTP: &str = "http";
    pub const CODE: &str = "code";
    pub const LLM: &str = "llm";
}

/// Immutable description of a workflow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSchema {
    pub nodes: Vec<NodeSchema>,
    #[serde(default)]
    pub edges: Vec<EdgeSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_variable: Option<JsonSchema>,
}

impl WorkflowSchema {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSchema {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(default)]
    pub data: NodeData,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<NodeSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<EdgeSchema>,
}

impl NodeSchema {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            meta: None,
            data: NodeData::default(),
            blocks: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Loops always own a body, even an empty one
    pub fn is_container(&self) -> bool {
        self.node_type == node_types::LOOP || !self.blocks.is_empty()
    }
}

/// Common node data plus node-specific configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs_values: Option<BTreeMap<String, FlowValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<JsonSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<JsonSchema>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NodeData {
    /// Deserialize the node-specific part of the data
    pub fn config<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.extra.clone()))
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSchema {
    #[serde(rename = "sourceNodeID")]
    pub source_node_id: String,
    #[serde(rename = "targetNodeID")]
    pub target_node_id: String,
    #[serde(rename = "sourcePortID", default, skip_serializing_if = "Option::is_none")]
    pub source_port_id: Option<String>,
    #[serde(rename = "targetPortID", default, skip_serializing_if = "Option::is_none")]
    pub target_port_id: Option<String>,
}

impl EdgeSchema {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source_node_id: source.into(),
            target_node_id: target.into(),
            source_port_id: None,
            target_port_id: None,
        }
    }

    pub fn from_port(mut self, port: impl Into<String>) -> Self {
        self.source_port_id = Some(port.into());
        self
    }

    /// `source[:sourcePort]-target[:targetPort]`
    pub fn id(&self) -> String {
        let mut id = self.source_node_id.clone();
        if let Some(port) = &self.source_port_id {
            id.push(':');
            id.push_str(port);
        }
        id.push('-');
        id.push_str(&self.target_node_id);
        if let Some(port) = &self.target_port_id {
            id.push(':');
            id.push_str(port);
        }
        id
    }
}

/// JSON-schema subset used for type declarations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonSchema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<VariableType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, JsonSchema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<JsonSchema>>,
}

impl JsonSchema {
    pub fn of_type(schema_type: VariableType) -> Self {
        Self {
            schema_type: Some(schema_type),
            ..Self::default()
        }
    }

    pub fn property(&self, key: &str) -> Option<&JsonSchema> {
        self.properties.as_ref()?.get(key)
    }

    pub fn is_required(&self, key: &str) -> bool {
        self.required
            .as_ref()
            .is_some_and(|required| required.iter().any(|r| r == key))
    }

    pub fn items_type(&self) -> Option<VariableType> {
        self.items.as_ref()?.schema_type
    }
}
