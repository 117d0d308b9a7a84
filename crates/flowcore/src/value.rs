use crate::schema::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Runtime value type of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    Map,
    #[serde(rename = "date-time")]
    DateTime,
    Null,
    #[serde(other)]
    Unknown,
}

impl VariableType {
    /// Infer the type of a concrete JSON value
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => VariableType::Null,
            Value::Bool(_) => VariableType::Boolean,
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    VariableType::Integer
                } else {
                    VariableType::Number
                }
            }
            Value::String(_) => VariableType::String,
            Value::Array(_) => VariableType::Array,
            Value::Object(_) => VariableType::Object,
        }
    }

    /// Items type of an array, taken from its first element
    pub fn items_of(value: &Value) -> Option<Self> {
        value.as_array()?.first().map(VariableType::of)
    }

    /// Whether a value of type `actual` may be stored where `self` is declared
    pub fn accepts(self, actual: VariableType) -> bool {
        match (self, actual) {
            (VariableType::Unknown, _) | (_, VariableType::Unknown) => true,
            (expected, actual) if expected == actual => true,
            (VariableType::Number, VariableType::Integer) => true,
            (VariableType::Map, VariableType::Object) | (VariableType::Object, VariableType::Map) => true,
            (VariableType::DateTime, VariableType::String) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VariableType::String => "string",
            VariableType::Integer => "integer",
            VariableType::Number => "number",
            VariableType::Boolean => "boolean",
            VariableType::Object => "object",
            VariableType::Array => "array",
            VariableType::Map => "map",
            VariableType::DateTime => "date-time",
            VariableType::Null => "null",
            VariableType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative value expression found in node data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FlowValue {
    /// Literal, typed by its optional schema
    Constant {
        content: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<JsonSchema>,
    },
    /// Key path into the variable store, e.g. `["start_0", "query"]`
    Ref { content: Vec<String> },
    /// String with `{{a.b.c}}` interpolation
    Template { content: String },
    /// Reserved
    Expression {
        #[serde(default)]
        content: String,
    },
}

impl FlowValue {
    pub fn constant(content: impl Into<Value>) -> Self {
        FlowValue::Constant {
            content: content.into(),
            schema: None,
        }
    }

    pub fn reference<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FlowValue::Ref {
            content: path.into_iter().map(Into::into).collect(),
        }
    }

    pub fn template(content: impl Into<String>) -> Self {
        FlowValue::Template {
            content: content.into(),
        }
    }
}

/// A concrete value together with its runtime type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedValue {
    pub value: Value,
    #[serde(rename = "type")]
    pub value_type: VariableType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_type: Option<VariableType>,
}

impl TypedValue {
    pub fn infer(value: Value) -> Self {
        let value_type = VariableType::of(&value);
        let items_type = VariableType::items_of(&value);
        Self {
            value,
            value_type,
            items_type,
        }
    }
}

/// Render a value for string interpolation
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
