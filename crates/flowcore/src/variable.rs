//! Scoped variable store.
//!
//! Variables are addressed by `(node_id, key)` plus an optional path into
//! the stored value. A loop iteration runs against a child store whose
//! parent is the enclosing scope; lookups that miss locally fall through
//! to the parent chain.

use crate::error::ResolutionError;
use crate::schema::JsonSchema;
use crate::value::{display_value, FlowValue, TypedValue, VariableType};
use parking_lot::RwLock;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

/// Node id under which global variables are stored
pub const GLOBAL_SCOPE: &str = "global";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub id: String,
    pub node_id: String,
    pub key: String,
    pub value: Value,
    #[serde(rename = "type")]
    pub value_type: VariableType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_type: Option<VariableType>,
}

/// Arguments for [`VariableStore::set_variable`]
#[derive(Debug, Clone)]
pub struct SetVariable {
    pub node_id: String,
    pub key: String,
    pub value: Value,
    pub value_type: VariableType,
    pub items_type: Option<VariableType>,
}

impl SetVariable {
    /// Variable whose type is inferred from the value
    pub fn inferred(node_id: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        let typed = TypedValue::infer(value);
        Self {
            node_id: node_id.into(),
            key: key.into(),
            value: typed.value,
            value_type: typed.value_type,
            items_type: typed.items_type,
        }
    }

    /// Variable typed by a declaration, falling back to inference
    pub fn declared(
        node_id: impl Into<String>,
        key: impl Into<String>,
        value: Value,
        schema: Option<&JsonSchema>,
    ) -> Self {
        let mut variable = Self::inferred(node_id, key, value);
        if let Some(declared) = schema.and_then(|s| s.schema_type) {
            if declared != VariableType::Unknown {
                variable.value_type = declared;
            }
        }
        if let Some(items) = schema.and_then(|s| s.items_type()) {
            variable.items_type = Some(items);
        }
        variable
    }
}

#[derive(Default)]
struct Scope {
    nodes: HashMap<String, HashMap<String, Variable>>,
}

struct StoreInner {
    id: String,
    scope: RwLock<Scope>,
    parent: RwLock<Option<VariableStore>>,
}

/// Hierarchical key/path to typed-value map owned by one task
#[derive(Clone)]
pub struct VariableStore {
    inner: Arc<StoreInner>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                id: Uuid::new_v4().to_string(),
                scope: RwLock::new(Scope::default()),
                parent: RwLock::new(None),
            }),
        }
    }

    /// New store chained to `self`
    pub fn child(&self) -> Self {
        let child = Self::new();
        child.set_parent(self.clone());
        child
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn set_parent(&self, parent: VariableStore) {
        *self.inner.parent.write() = Some(parent);
    }

    pub fn parent(&self) -> Option<VariableStore> {
        self.inner.parent.read().clone()
    }

    /// Replace a whole variable
    pub fn set_variable(&self, params: SetVariable) {
        let variable = Variable {
            id: Uuid::new_v4().to_string(),
            node_id: params.node_id.clone(),
            key: params.key.clone(),
            value: params.value,
            value_type: params.value_type,
            items_type: params.items_type,
        };
        self.inner
            .scope
            .write()
            .nodes
            .entry(params.node_id)
            .or_default()
            .insert(params.key, variable);
    }

    /// Deep-set `value` at `path` inside a variable, creating it and any
    /// intermediate objects as needed
    pub fn set_value(&self, node_id: &str, key: &str, path: &[String], value: Value) {
        if path.is_empty() {
            self.set_variable(SetVariable::inferred(node_id, key, value));
            return;
        }
        let mut scope = self.inner.scope.write();
        let variables = scope.nodes.entry(node_id.to_string()).or_default();
        let variable = variables.entry(key.to_string()).or_insert_with(|| Variable {
            id: Uuid::new_v4().to_string(),
            node_id: node_id.to_string(),
            key: key.to_string(),
            value: Value::Object(Map::new()),
            value_type: VariableType::Object,
            items_type: None,
        });
        if !variable.value.is_object() && !variable.value.is_array() {
            variable.value = Value::Object(Map::new());
            variable.value_type = VariableType::Object;
            variable.items_type = None;
        }
        deep_set(&mut variable.value, path, value);
    }

    /// Deep-read a variable, walking up the parent chain when this scope
    /// holds nothing for `node_id`
    pub fn get_value(&self, node_id: &str, key: &str, path: &[String]) -> Option<TypedValue> {
        let variable = self.global_get(node_id, key)?;
        if path.is_empty() {
            return Some(TypedValue {
                value: variable.value,
                value_type: variable.value_type,
                items_type: variable.items_type,
            });
        }
        deep_get(&variable.value, path).map(|value| TypedValue::infer(value.clone()))
    }

    fn global_get(&self, node_id: &str, key: &str) -> Option<Variable> {
        {
            let scope = self.inner.scope.read();
            if let Some(variable) = scope.nodes.get(node_id).and_then(|vars| vars.get(key)) {
                return Some(variable.clone());
            }
        }
        self.parent()?.global_get(node_id, key)
    }

    /// Whether any variable is stored for `node_id` in this scope or above
    pub fn has_node(&self, node_id: &str) -> bool {
        if self.inner.scope.read().nodes.contains_key(node_id) {
            return true;
        }
        self.parent().is_some_and(|p| p.has_node(node_id))
    }

    /// Variables stored locally for `node_id`, keyed by variable key
    pub fn node_values(&self, node_id: &str) -> Map<String, Value> {
        self.inner
            .scope
            .read()
            .nodes
            .get(node_id)
            .map(|vars| {
                vars.iter()
                    .map(|(k, v)| (k.clone(), v.value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resolve a `ref` key path `[node_id, key, ...path]`
    pub fn resolve_ref(&self, path: &[String]) -> Result<TypedValue, ResolutionError> {
        let (node_id, rest) = path.split_first().ok_or(ResolutionError::EmptyRef)?;
        let (key, sub_path) = rest.split_first().ok_or(ResolutionError::EmptyRef)?;
        self.get_value(node_id, key, sub_path)
            .ok_or_else(|| ResolutionError::UnresolvedRef(path.join(".")))
    }

    /// Interpolate every `{{a.b.c}}` token in `template`
    pub fn render_template(&self, template: &str) -> Result<String, ResolutionError> {
        let mut rendered = String::with_capacity(template.len());
        let mut last = 0;
        for captures in template_pattern().captures_iter(template) {
            let (Some(whole), Some(token)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            let token = token.as_str().trim();
            let path: Vec<String> = token.split('.').map(str::to_string).collect();
            let value = self
                .resolve_ref(&path)
                .map_err(|_| ResolutionError::UnresolvedTemplateToken(token.to_string()))?;
            rendered.push_str(&template[last..whole.start()]);
            rendered.push_str(&display_value(&value.value));
            last = whole.end();
        }
        rendered.push_str(&template[last..]);
        Ok(rendered)
    }

    /// Turn a value expression into a concrete typed value
    pub fn resolve(&self, value: &FlowValue) -> Result<TypedValue, ResolutionError> {
        match value {
            FlowValue::Constant { content, schema } => {
                let mut typed = TypedValue::infer(content.clone());
                if let Some(declared) = schema.as_ref().and_then(|s| s.schema_type) {
                    if declared != VariableType::Unknown {
                        typed.value_type = declared;
                    }
                }
                if let Some(items) = schema.as_ref().and_then(|s| s.items_type()) {
                    typed.items_type = Some(items);
                }
                Ok(typed)
            }
            FlowValue::Ref { content } => self.resolve_ref(content),
            FlowValue::Template { content } => {
                Ok(TypedValue::infer(Value::String(self.render_template(content)?)))
            }
            FlowValue::Expression { content } => {
                Err(ResolutionError::UnsupportedExpression(content.clone()))
            }
        }
    }
}

impl Default for VariableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VariableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableStore")
            .field("id", &self.inner.id)
            .field("has_parent", &self.inner.parent.read().is_some())
            .finish()
    }
}

fn template_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("template pattern is valid"))
}

fn deep_get<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn deep_set(target: &mut Value, path: &[String], value: Value) {
    let Some((segment, rest)) = path.split_first() else {
        *target = value;
        return;
    };
    if let Value::Array(items) = target {
        if let Ok(index) = segment.parse::<usize>() {
            if index >= items.len() {
                items.resize(index + 1, Value::Null);
            }
            deep_set(&mut items[index], rest, value);
            return;
        }
    }
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        let entry = map.entry(segment.clone()).or_insert(Value::Null);
        if rest.is_empty() {
            *entry = value;
        } else {
            if !entry.is_object() && !entry.is_array() {
                *entry = Value::Object(Map::new());
            }
            deep_set(entry, rest, value);
        }
    }
}
