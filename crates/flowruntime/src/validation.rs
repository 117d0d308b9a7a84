//! Schema and input validation run before a task starts.

use flowcore::{
    node_types, Container, JsonSchema, VariableType, WorkflowDocument, WorkflowError,
    WorkflowSchema,
};
use serde_json::{Map, Value};

/// Build the document and collect every structural problem.
pub fn validate_schema(schema: &WorkflowSchema) -> Result<WorkflowDocument, Vec<WorkflowError>> {
    let document = WorkflowDocument::build(schema).map_err(|e| vec![e])?;
    let mut errors = Vec::new();

    let starts = document.root_nodes_of_type(node_types::START).len();
    if starts != 1 {
        errors.push(WorkflowError::StartNodeCount(starts));
    }
    if document.root_nodes_of_type(node_types::END).is_empty() {
        errors.push(WorkflowError::MissingEndNode);
    }
    check_loop_controls(document.root(), false, &mut errors);

    if errors.is_empty() {
        Ok(document)
    } else {
        Err(errors)
    }
}

fn check_loop_controls(container: &Container, in_loop: bool, errors: &mut Vec<WorkflowError>) {
    for node in &container.nodes {
        let is_control =
            node.node_type == node_types::BREAK || node.node_type == node_types::CONTINUE;
        if is_control && !in_loop {
            errors.push(WorkflowError::OutsideLoop {
                node: node.id.clone(),
                node_type: node.node_type.clone(),
            });
        }
        if let Some(body) = &node.body {
            check_loop_controls(body, in_loop || node.node_type == node_types::LOOP, errors);
        }
    }
}

/// Check task inputs against the start node's declared outputs and fill in
/// declared defaults for missing keys.
pub fn validate_inputs(
    document: &WorkflowDocument,
    mut inputs: Map<String, Value>,
) -> Result<Map<String, Value>, WorkflowError> {
    let Some(declared) = document.start().and_then(|s| s.data.outputs.clone()) else {
        return Ok(inputs);
    };
    let Some(properties) = &declared.properties else {
        return Ok(inputs);
    };

    for (key, property) in properties {
        match inputs.get(key) {
            Some(value) => check_type(key, property, value)?,
            None => {
                if let Some(default) = &property.default {
                    inputs.insert(key.clone(), default.clone());
                } else if declared.is_required(key) {
                    return Err(WorkflowError::InvalidInputs(format!(
                        "missing required input '{}'",
                        key
                    )));
                }
            }
        }
    }
    Ok(inputs)
}

fn check_type(key: &str, property: &JsonSchema, value: &Value) -> Result<(), WorkflowError> {
    let Some(expected) = property.schema_type else {
        return Ok(());
    };
    let actual = VariableType::of(value);
    if expected.accepts(actual) {
        return Ok(());
    }
    Err(WorkflowError::InvalidInputs(format!(
        "input '{}' expected type {}, got {}",
        key, expected, actual
    )))
}
