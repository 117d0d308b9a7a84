use async_trait::async_trait;
use flowcore::{
    node_types, ExecutionContext, ExecutionOutput, ExecutorError, FiredPorts, FlowValue,
    LoopControl, LoopSignal, NodeExecutor, NodeMetadata, ResolutionError, SetVariable,
    VariableType,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoopConfig {
    loop_for: FlowValue,
    #[serde(default)]
    loop_outputs: BTreeMap<String, FlowValue>,
}

/// Runs its body once per array element, in order
pub struct LoopExecutor;

impl LoopExecutor {
    /// Node id under which `item` and `index` are visible to the body
    pub fn locals_id(node_id: &str) -> String {
        format!("{}_locals", node_id)
    }
}

#[async_trait]
impl NodeExecutor for LoopExecutor {
    fn node_type(&self) -> &str {
        node_types::LOOP
    }

    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionOutput, ExecutorError> {
        let config: LoopConfig = ctx.config()?;
        let items = match ctx.resolve(&config.loop_for)?.value {
            Value::Array(items) => items,
            other => {
                return Err(ExecutorError::InvalidInputType {
                    field: "loopFor".to_string(),
                    expected: "array".to_string(),
                    actual: VariableType::of(&other).to_string(),
                })
            }
        };

        let locals = Self::locals_id(ctx.node_id());
        let mut collected: BTreeMap<String, Vec<Value>> = config
            .loop_outputs
            .keys()
            .map(|key| (key.clone(), Vec::new()))
            .collect();

        let total = items.len();
        for (index, item) in items.into_iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(ExecutorError::Cancelled);
            }

            let scope = ctx.variables.child();
            scope.set_variable(SetVariable::inferred(&locals, "item", item));
            scope.set_variable(SetVariable::inferred(&locals, "index", json!(index)));

            let signal = LoopSignal::new();
            ctx.runner
                .run_block(&ctx, scope.clone(), signal.clone())
                .await?;

            for (key, value) in &config.loop_outputs {
                match scope.resolve(value) {
                    Ok(typed) => {
                        if let Some(values) = collected.get_mut(key) {
                            values.push(typed.value);
                        }
                    }
                    // Body nodes skipped this iteration
                    Err(ResolutionError::UnresolvedRef(_))
                    | Err(ResolutionError::UnresolvedTemplateToken(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }

            if signal.get() == Some(LoopControl::Break) {
                ctx.events
                    .info(format!("Loop stopped at index {} of {}", index, total));
                break;
            }
        }

        let outputs = collected
            .into_iter()
            .map(|(key, values)| (key, Value::Array(values)))
            .collect();
        Ok(ExecutionOutput::from_map(outputs))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Iterate over an array, running the body once per element".to_string(),
            category: "flow".to_string(),
        }
    }
}

fn raise(ctx: &ExecutionContext, control: LoopControl) -> Result<ExecutionOutput, ExecutorError> {
    let signal = ctx.signal.as_ref().ok_or_else(|| {
        ExecutorError::Configuration(format!(
            "{} node '{}' is not inside a loop body",
            ctx.node.node_type,
            ctx.node_id()
        ))
    })?;
    signal.raise(control);
    Ok(ExecutionOutput::new().with_ports(FiredPorts::Nothing))
}

/// Ends the enclosing loop
pub struct BreakExecutor;

#[async_trait]
impl NodeExecutor for BreakExecutor {
    fn node_type(&self) -> &str {
        node_types::BREAK
    }

    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionOutput, ExecutorError> {
        raise(&ctx, LoopControl::Break)
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Stop the enclosing loop".to_string(),
            category: "flow".to_string(),
        }
    }
}

/// Ends the current iteration of the enclosing loop
pub struct ContinueExecutor;

#[async_trait]
impl NodeExecutor for ContinueExecutor {
    fn node_type(&self) -> &str {
        node_types::CONTINUE
    }

    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionOutput, ExecutorError> {
        raise(&ctx, LoopControl::Continue)
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Skip to the next loop iteration".to_string(),
            category: "flow".to_string(),
        }
    }
}
