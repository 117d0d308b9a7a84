use async_trait::async_trait;
use flowcore::{
    node_types, ExecutionContext, ExecutionOutput, ExecutorError, NodeExecutor, NodeMetadata,
};

/// Entry node: publishes the task inputs as its outputs
pub struct StartExecutor;

#[async_trait]
impl NodeExecutor for StartExecutor {
    fn node_type(&self) -> &str {
        node_types::START
    }

    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionOutput, ExecutorError> {
        let mut outputs = ctx.run.io.inputs();
        let declared = ctx.node.outputs_schema().and_then(|s| s.properties.as_ref());
        if let Some(properties) = declared {
            for (key, property) in properties {
                if outputs.contains_key(key) {
                    continue;
                }
                if let Some(default) = &property.default {
                    outputs.insert(key.clone(), default.clone());
                }
            }
        }
        Ok(ExecutionOutput::from_map(outputs))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Workflow entry point, exposes the task inputs".to_string(),
            category: "flow".to_string(),
        }
    }
}

/// Exit node: its resolved inputs become the workflow outputs
pub struct EndExecutor;

#[async_trait]
impl NodeExecutor for EndExecutor {
    fn node_type(&self) -> &str {
        node_types::END
    }

    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionOutput, ExecutorError> {
        ctx.run.io.set_outputs(ctx.inputs.clone());
        Ok(ExecutionOutput::from_map(ctx.inputs))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Workflow exit point, collects the final outputs".to_string(),
            category: "flow".to_string(),
        }
    }
}
