//! Standard node library
//!
//! Built-in executors for the control-flow nodes (`start`, `end`,
//! `condition`, `loop`, `break`, `continue`) and the I/O nodes (`http`,
//! `code`, `llm`).

mod code;
mod condition;
mod endpoints;
mod http;
mod llm;
mod loops;

pub use code::CodeExecutor;
pub use condition::{evaluate, ConditionExecutor, Operator};
pub use endpoints::{EndExecutor, StartExecutor};
pub use http::{BodyType, HttpDefaults, HttpExecutor};
pub use llm::{ChatModel, ChatRequest, LlmExecutor, OpenAiChat};
pub use loops::{BreakExecutor, ContinueExecutor, LoopExecutor};
use flowruntime::NodeRegistry;

use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(StartExecutor));
    registry.register(Arc::new(EndExecutor));
    registry.register(Arc::new(ConditionExecutor));
    registry.register(Arc::new(LoopExecutor));
    registry.register(Arc::new(BreakExecutor));
    registry.register(Arc::new(ContinueExecutor));
    registry.register(Arc::new(HttpExecutor::new()));
    registry.register(Arc::new(CodeExecutor::new()));
    registry.register(Arc::new(LlmExecutor::default()));
}

/// Registry holding every standard node
pub fn default_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry);
    registry
}
