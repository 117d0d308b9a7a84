//! Workflow execution runtime
//!
//! This crate provides the engine that walks workflow documents, the node
//! registry, schema validation and the task/application surface.

mod application;
mod engine;
mod registry;
mod task;
mod validation;

pub use application::{RuntimeConfig, WorkflowApplication};
pub use engine::WorkflowEngine;
pub use registry::NodeRegistry;
pub use task::Task;
pub use validation::{validate_inputs, validate_schema};
