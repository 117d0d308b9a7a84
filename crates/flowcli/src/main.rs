// crates/flowcli/src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flowcore::{ExecutionEvent, MessageLevel, WorkflowSchema, WorkflowStatus};
use flowruntime::{RuntimeConfig, WorkflowApplication};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Flow Engine CLI", long_about = None)]
struct Cli {
    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Input data as JSON string
        #[arg(short, long)]
        input: Option<String>,

        /// Maximum nodes running at once in one container
        #[arg(long, default_value_t = 10)]
        max_parallel: usize,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            file,
            input,
            max_parallel,
        } => run_workflow(&file, input, max_parallel).await?,
        Commands::Validate { file } => validate_workflow(&file)?,
        Commands::Nodes => list_nodes(),
        Commands::Init { output } => create_example_workflow(&output)?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_schema(file: &Path) -> Result<WorkflowSchema> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let schema = WorkflowSchema::from_json(&json)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    tracing::debug!(path = %file.display(), nodes = schema.nodes.len(), "Loaded workflow schema");
    Ok(schema)
}

fn parse_inputs(input: Option<String>) -> Result<Map<String, Value>> {
    let Some(input) = input else {
        return Ok(Map::new());
    };
    match serde_json::from_str(&input)? {
        Value::Object(map) => Ok(map),
        _ => Err(anyhow::anyhow!("Input must be a JSON object")),
    }
}

async fn run_workflow(file: &Path, input: Option<String>, max_parallel: usize) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());
    let schema = load_schema(file)?;
    println!("   Nodes: {}", schema.nodes.len());
    println!("   Edges: {}", schema.edges.len());
    println!();

    let inputs = parse_inputs(input)?;
    let config = RuntimeConfig {
        max_parallel_nodes: max_parallel,
        ..RuntimeConfig::default()
    };
    let app = WorkflowApplication::with_config(flownodes::default_registry(), config);

    // Subscribe before starting so no event is missed
    let mut events = app.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::WorkflowStarted { .. } => {
                    println!("▶️  Workflow started");
                }
                ExecutionEvent::NodeStarted {
                    node_id, node_type, ..
                } => {
                    println!("  ⚡ Starting node: {} ({})", node_id, node_type);
                }
                ExecutionEvent::NodeSucceeded {
                    node_id,
                    duration_ms,
                    ..
                } => {
                    println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
                }
                ExecutionEvent::NodeFailed { node_id, error, .. } => {
                    println!("  ❌ Node {} failed: {}", node_id, error);
                }
                ExecutionEvent::NodeCanceled { node_id, .. } => {
                    println!("  ⏹️  Node {} canceled", node_id);
                }
                ExecutionEvent::NodeMessage {
                    node_id,
                    level,
                    message,
                    ..
                } => match level {
                    MessageLevel::Warn => println!("     ⚠️  [{}] {}", node_id, message),
                    MessageLevel::Error => println!("     ❗ [{}] {}", node_id, message),
                    _ => println!("     ℹ️  [{}] {}", node_id, message),
                },
                ExecutionEvent::WorkflowFinished {
                    status,
                    duration_ms,
                    ..
                } => {
                    if status == WorkflowStatus::Succeeded {
                        println!("✨ Workflow completed successfully in {}ms", duration_ms);
                    } else {
                        println!("💥 Workflow {} after {}ms", status, duration_ms);
                    }
                    break;
                }
            }
        }
    });

    let task_id = app.run(&schema, inputs)?;
    let task = app
        .task(&task_id)
        .context("task disappeared before it finished")?;

    let status = tokio::select! {
        status = task.wait() => status,
        _ = tokio::signal::ctrl_c() => {
            println!("Interrupted, cancelling task {}", task_id);
            task.cancel();
            task.wait().await
        }
    };
    // The finish event is never sent if the task was cancelled before it began
    let _ = tokio::time::timeout(Duration::from_secs(1), event_task).await;

    println!();
    println!("📊 Execution Summary:");
    println!("   Task ID: {}", task_id);
    println!("   Status: {}", status);
    println!();
    println!("{}", serde_json::to_string_pretty(&task.report())?);

    if status != WorkflowStatus::Succeeded {
        anyhow::bail!("workflow finished with status {}", status);
    }
    Ok(())
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());
    let schema = load_schema(file)?;

    match flowruntime::validate_schema(&schema) {
        Ok(document) => {
            println!("✅ Workflow is valid:");
            println!("   Nodes: {}", document.nodes().count());
            println!("   Root edges: {}", document.root().edges.len());

            let registry = flownodes::default_registry();
            for node in document.nodes() {
                if !registry.contains(&node.node_type) {
                    println!(
                        "   ⚠️  Node {} uses unregistered type '{}'",
                        node.id, node.node_type
                    );
                }
            }
            Ok(())
        }
        Err(errors) => {
            println!("❌ Workflow is invalid:");
            for error in &errors {
                println!("   • {}", error);
            }
            anyhow::bail!("{} validation error(s)", errors.len())
        }
    }
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let registry = flownodes::default_registry();
    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  • {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn example_workflow() -> Value {
    json!({
        "nodes": [
            {
                "id": "start_0",
                "type": "start",
                "data": {
                    "title": "Start",
                    "outputs": {
                        "type": "object",
                        "properties": {
                            "url": { "type": "string", "default": "https://api.github.com/zen" }
                        }
                    }
                }
            },
            {
                "id": "http_0",
                "type": "http",
                "data": {
                    "title": "Fetch Data",
                    "api": {
                        "method": "GET",
                        "url": { "type": "template", "content": "{{start_0.url}}" }
                    },
                    "headersValues": {
                        "user-agent": { "type": "constant", "content": "flow-cli" }
                    },
                    "body": { "bodyType": "none" },
                    "timeout": { "timeout": 10000, "retryTimes": 2 }
                }
            },
            {
                "id": "end_0",
                "type": "end",
                "data": {
                    "title": "End",
                    "inputsValues": {
                        "status": { "type": "ref", "content": ["http_0", "statusCode"] },
                        "body": { "type": "ref", "content": ["http_0", "body"] }
                    }
                }
            }
        ],
        "edges": [
            { "sourceNodeID": "start_0", "targetNodeID": "http_0" },
            { "sourceNodeID": "http_0", "targetNodeID": "end_0" }
        ]
    })
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&example_workflow())?;
    std::fs::write(output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  flow run --file {} --input '{{\"url\": \"https://api.github.com/zen\"}}'",
        output.display()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_workflow_is_valid() {
        let schema: WorkflowSchema = serde_json::from_value(example_workflow()).unwrap();
        assert!(flowruntime::validate_schema(&schema).is_ok());
    }

    #[test]
    fn test_parse_inputs_requires_object() {
        assert!(parse_inputs(None).unwrap().is_empty());
        assert_eq!(
            parse_inputs(Some(r#"{"a": 1}"#.to_string())).unwrap()["a"],
            json!(1)
        );
        assert!(parse_inputs(Some("[1, 2]".to_string())).is_err());
    }
}
