use async_trait::async_trait;
use flowcore::{
    ExecutionContext, ExecutionEvent, ExecutionOutput, ExecutorError, FlowError, NodeExecutor,
    Report, TaskId, WorkflowError, WorkflowSchema, WorkflowStatus,
};
use flownodes::{ChatModel, ChatRequest, LlmExecutor};
use flowruntime::{NodeRegistry, RuntimeConfig, WorkflowApplication};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn schema(value: Value) -> WorkflowSchema {
    serde_json::from_value(value).expect("valid schema json")
}

fn inputs(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn application(extra: Vec<Arc<dyn NodeExecutor>>) -> WorkflowApplication {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut registry = NodeRegistry::new();
    flownodes::register_all(&mut registry);
    for executor in extra {
        registry.register(executor);
    }
    WorkflowApplication::new(registry)
}

async fn run_to_end(
    app: &WorkflowApplication,
    schema: &WorkflowSchema,
    inputs: Map<String, Value>,
) -> (TaskId, WorkflowStatus, Report) {
    let task_id = app.run(schema, inputs).expect("task should start");
    let task = app.task(&task_id).expect("task registered");
    let status = tokio::time::timeout(Duration::from_secs(5), task.wait())
        .await
        .expect("workflow should finish");
    let report = app.report(&task_id).expect("report available");
    (task_id, status, report)
}

async fn wait_for_node(app: &WorkflowApplication, task_id: &TaskId, node_id: &str, status: WorkflowStatus) {
    for _ in 0..200 {
        let current = app
            .report(task_id)
            .and_then(|r| r.node(node_id).map(|n| n.status.status));
        if current == Some(status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("node {} never reached {}", node_id, status);
}

fn start_node(properties: Value) -> Value {
    json!({
        "id": "start_0",
        "type": "start",
        "data": {
            "title": "Start",
            "outputs": { "type": "object", "properties": properties }
        }
    })
}

fn end_node(inputs_values: Value) -> Value {
    json!({
        "id": "end_0",
        "type": "end",
        "data": { "title": "End", "inputsValues": inputs_values }
    })
}

/// Echoes its `value` input, recording which node ran
struct MarkExecutor;

#[async_trait]
impl NodeExecutor for MarkExecutor {
    fn node_type(&self) -> &str {
        "mark"
    }

    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionOutput, ExecutorError> {
        Ok(ExecutionOutput::new()
            .with_output("hit", ctx.node_id().to_string())
            .with_output("value", ctx.inputs.get("value").cloned().unwrap_or(Value::Null)))
    }
}

/// Doubles its numeric `n` input
struct DoubleExecutor;

#[async_trait]
impl NodeExecutor for DoubleExecutor {
    fn node_type(&self) -> &str {
        "double"
    }

    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionOutput, ExecutorError> {
        let n = ctx
            .require_input("n")?
            .as_i64()
            .ok_or_else(|| ExecutorError::MissingInput("n".to_string()))?;
        Ok(ExecutionOutput::new().with_output("doubled", n * 2))
    }
}

/// Waits until cancelled or until `delay` passes
struct SlowExecutor {
    node_type: &'static str,
    delay: Duration,
}

#[async_trait]
impl NodeExecutor for SlowExecutor {
    fn node_type(&self) -> &str {
        self.node_type
    }

    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionOutput, ExecutorError> {
        tokio::select! {
            _ = ctx.cancellation.cancelled() => Err(ExecutorError::Cancelled),
            _ = tokio::time::sleep(self.delay) => Ok(ExecutionOutput::new().with_output("done", true)),
        }
    }
}

struct FailingExecutor;

#[async_trait]
impl NodeExecutor for FailingExecutor {
    fn node_type(&self) -> &str {
        "explode"
    }

    async fn execute(&self, _ctx: ExecutionContext) -> Result<ExecutionOutput, ExecutorError> {
        Err(ExecutorError::ExecutionFailed("boom".to_string()))
    }
}

/// Panics instead of returning
struct PanickingExecutor;

#[async_trait]
impl NodeExecutor for PanickingExecutor {
    fn node_type(&self) -> &str {
        "panic"
    }

    async fn execute(&self, _ctx: ExecutionContext) -> Result<ExecutionOutput, ExecutorError> {
        panic!("kaboom")
    }
}

/// Sleeps without looking at the cancellation token
struct StubbornExecutor;

#[async_trait]
impl NodeExecutor for StubbornExecutor {
    fn node_type(&self) -> &str {
        "stubborn"
    }

    async fn execute(&self, _ctx: ExecutionContext) -> Result<ExecutionOutput, ExecutorError> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(ExecutionOutput::new().with_output("late", true))
    }
}

/// Never answers
struct HangingModel;

#[async_trait]
impl ChatModel for HangingModel {
    async fn complete(&self, _request: ChatRequest) -> Result<String, ExecutorError> {
        std::future::pending().await
    }
}

struct EchoModel;

#[async_trait]
impl ChatModel for EchoModel {
    async fn complete(&self, request: ChatRequest) -> Result<String, ExecutorError> {
        Ok(format!("processed {}", request.prompt))
    }
}

#[tokio::test]
async fn test_end_constant_outputs() {
    let app = application(vec![]);
    let schema = schema(json!({
        "nodes": [
            start_node(json!({})),
            end_node(json!({
                "str": { "type": "constant", "content": "hello" },
                "num": { "type": "constant", "content": 3.5 },
                "flag": { "type": "constant", "content": true },
                "list": { "type": "constant", "content": [1, 2, 3] },
                "obj": { "type": "constant", "content": { "a": 1 } }
            }))
        ],
        "edges": [{ "sourceNodeID": "start_0", "targetNodeID": "end_0" }]
    }));

    let (task_id, status, report) = run_to_end(&app, &schema, Map::new()).await;

    assert_eq!(status, WorkflowStatus::Succeeded);
    assert_eq!(report.status(), WorkflowStatus::Succeeded);
    let result = app.result(&task_id).expect("result after completion");
    assert_eq!(
        Value::Object(result),
        json!({
            "str": "hello",
            "num": 3.5,
            "flag": true,
            "list": [1, 2, 3],
            "obj": { "a": 1 }
        })
    );
    assert_eq!(report.node("end_0").unwrap().snapshots.len(), 1);
}

#[tokio::test]
async fn test_ref_and_template_resolution() {
    let app = application(vec![Arc::new(MarkExecutor)]);
    let schema = schema(json!({
        "nodes": [
            start_node(json!({
                "query": { "type": "string" },
                "count": { "type": "integer", "default": 2 }
            })),
            {
                "id": "mark_0",
                "type": "mark",
                "data": {
                    "inputsValues": {
                        "value": { "type": "ref", "content": ["start_0", "query"] }
                    }
                }
            },
            end_node(json!({
                "direct": { "type": "ref", "content": ["start_0", "query"] },
                "via": { "type": "ref", "content": ["mark_0", "value"] },
                "sentence": { "type": "template", "content": "{{start_0.query}} x{{start_0.count}}" }
            }))
        ],
        "edges": [
            { "sourceNodeID": "start_0", "targetNodeID": "mark_0" },
            { "sourceNodeID": "mark_0", "targetNodeID": "end_0" }
        ]
    }));

    let (task_id, status, _) = run_to_end(&app, &schema, inputs(json!({ "query": "rust" }))).await;

    assert_eq!(status, WorkflowStatus::Succeeded);
    assert_eq!(
        Value::Object(app.result(&task_id).unwrap()),
        json!({ "direct": "rust", "via": "rust", "sentence": "rust x2" })
    );
}

#[tokio::test]
async fn test_condition_first_match_wins() {
    let app = application(vec![Arc::new(MarkExecutor)]);
    let rule = |operator: &str, right: Value| {
        json!({
            "left": { "type": "ref", "content": ["start_0", "value"] },
            "operator": operator,
            "right": { "type": "constant", "content": right }
        })
    };
    let mark = |id: &str| json!({ "id": id, "type": "mark", "data": {} });

    let schema = schema(json!({
        "nodes": [
            start_node(json!({ "value": { "type": "integer" } })),
            {
                "id": "condition_0",
                "type": "condition",
                "data": {
                    "conditions": [
                        { "key": "if_1", "value": rule("gt", json!(1)) },
                        { "key": "if_2", "value": rule("lt", json!(0)) },
                        { "key": "if_3", "value": rule("eq", json!(5)) }
                    ]
                }
            },
            mark("mark_1"),
            mark("mark_2"),
            mark("mark_3"),
            end_node(json!({ "hit": { "type": "ref", "content": ["mark_1", "hit"] } }))
        ],
        "edges": [
            { "sourceNodeID": "start_0", "targetNodeID": "condition_0" },
            { "sourceNodeID": "condition_0", "targetNodeID": "mark_1", "sourcePortID": "if_1" },
            { "sourceNodeID": "condition_0", "targetNodeID": "mark_2", "sourcePortID": "if_2" },
            { "sourceNodeID": "condition_0", "targetNodeID": "mark_3", "sourcePortID": "if_3" },
            { "sourceNodeID": "mark_1", "targetNodeID": "end_0" },
            { "sourceNodeID": "mark_2", "targetNodeID": "end_0" },
            { "sourceNodeID": "mark_3", "targetNodeID": "end_0" }
        ]
    }));

    let (task_id, status, report) = run_to_end(&app, &schema, inputs(json!({ "value": 5 }))).await;

    assert_eq!(status, WorkflowStatus::Succeeded);
    assert_eq!(
        report.node("condition_0").unwrap().snapshots[0].branch.as_deref(),
        Some("if_1")
    );
    assert_eq!(report.node("mark_1").unwrap().status.status, WorkflowStatus::Succeeded);
    assert!(report.node("mark_2").is_none());
    assert!(report.node("mark_3").is_none());
    assert_eq!(app.result(&task_id).unwrap()["hit"], json!("mark_1"));
}

#[tokio::test]
async fn test_condition_without_match_leaves_branch_unvisited() {
    let app = application(vec![Arc::new(MarkExecutor)]);
    let schema = schema(json!({
        "nodes": [
            start_node(json!({ "value": { "type": "integer" } })),
            {
                "id": "condition_0",
                "type": "condition",
                "data": {
                    "conditions": [{
                        "key": "if_big",
                        "value": {
                            "left": { "type": "ref", "content": ["start_0", "value"] },
                            "operator": "gt",
                            "right": { "type": "constant", "content": 100 }
                        }
                    }]
                }
            },
            { "id": "mark_0", "type": "mark", "data": {} },
            end_node(json!({}))
        ],
        "edges": [
            { "sourceNodeID": "start_0", "targetNodeID": "condition_0" },
            { "sourceNodeID": "condition_0", "targetNodeID": "mark_0", "sourcePortID": "if_big" },
            { "sourceNodeID": "mark_0", "targetNodeID": "end_0" }
        ]
    }));

    let (task_id, status, report) = run_to_end(&app, &schema, inputs(json!({ "value": 1 }))).await;

    assert_eq!(status, WorkflowStatus::Succeeded);
    assert!(report.node("mark_0").is_none());
    assert!(report.node("end_0").is_none());
    assert_eq!(app.result(&task_id), Some(Map::new()));
}

fn loop_break_continue_schema() -> WorkflowSchema {
    let index_rule = |operator: &str, right: i64| {
        json!({
            "left": { "type": "ref", "content": ["loop_0_locals", "index"] },
            "operator": operator,
            "right": { "type": "constant", "content": right }
        })
    };

    schema(json!({
        "nodes": [
            start_node(json!({ "items": { "type": "array", "items": { "type": "string" } } })),
            {
                "id": "loop_0",
                "type": "loop",
                "data": {
                    "loopFor": { "type": "ref", "content": ["start_0", "items"] },
                    "loopOutputs": {
                        "results": { "type": "ref", "content": ["llm_0", "result"] },
                        "indexes": { "type": "ref", "content": ["loop_0_locals", "index"] }
                    }
                },
                "blocks": [
                    {
                        "id": "condition_0",
                        "type": "condition",
                        "data": {
                            "conditions": [
                                { "key": "if_break", "value": index_rule("gte", 3) },
                                { "key": "if_continue", "value": index_rule("eq", 1) },
                                { "key": "if_default", "value": index_rule("gte", 0) }
                            ]
                        }
                    },
                    { "id": "break_0", "type": "break", "data": {} },
                    { "id": "continue_0", "type": "continue", "data": {} },
                    {
                        "id": "llm_0",
                        "type": "llm",
                        "data": {
                            "inputsValues": {
                                "modelName": { "type": "constant", "content": "test-model" },
                                "prompt": { "type": "template", "content": "{{loop_0_locals.item}}" }
                            }
                        }
                    }
                ],
                "edges": [
                    { "sourceNodeID": "condition_0", "targetNodeID": "break_0", "sourcePortID": "if_break" },
                    { "sourceNodeID": "condition_0", "targetNodeID": "continue_0", "sourcePortID": "if_continue" },
                    { "sourceNodeID": "condition_0", "targetNodeID": "llm_0", "sourcePortID": "if_default" }
                ]
            },
            end_node(json!({
                "results": { "type": "ref", "content": ["loop_0", "results"] },
                "indexes": { "type": "ref", "content": ["loop_0", "indexes"] }
            }))
        ],
        "edges": [
            { "sourceNodeID": "start_0", "targetNodeID": "loop_0" },
            { "sourceNodeID": "loop_0", "targetNodeID": "end_0" }
        ]
    }))
}

#[tokio::test]
async fn test_loop_break_and_continue() {
    let app = application(vec![Arc::new(LlmExecutor::new(Arc::new(EchoModel)))]);
    let schema = loop_break_continue_schema();

    let (task_id, status, report) = run_to_end(
        &app,
        &schema,
        inputs(json!({ "items": ["a", "b", "c", "d", "e", "f"] })),
    )
    .await;

    assert_eq!(status, WorkflowStatus::Succeeded);
    let result = app.result(&task_id).unwrap();
    // index 1 continues, index 3 breaks
    assert_eq!(result["results"], json!(["processed a", "processed c"]));
    assert_eq!(result["indexes"], json!([0, 1, 2, 3]));

    assert_eq!(report.node("condition_0").unwrap().snapshots.len(), 4);
    assert_eq!(report.node("llm_0").unwrap().snapshots.len(), 2);
    assert_eq!(report.node("continue_0").unwrap().snapshots.len(), 1);
    assert_eq!(report.node("break_0").unwrap().snapshots.len(), 1);
}

#[tokio::test]
async fn test_loop_snapshots_follow_iteration_order() {
    let app = application(vec![Arc::new(DoubleExecutor)]);
    let schema = schema(json!({
        "nodes": [
            start_node(json!({ "numbers": { "type": "array", "items": { "type": "integer" } } })),
            {
                "id": "loop_0",
                "type": "loop",
                "data": {
                    "loopFor": { "type": "ref", "content": ["start_0", "numbers"] },
                    "loopOutputs": {
                        "doubled": { "type": "ref", "content": ["double_0", "doubled"] }
                    }
                },
                "blocks": [{
                    "id": "double_0",
                    "type": "double",
                    "data": {
                        "inputsValues": { "n": { "type": "ref", "content": ["loop_0_locals", "item"] } }
                    }
                }]
            },
            end_node(json!({ "doubled": { "type": "ref", "content": ["loop_0", "doubled"] } }))
        ],
        "edges": [
            { "sourceNodeID": "start_0", "targetNodeID": "loop_0" },
            { "sourceNodeID": "loop_0", "targetNodeID": "end_0" }
        ]
    }));

    let (task_id, status, report) =
        run_to_end(&app, &schema, inputs(json!({ "numbers": [1, 2, 3, 4, 5] }))).await;

    assert_eq!(status, WorkflowStatus::Succeeded);
    let snapshots = &report.node("double_0").unwrap().snapshots;
    assert_eq!(snapshots.len(), 5);
    for (i, snapshot) in snapshots.iter().enumerate() {
        let n = (i + 1) as i64;
        assert_eq!(snapshot.inputs["n"], json!(n));
        assert_eq!(snapshot.outputs["doubled"], json!(n * 2));
    }
    assert_eq!(
        app.result(&task_id).unwrap()["doubled"],
        json!([2, 4, 6, 8, 10])
    );
}

#[tokio::test]
async fn test_loop_over_non_array_fails() {
    let app = application(vec![]);
    let schema = schema(json!({
        "nodes": [
            start_node(json!({ "items": { "type": "string" } })),
            {
                "id": "loop_0",
                "type": "loop",
                "data": { "loopFor": { "type": "ref", "content": ["start_0", "items"] } },
                "blocks": [{ "id": "break_0", "type": "break", "data": {} }]
            },
            end_node(json!({}))
        ],
        "edges": [
            { "sourceNodeID": "start_0", "targetNodeID": "loop_0" },
            { "sourceNodeID": "loop_0", "targetNodeID": "end_0" }
        ]
    }));

    let (_, status, report) = run_to_end(&app, &schema, inputs(json!({ "items": "abc" }))).await;

    assert_eq!(status, WorkflowStatus::Failed);
    assert_eq!(report.node("loop_0").unwrap().status.status, WorkflowStatus::Failed);
}

fn slow_schema() -> WorkflowSchema {
    schema(json!({
        "nodes": [
            start_node(json!({})),
            { "id": "slow_0", "type": "slow", "data": {} },
            end_node(json!({}))
        ],
        "edges": [
            { "sourceNodeID": "start_0", "targetNodeID": "slow_0" },
            { "sourceNodeID": "slow_0", "targetNodeID": "end_0" }
        ]
    }))
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let app = application(vec![Arc::new(SlowExecutor {
        node_type: "slow",
        delay: Duration::from_secs(30),
    })]);
    let task_id = app.run(&slow_schema(), Map::new()).unwrap();
    wait_for_node(&app, &task_id, "slow_0", WorkflowStatus::Processing).await;

    assert!(app.result(&task_id).is_none());
    assert!(app.cancel(&task_id));
    assert!(!app.cancel(&task_id));

    let status = app.task(&task_id).unwrap().wait().await;
    assert_eq!(status, WorkflowStatus::Canceled);

    let report = app.report(&task_id).unwrap();
    assert_eq!(report.status(), WorkflowStatus::Canceled);
    assert_eq!(report.node("start_0").unwrap().status.status, WorkflowStatus::Succeeded);
    assert_eq!(report.node("slow_0").unwrap().status.status, WorkflowStatus::Canceled);
    assert!(report.node("end_0").is_none());
    assert_eq!(app.result(&task_id), Some(Map::new()));
}

#[tokio::test]
async fn test_cancel_unknown_task() {
    let app = application(vec![]);
    assert!(!app.cancel(&uuid::Uuid::new_v4()));
    assert!(app.report(&uuid::Uuid::new_v4()).is_none());
}

#[tokio::test]
async fn test_failure_fails_workflow_and_lets_siblings_finish() {
    let app = application(vec![
        Arc::new(FailingExecutor),
        Arc::new(SlowExecutor {
            node_type: "slow",
            delay: Duration::from_millis(100),
        }),
    ]);
    let schema = schema(json!({
        "nodes": [
            start_node(json!({})),
            { "id": "explode_0", "type": "explode", "data": {} },
            { "id": "slow_0", "type": "slow", "data": {} },
            end_node(json!({}))
        ],
        "edges": [
            { "sourceNodeID": "start_0", "targetNodeID": "explode_0" },
            { "sourceNodeID": "start_0", "targetNodeID": "slow_0" },
            { "sourceNodeID": "explode_0", "targetNodeID": "end_0" },
            { "sourceNodeID": "slow_0", "targetNodeID": "end_0" }
        ]
    }));

    let (_, status, report) = run_to_end(&app, &schema, Map::new()).await;

    assert_eq!(status, WorkflowStatus::Failed);
    let failed = report.node("explode_0").unwrap();
    assert_eq!(failed.status.status, WorkflowStatus::Failed);
    assert!(failed.snapshots[0].error.as_deref().unwrap().contains("boom"));
    assert_eq!(report.node("slow_0").unwrap().status.status, WorkflowStatus::Succeeded);
    assert!(report.node("end_0").is_none());
}

#[tokio::test]
async fn test_unknown_node_type_fails_node() {
    let app = application(vec![]);
    let schema = schema(json!({
        "nodes": [
            start_node(json!({})),
            { "id": "mystery_0", "type": "mystery", "data": {} },
            end_node(json!({}))
        ],
        "edges": [
            { "sourceNodeID": "start_0", "targetNodeID": "mystery_0" },
            { "sourceNodeID": "mystery_0", "targetNodeID": "end_0" }
        ]
    }));

    let (_, status, report) = run_to_end(&app, &schema, Map::new()).await;

    assert_eq!(status, WorkflowStatus::Failed);
    let node = report.node("mystery_0").unwrap();
    assert_eq!(node.status.status, WorkflowStatus::Failed);
    assert!(node.snapshots[0].error.as_deref().unwrap().contains("mystery"));
}

#[tokio::test]
async fn test_unresolved_ref_fails_owning_node() {
    let app = application(vec![]);
    let schema = schema(json!({
        "nodes": [
            start_node(json!({})),
            end_node(json!({ "missing": { "type": "ref", "content": ["start_0", "nope"] } }))
        ],
        "edges": [{ "sourceNodeID": "start_0", "targetNodeID": "end_0" }]
    }));

    let (_, status, report) = run_to_end(&app, &schema, Map::new()).await;

    assert_eq!(status, WorkflowStatus::Failed);
    assert_eq!(report.node("start_0").unwrap().status.status, WorkflowStatus::Succeeded);
    let end = report.node("end_0").unwrap();
    assert_eq!(end.status.status, WorkflowStatus::Failed);
    assert!(end.snapshots[0].error.as_deref().unwrap().contains("start_0.nope"));
}

#[tokio::test]
async fn test_declared_input_type_mismatch_fails_node() {
    let app = application(vec![]);
    let schema = schema(json!({
        "nodes": [
            start_node(json!({})),
            {
                "id": "end_0",
                "type": "end",
                "data": {
                    "inputs": { "type": "object", "properties": { "n": { "type": "integer" } } },
                    "inputsValues": { "n": { "type": "constant", "content": "not a number" } }
                }
            }
        ],
        "edges": [{ "sourceNodeID": "start_0", "targetNodeID": "end_0" }]
    }));

    let (_, status, _) = run_to_end(&app, &schema, Map::new()).await;
    assert_eq!(status, WorkflowStatus::Failed);
}

#[tokio::test]
async fn test_global_variables_are_readable() {
    let app = application(vec![]);
    let schema = schema(json!({
        "globalVariable": {
            "type": "object",
            "properties": { "greeting": { "type": "string", "default": "hi" } }
        },
        "nodes": [
            start_node(json!({})),
            end_node(json!({ "greeting": { "type": "ref", "content": ["global", "greeting"] } }))
        ],
        "edges": [{ "sourceNodeID": "start_0", "targetNodeID": "end_0" }]
    }));

    let (task_id, status, _) = run_to_end(&app, &schema, Map::new()).await;
    assert_eq!(status, WorkflowStatus::Succeeded);
    assert_eq!(app.result(&task_id).unwrap()["greeting"], json!("hi"));
}

#[tokio::test]
async fn test_invalid_schema_is_rejected() {
    let app = application(vec![]);
    let schema = schema(json!({
        "nodes": [
            start_node(json!({})),
            { "id": "start_1", "type": "start", "data": {} },
            { "id": "break_0", "type": "break", "data": {} }
        ],
        "edges": []
    }));

    match app.run(&schema, Map::new()) {
        Err(FlowError::Validation(errors)) => {
            assert!(errors.contains(&WorkflowError::StartNodeCount(2)));
            assert!(errors.contains(&WorkflowError::MissingEndNode));
            assert!(errors
                .iter()
                .any(|e| matches!(e, WorkflowError::OutsideLoop { node, .. } if node == "break_0")));
        }
        other => panic!("expected validation errors, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_missing_required_input_is_rejected() {
    let app = application(vec![]);
    let schema = schema(json!({
        "nodes": [
            {
                "id": "start_0",
                "type": "start",
                "data": {
                    "outputs": {
                        "type": "object",
                        "properties": { "query": { "type": "string" } },
                        "required": ["query"]
                    }
                }
            },
            end_node(json!({}))
        ],
        "edges": [{ "sourceNodeID": "start_0", "targetNodeID": "end_0" }]
    }));

    let err = app.run(&schema, Map::new()).unwrap_err();
    assert!(matches!(err, FlowError::Workflow(WorkflowError::InvalidInputs(_))));

    let err = app.run(&schema, inputs(json!({ "query": 5 }))).unwrap_err();
    assert!(matches!(err, FlowError::Workflow(WorkflowError::InvalidInputs(_))));
}

#[tokio::test]
async fn test_events_and_dispose() {
    let app = WorkflowApplication::with_config(flownodes::default_registry(), RuntimeConfig::default());
    let mut events = app.subscribe_events();
    let schema = schema(json!({
        "nodes": [start_node(json!({})), end_node(json!({}))],
        "edges": [{ "sourceNodeID": "start_0", "targetNodeID": "end_0" }]
    }));

    let (task_id, status, _) = run_to_end(&app, &schema, Map::new()).await;
    assert_eq!(status, WorkflowStatus::Succeeded);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(seen.first(), Some(ExecutionEvent::WorkflowStarted { .. })));
    assert!(seen.iter().any(|e| matches!(
        e,
        ExecutionEvent::WorkflowFinished { status: WorkflowStatus::Succeeded, .. }
    )));

    assert!(app.dispose(&task_id));
    assert!(app.report(&task_id).is_none());
    assert!(!app.dispose(&task_id));
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

fn single_node_schema(id: &str, node_type: &str, data: Value) -> WorkflowSchema {
    schema(json!({
        "nodes": [
            start_node(json!({})),
            { "id": id, "type": node_type, "data": data },
            end_node(json!({}))
        ],
        "edges": [
            { "sourceNodeID": "start_0", "targetNodeID": id },
            { "sourceNodeID": id, "targetNodeID": "end_0" }
        ]
    }))
}

#[tokio::test]
async fn test_dispose_waits_for_in_flight_siblings() {
    let app = application(vec![
        Arc::new(FailingExecutor),
        Arc::new(SlowExecutor {
            node_type: "slow",
            delay: Duration::from_millis(500),
        }),
    ]);
    let schema = schema(json!({
        "nodes": [
            start_node(json!({})),
            { "id": "explode_0", "type": "explode", "data": {} },
            { "id": "slow_0", "type": "slow", "data": {} },
            end_node(json!({}))
        ],
        "edges": [
            { "sourceNodeID": "start_0", "targetNodeID": "explode_0" },
            { "sourceNodeID": "start_0", "targetNodeID": "slow_0" },
            { "sourceNodeID": "explode_0", "targetNodeID": "end_0" },
            { "sourceNodeID": "slow_0", "targetNodeID": "end_0" }
        ]
    }));

    let task_id = app.run(&schema, Map::new()).unwrap();
    wait_for_node(&app, &task_id, "explode_0", WorkflowStatus::Failed).await;
    wait_for_node(&app, &task_id, "slow_0", WorkflowStatus::Processing).await;

    let task = app.task(&task_id).unwrap();
    assert_eq!(task.status(), WorkflowStatus::Failed);
    assert!(!task.is_settled());
    assert!(!app.dispose(&task_id));
    assert!(app.report(&task_id).is_some());

    assert_eq!(task.wait().await, WorkflowStatus::Failed);
    assert!(task.is_settled());
    assert_eq!(
        app.report(&task_id).unwrap().node("slow_0").unwrap().status.status,
        WorkflowStatus::Succeeded
    );
    assert!(app.dispose(&task_id));
}

#[tokio::test]
async fn test_loop_with_empty_body_completes() {
    let app = application(vec![]);
    let schema = schema(json!({
        "nodes": [
            start_node(json!({})),
            {
                "id": "loop_0",
                "type": "loop",
                "data": {
                    "loopFor": { "type": "constant", "content": [1, 2] },
                    "loopOutputs": {
                        "indexes": { "type": "ref", "content": ["loop_0_locals", "index"] }
                    }
                }
            },
            end_node(json!({ "indexes": { "type": "ref", "content": ["loop_0", "indexes"] } }))
        ],
        "edges": [
            { "sourceNodeID": "start_0", "targetNodeID": "loop_0" },
            { "sourceNodeID": "loop_0", "targetNodeID": "end_0" }
        ]
    }));

    let (task_id, status, report) = run_to_end(&app, &schema, Map::new()).await;

    assert_eq!(status, WorkflowStatus::Succeeded);
    assert_eq!(report.node("loop_0").unwrap().status.status, WorkflowStatus::Succeeded);
    assert_eq!(app.result(&task_id).unwrap()["indexes"], json!([0, 1]));
}

#[tokio::test]
async fn test_independent_nodes_run_concurrently() {
    let app = application(vec![Arc::new(SlowExecutor {
        node_type: "slow",
        delay: Duration::from_millis(300),
    })]);
    let schema = schema(json!({
        "nodes": [
            start_node(json!({})),
            { "id": "slow_a", "type": "slow", "data": {} },
            { "id": "slow_b", "type": "slow", "data": {} },
            end_node(json!({}))
        ],
        "edges": [
            { "sourceNodeID": "start_0", "targetNodeID": "slow_a" },
            { "sourceNodeID": "start_0", "targetNodeID": "slow_b" },
            { "sourceNodeID": "slow_a", "targetNodeID": "end_0" },
            { "sourceNodeID": "slow_b", "targetNodeID": "end_0" }
        ]
    }));

    let started = Instant::now();
    let (_, status, report) = run_to_end(&app, &schema, Map::new()).await;
    let elapsed = started.elapsed();

    assert_eq!(status, WorkflowStatus::Succeeded);
    assert_eq!(report.node("end_0").unwrap().status.status, WorkflowStatus::Succeeded);
    // Sequential dispatch would need at least 600ms
    assert!(elapsed < Duration::from_millis(550), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_cancel_aborts_in_flight_llm_request() {
    let app = application(vec![Arc::new(LlmExecutor::new(Arc::new(HangingModel)))]);
    let schema = single_node_schema(
        "llm_0",
        "llm",
        json!({
            "inputsValues": {
                "modelName": { "type": "constant", "content": "test-model" },
                "prompt": { "type": "constant", "content": "hello" }
            }
        }),
    );

    let task_id = app.run(&schema, Map::new()).unwrap();
    wait_for_node(&app, &task_id, "llm_0", WorkflowStatus::Processing).await;
    assert!(app.cancel(&task_id));

    let status = tokio::time::timeout(Duration::from_secs(2), app.task(&task_id).unwrap().wait())
        .await
        .expect("cancel should stop the request");
    assert_eq!(status, WorkflowStatus::Canceled);
    let report = app.report(&task_id).unwrap();
    assert_eq!(report.node("llm_0").unwrap().status.status, WorkflowStatus::Canceled);
}

#[tokio::test]
async fn test_executor_panic_is_recorded() {
    let app = application(vec![Arc::new(PanickingExecutor)]);
    let mut events = app.subscribe_events();

    let (_, status, report) =
        run_to_end(&app, &single_node_schema("panic_0", "panic", json!({})), Map::new()).await;

    assert_eq!(status, WorkflowStatus::Failed);
    let node = report.node("panic_0").unwrap();
    assert_eq!(node.status.status, WorkflowStatus::Failed);
    let snapshot = &node.snapshots[0];
    let error = snapshot.error.as_deref().unwrap();
    assert!(error.contains("panicked"));
    assert!(error.contains("kaboom"));
    assert!(snapshot.end_time.is_some());

    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        ExecutionEvent::NodeFailed { node_id, .. } if node_id == "panic_0"
    )));
}

#[tokio::test]
async fn test_canceled_node_discards_late_outputs() {
    let app = application(vec![Arc::new(StubbornExecutor)]);
    let mut events = app.subscribe_events();

    let task_id = app
        .run(&single_node_schema("stubborn_0", "stubborn", json!({})), Map::new())
        .unwrap();
    wait_for_node(&app, &task_id, "stubborn_0", WorkflowStatus::Processing).await;
    assert!(app.cancel(&task_id));

    let status = app.task(&task_id).unwrap().wait().await;
    assert_eq!(status, WorkflowStatus::Canceled);

    let report = app.report(&task_id).unwrap();
    let node = report.node("stubborn_0").unwrap();
    assert_eq!(node.status.status, WorkflowStatus::Canceled);
    assert!(node.snapshots[0].outputs.is_empty());
    assert!(report.node("end_0").is_none());

    assert!(!drain(&mut events).iter().any(|e| matches!(
        e,
        ExecutionEvent::NodeSucceeded { node_id, .. } if node_id == "stubborn_0"
    )));
}

#[tokio::test]
async fn test_settled_tasks_expire() {
    let config = RuntimeConfig {
        task_retention_ms: Some(0),
        ..RuntimeConfig::default()
    };
    let app = WorkflowApplication::with_config(flownodes::default_registry(), config);
    let schema = schema(json!({
        "nodes": [start_node(json!({})), end_node(json!({}))],
        "edges": [{ "sourceNodeID": "start_0", "targetNodeID": "end_0" }]
    }));

    let (first, status, _) = run_to_end(&app, &schema, Map::new()).await;
    assert_eq!(status, WorkflowStatus::Succeeded);
    assert!(app.task(&first).is_some());

    let (second, _, _) = run_to_end(&app, &schema, Map::new()).await;
    assert!(app.task(&first).is_none());
    assert!(app.task(&second).is_some());

    assert_eq!(app.prune_expired(), 1);
    assert!(app.task(&second).is_none());
}

#[test]
fn test_runtime_config_defaults_keep_tasks_for_an_hour() {
    let config: RuntimeConfig = serde_json::from_value(json!({ "maxParallelNodes": 4 })).unwrap();
    assert_eq!(config.max_parallel_nodes, 4);
    assert_eq!(config.event_buffer_size, 1000);
    assert_eq!(config.task_retention_ms, Some(3_600_000));
}
