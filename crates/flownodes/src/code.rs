use async_trait::async_trait;
use flowcore::{
    node_types, ExecutionContext, ExecutionOutput, ExecutorError, NodeExecutor, NodeMetadata,
};
use mlua::{Function, HookTriggers, Lua, LuaSerdeExt, VmState};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Instructions executed between deadline checks
const HOOK_INTERVAL: u32 = 1_000;

#[derive(Debug, Deserialize)]
struct CodeConfig {
    script: ScriptConfig,
}

#[derive(Debug, Deserialize)]
struct ScriptConfig {
    #[serde(default = "default_language")]
    language: String,
    content: String,
}

fn default_language() -> String {
    "lua".to_string()
}

/// Set by the instruction hook when it stops a script
#[derive(Debug, Default)]
struct Interrupts {
    deadline: AtomicBool,
    cancelled: AtomicBool,
}

/// Runs a Lua `main(args)` function with `args.params` bound to the node
/// inputs
pub struct CodeExecutor {
    timeout: Duration,
}

impl CodeExecutor {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn timeout_error(&self) -> ExecutorError {
        ExecutorError::Timeout {
            millis: self.timeout.as_millis() as u64,
        }
    }
}

impl Default for CodeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn run_script(
    source: &str,
    params: Map<String, Value>,
    deadline: Instant,
    cancellation: CancellationToken,
    interrupts: Arc<Interrupts>,
) -> mlua::Result<Value> {
    let lua = Lua::new();
    lua.set_hook(
        HookTriggers::new().every_nth_instruction(HOOK_INTERVAL),
        move |_lua, _debug| {
            if cancellation.is_cancelled() {
                interrupts.cancelled.store(true, Ordering::SeqCst);
            } else if Instant::now() >= deadline {
                interrupts.deadline.store(true, Ordering::SeqCst);
            } else {
                return Ok(VmState::Continue);
            }
            Err(mlua::Error::RuntimeError("script interrupted".to_string()))
        },
    );

    lua.load(source).set_name("main").exec()?;
    let main: Function = lua.globals().get("main")?;

    let args = lua.create_table()?;
    args.set("params", lua.to_value(&params)?)?;
    let returned: mlua::Value = main.call(args)?;
    lua.from_value(returned)
}

#[async_trait]
impl NodeExecutor for CodeExecutor {
    fn node_type(&self) -> &str {
        node_types::CODE
    }

    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionOutput, ExecutorError> {
        let config: CodeConfig = ctx.config()?;
        if !config.script.language.eq_ignore_ascii_case("lua") {
            return Err(ExecutorError::Configuration(format!(
                "Unsupported script language: {}",
                config.script.language
            )));
        }

        let deadline = Instant::now() + self.timeout;
        let interrupts = Arc::new(Interrupts::default());
        let params = ctx.inputs.clone();
        let source = config.script.content;
        let cancellation = ctx.cancellation.clone();

        let job = {
            let interrupts = interrupts.clone();
            tokio::task::spawn_blocking(move || {
                run_script(&source, params, deadline, cancellation, interrupts)
                    .map_err(|e| e.to_string())
            })
        };

        // The hook stops the interpreter; this bounds the wait if a single
        // native call runs past the deadline
        let joined = tokio::time::timeout(self.timeout + Duration::from_secs(1), job)
            .await
            .map_err(|_| self.timeout_error())?
            .map_err(|e| ExecutorError::ExecutionFailed(format!("Script task aborted: {}", e)))?;

        let returned = match joined {
            Ok(value) => value,
            Err(message) => {
                if interrupts.cancelled.load(Ordering::SeqCst) {
                    return Err(ExecutorError::Cancelled);
                }
                if interrupts.deadline.load(Ordering::SeqCst) {
                    return Err(self.timeout_error());
                }
                ctx.events.error(message.clone());
                return Err(ExecutorError::ExecutionFailed(format!(
                    "Script error: {}",
                    message
                )));
            }
        };

        let outputs = match returned {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("result".to_string(), other);
                map
            }
        };
        Ok(ExecutionOutput::from_map(outputs))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Run a Lua main(args) function".to_string(),
            category: "code".to_string(),
        }
    }
}
