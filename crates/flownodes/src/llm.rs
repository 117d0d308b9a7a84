use async_trait::async_trait;
use flowcore::{
    node_types, ExecutionContext, ExecutionOutput, ExecutorError, NodeExecutor, NodeMetadata,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// One completion request, built from the node inputs
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub api_key: String,
    pub api_host: String,
    pub temperature: Option<f64>,
    pub system_prompt: Option<String>,
    pub prompt: String,
}

/// Model provider behind the `llm` node
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<String, ExecutorError>;
}

/// OpenAI-compatible `/chat/completions` client. Works with any host that
/// speaks the same API.
pub struct OpenAiChat {
    http: Client,
}

impl OpenAiChat {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for OpenAiChat {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, request: ChatRequest) -> Result<String, ExecutorError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.is_empty()) {
            messages.push(Message {
                role: "system",
                content: system,
            });
        }
        messages.push(Message {
            role: "user",
            content: &request.prompt,
        });

        let body = CompletionRequest {
            model: &request.model,
            messages,
            temperature: request.temperature,
            stream: false,
        };
        let url = format!(
            "{}/chat/completions",
            request.api_host.trim_end_matches('/')
        );
        debug!(model = %request.model, %url, "Sending chat completion");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&request.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExecutorError::ExecutionFailed(format!("LLM request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ExecutorError::ExecutionFailed(format!(
                "LLM request failed with {}: {}",
                status, text
            )));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ExecutorError::ExecutionFailed(format!("Invalid LLM response: {}", e)))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ExecutorError::ExecutionFailed("LLM returned no content".to_string()))
    }
}

/// Calls a chat model with the node's prompt inputs
pub struct LlmExecutor {
    model: Arc<dyn ChatModel>,
}

impl LlmExecutor {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

impl Default for LlmExecutor {
    fn default() -> Self {
        Self::new(Arc::new(OpenAiChat::new()))
    }
}

fn optional_str(ctx: &ExecutionContext, name: &str) -> Result<Option<String>, ExecutorError> {
    match ctx.inputs.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => ctx.require_str(name).map(|s| Some(s.to_string())),
    }
}

#[async_trait]
impl NodeExecutor for LlmExecutor {
    fn node_type(&self) -> &str {
        node_types::LLM
    }

    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionOutput, ExecutorError> {
        let temperature = match ctx.inputs.get("temperature") {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.as_f64().ok_or_else(|| ExecutorError::InvalidInputType {
                field: "temperature".to_string(),
                expected: "number".to_string(),
                actual: flowcore::VariableType::of(value).to_string(),
            })?),
        };

        let request = ChatRequest {
            model: ctx.require_str("modelName")?.to_string(),
            api_key: optional_str(&ctx, "apiKey")?.unwrap_or_default(),
            api_host: optional_str(&ctx, "apiHost")?.unwrap_or_default(),
            temperature,
            system_prompt: optional_str(&ctx, "systemPrompt")?,
            prompt: ctx.require_str("prompt")?.to_string(),
        };

        ctx.events.info(format!("Calling model {}", request.model));
        let result = tokio::select! {
            _ = ctx.cancellation.cancelled() => return Err(ExecutorError::Cancelled),
            result = self.model.complete(request) => result?,
        };

        Ok(ExecutionOutput::new().with_output("result", result))
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Ask a chat model for a completion".to_string(),
            category: "ai".to_string(),
        }
    }
}
