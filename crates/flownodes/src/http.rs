use async_trait::async_trait;
use flowcore::{
    display_value, node_types, ExecutionContext, ExecutionOutput, ExecutorError, FlowValue,
    NodeExecutor, NodeMetadata, SnapshotUpdate,
};
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HttpConfig {
    api: ApiConfig,
    #[serde(default)]
    headers_values: BTreeMap<String, FlowValue>,
    #[serde(default)]
    params_values: BTreeMap<String, FlowValue>,
    #[serde(default)]
    body: BodyConfig,
    #[serde(default)]
    timeout: Option<TimeoutConfig>,
}

#[derive(Debug, Deserialize)]
struct ApiConfig {
    #[serde(default = "default_method")]
    method: String,
    url: FlowValue,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BodyConfig {
    #[serde(default)]
    body_type: BodyType,
    json: Option<FlowValue>,
    raw_text: Option<FlowValue>,
    binary: Option<FlowValue>,
    #[serde(default)]
    form_data: BTreeMap<String, FlowValue>,
    #[serde(default)]
    x_www_form_urlencoded: BTreeMap<String, FlowValue>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum BodyType {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "JSON")]
    Json,
    #[serde(rename = "raw-text")]
    RawText,
    #[serde(rename = "x-www-form-urlencoded")]
    FormUrlEncoded,
    #[serde(rename = "form-data")]
    FormData,
    #[serde(rename = "binary")]
    Binary,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeoutConfig {
    /// Per-attempt timeout in milliseconds
    timeout: u64,
    #[serde(default)]
    retry_times: u32,
}

/// Fully resolved request, recorded before it is sent
#[derive(Debug, Clone)]
struct ResolvedRequest {
    method: Method,
    url: String,
    headers: BTreeMap<String, String>,
    params: BTreeMap<String, String>,
    body: ResolvedBody,
    timeout: Duration,
    retries: u32,
}

#[derive(Debug, Clone)]
enum ResolvedBody {
    None,
    Json(Value),
    Text(String),
    Form(BTreeMap<String, String>),
    Multipart(BTreeMap<String, String>),
    Binary(Vec<u8>),
}

impl ResolvedBody {
    fn to_value(&self) -> Value {
        match self {
            ResolvedBody::None => Value::Null,
            ResolvedBody::Json(value) => value.clone(),
            ResolvedBody::Text(text) => json!(text),
            ResolvedBody::Form(fields) | ResolvedBody::Multipart(fields) => json!(fields),
            ResolvedBody::Binary(bytes) => json!(String::from_utf8_lossy(bytes)),
        }
    }
}

impl ResolvedRequest {
    fn to_snapshot(&self) -> Map<String, Value> {
        let mut inputs = Map::new();
        inputs.insert("method".to_string(), json!(self.method.as_str()));
        inputs.insert("url".to_string(), json!(self.url));
        inputs.insert("headers".to_string(), json!(self.headers));
        inputs.insert("params".to_string(), json!(self.params));
        inputs.insert("body".to_string(), self.body.to_value());
        inputs.insert(
            "timeout".to_string(),
            json!(self.timeout.as_millis() as u64),
        );
        inputs.insert("retryTimes".to_string(), json!(self.retries));
        inputs
    }
}

/// Retry and timeout policy used when a node does not override it
#[derive(Debug, Clone)]
pub struct HttpDefaults {
    pub timeout: Duration,
    pub retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for HttpDefaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retries: 0,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// HTTP request node
pub struct HttpExecutor {
    client: reqwest::Client,
    defaults: HttpDefaults,
}

impl HttpExecutor {
    pub fn new() -> Self {
        Self::with_defaults(HttpDefaults::default())
    }

    pub fn with_defaults(defaults: HttpDefaults) -> Self {
        Self {
            client: reqwest::Client::new(),
            defaults,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.defaults
            .initial_backoff
            .saturating_mul(factor)
            .min(self.defaults.max_backoff)
    }

    fn resolve(
        &self,
        ctx: &ExecutionContext,
        config: &HttpConfig,
    ) -> Result<ResolvedRequest, ExecutorError> {
        let method = Method::from_bytes(config.api.method.to_uppercase().as_bytes())
            .map_err(|_| {
                ExecutorError::Configuration(format!(
                    "Unsupported method: {}",
                    config.api.method
                ))
            })?;
        let url = display_value(&ctx.resolve(&config.api.url)?.value);
        if url.is_empty() {
            return Err(ExecutorError::MissingInput("url".to_string()));
        }

        let headers = resolve_strings(ctx, &config.headers_values)?;
        let params = resolve_strings(ctx, &config.params_values)?;
        let body = resolve_body(ctx, &config.body)?;

        let (timeout, retries) = match config.timeout {
            Some(t) => (Duration::from_millis(t.timeout), t.retry_times),
            None => (self.defaults.timeout, self.defaults.retries),
        };

        Ok(ResolvedRequest {
            method,
            url,
            headers,
            params,
            body,
            timeout,
            retries,
        })
    }

    fn build(&self, request: &ResolvedRequest) -> RequestBuilder {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .timeout(request.timeout);
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        match &request.body {
            ResolvedBody::None => builder,
            ResolvedBody::Json(value) => builder.json(value),
            ResolvedBody::Text(text) => builder.body(text.clone()),
            ResolvedBody::Form(fields) => builder.form(fields),
            ResolvedBody::Multipart(fields) => {
                let form = fields
                    .iter()
                    .fold(reqwest::multipart::Form::new(), |form, (key, value)| {
                        form.text(key.clone(), value.clone())
                    });
                builder.multipart(form)
            }
            ResolvedBody::Binary(bytes) => builder.body(bytes.clone()),
        }
    }

    async fn send(&self, request: &ResolvedRequest) -> Result<Map<String, Value>, reqwest::Error> {
        let response = self.build(request).send().await?;

        let status = response.status().as_u16();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    Value::String(String::from_utf8_lossy(v.as_bytes()).into_owned()),
                )
            })
            .collect();
        let body = response.text().await?;

        let mut outputs = Map::new();
        outputs.insert("statusCode".to_string(), json!(status));
        outputs.insert("headers".to_string(), Value::Object(headers));
        outputs.insert("body".to_string(), Value::String(body));
        Ok(outputs)
    }
}

impl Default for HttpExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_strings(
    ctx: &ExecutionContext,
    values: &BTreeMap<String, FlowValue>,
) -> Result<BTreeMap<String, String>, ExecutorError> {
    values
        .iter()
        .map(|(key, value)| Ok((key.clone(), display_value(&ctx.resolve(value)?.value))))
        .collect()
}

fn resolve_body(ctx: &ExecutionContext, body: &BodyConfig) -> Result<ResolvedBody, ExecutorError> {
    let text = |value: &Option<FlowValue>| -> Result<String, ExecutorError> {
        match value {
            Some(value) => Ok(display_value(&ctx.resolve(value)?.value)),
            None => Ok(String::new()),
        }
    };

    Ok(match body.body_type {
        BodyType::None => ResolvedBody::None,
        BodyType::Json => match &body.json {
            None => ResolvedBody::None,
            Some(value) => match ctx.resolve(value)?.value {
                Value::String(raw) if raw.trim().is_empty() => ResolvedBody::None,
                Value::String(raw) => ResolvedBody::Json(serde_json::from_str(&raw).map_err(
                    |e| ExecutorError::ExecutionFailed(format!("Invalid JSON body: {}", e)),
                )?),
                other => ResolvedBody::Json(other),
            },
        },
        BodyType::RawText => ResolvedBody::Text(text(&body.raw_text)?),
        BodyType::Binary => ResolvedBody::Binary(text(&body.binary)?.into_bytes()),
        BodyType::FormUrlEncoded => {
            ResolvedBody::Form(resolve_strings(ctx, &body.x_www_form_urlencoded)?)
        }
        BodyType::FormData => ResolvedBody::Multipart(resolve_strings(ctx, &body.form_data)?),
    })
}

#[async_trait]
impl NodeExecutor for HttpExecutor {
    fn node_type(&self) -> &str {
        node_types::HTTP
    }

    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionOutput, ExecutorError> {
        let config: HttpConfig = ctx.config()?;
        let request = self.resolve(&ctx, &config)?;
        ctx.snapshot
            .add_data(SnapshotUpdate::inputs(request.to_snapshot()));

        ctx.events
            .info(format!("{} {}", request.method, request.url));

        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                _ = ctx.cancellation.cancelled() => return Err(ExecutorError::Cancelled),
                result = self.send(&request) => result,
            };

            match result {
                Ok(outputs) => {
                    ctx.events
                        .info(format!("Response status: {}", outputs["statusCode"]));
                    return Ok(ExecutionOutput::from_map(outputs));
                }
                // A malformed request fails the same way on every attempt
                Err(e) if attempt < request.retries && !e.is_builder() => {
                    let backoff = self.backoff(attempt);
                    warn!(
                        node_id = %ctx.node_id(),
                        attempt = attempt + 1,
                        max_retries = request.retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Retrying HTTP request"
                    );
                    ctx.events.warn(format!(
                        "Attempt {} failed: {}, retrying in {}ms",
                        attempt + 1,
                        e,
                        backoff.as_millis()
                    ));
                    tokio::select! {
                        _ = ctx.cancellation.cancelled() => return Err(ExecutorError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    attempt += 1;
                }
                Err(e) if e.is_timeout() => {
                    return Err(ExecutorError::Timeout {
                        millis: request.timeout.as_millis() as u64,
                    })
                }
                Err(e) => {
                    return Err(ExecutorError::ExecutionFailed(format!(
                        "HTTP request failed: {}",
                        e
                    )))
                }
            }
        }
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
        }
    }
}
