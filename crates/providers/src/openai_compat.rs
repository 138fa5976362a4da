//! OpenAI-compatible streaming provider.
//!
//! Works with any endpoint that speaks the `/v1/chat/completions` streaming
//! dialect: Ollama, vLLM, llama.cpp server, LM Studio, OpenAI itself.
//!
//! The request is a single POST with `stream: true`; the response body is
//! handed to the [`sse`](crate::sse) decoder.

use std::time::Duration;

use async_trait::async_trait;
use chatloop_config::AppConfig;
use chatloop_core::error::ProviderError;
use chatloop_core::message::Message;
use chatloop_core::provider::{ChatRequest, DeltaStream, Provider};
use chatloop_core::tool::ToolDescriptor;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::sse;

/// An OpenAI-compatible chat endpoint.
pub struct OpenAiCompatProvider {
    name: String,
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a provider for `endpoint`, the full chat-completions URL.
    ///
    /// No overall request timeout is set on the client: streams may run long
    /// and the caller's cancellation token bounds each request instead.
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            endpoint: endpoint.into(),
            api_key,
            client,
        })
    }

    /// Build the provider described by the loaded configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        Self::new("openai-compat", &config.endpoint, config.api_key.clone())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Build the JSON request payload.
    pub(crate) fn to_api_request(request: &ChatRequest) -> ApiRequest<'_> {
        ApiRequest {
            model: &request.model,
            messages: Self::to_api_messages(&request.messages),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            top_k: request.top_k,
            stream: true,
            tools: Self::to_api_tools(&request.tools),
            tool_selection: "auto",
        }
    }

    /// Convert our Message types to the wire format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage<'_>> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str(),
                content: &m.content,
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: &tc.id,
                                r#type: "function",
                                function: ApiFunction {
                                    name: &tc.name,
                                    arguments: serde_json::Value::Object(tc.arguments.clone())
                                        .to_string(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.as_deref(),
            })
            .collect()
    }

    /// Convert tool descriptors to the wire format.
    fn to_api_tools(tools: &[ToolDescriptor]) -> Vec<ApiToolDefinition<'_>> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function",
                function: ApiToolFunction {
                    name: &t.name,
                    description: &t.description,
                    parameters: t.schema(),
                },
            })
            .collect()
    }

    async fn error_for_status(response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(5);
            return ProviderError::RateLimited { retry_after_secs };
        }

        if status == 401 || status == 403 {
            return ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            );
        }

        let error_body = response.text().await.unwrap_or_default();
        warn!(status, body = %error_body, "Provider returned error");
        ProviderError::ApiError {
            status_code: status,
            message: error_body,
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<DeltaStream, ProviderError> {
        let payload = Self::to_api_request(&request);

        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending streaming request"
        );

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header("Accept", "text/event-stream")
            .json(&payload);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            sent = builder.send() => sent.map_err(|e| ProviderError::Network(e.to_string()))?,
        };

        if !response.status().is_success() {
            return Err(Self::error_for_status(response).await);
        }

        Ok(sse::decode(response.bytes_stream(), cancel))
    }
}

// --- Wire types (internal) ---

#[derive(Debug, Serialize)]
pub(crate) struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    top_k: u32,
    stream: bool,
    tools: Vec<ApiToolDefinition<'a>>,
    tool_selection: &'static str,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ApiToolCall<'a> {
    id: &'a str,
    r#type: &'static str,
    function: ApiFunction<'a>,
}

#[derive(Debug, Serialize)]
struct ApiFunction<'a> {
    name: &'a str,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition<'a> {
    r#type: &'static str,
    function: ApiToolFunction<'a>,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: serde_json::Value,
}
