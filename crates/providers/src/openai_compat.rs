//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, Groq and any
//! endpoint exposing `/v1/chat/completions` with SSE streaming.
//!
//! The SSE payload is decoded here into [`StreamFragment`]s; nothing
//! loosely typed leaves this module.

use async_trait::async_trait;
use futures::StreamExt;
use opencodex_core::error::ProviderError;
use opencodex_core::message::{ContentPart, Message, Role, TurnContent};
use opencodex_core::provider::{
    FragmentStream, Provider, ProviderRequest, StreamFragment, ToolDefinition,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an OpenRouter provider (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert our turns to OpenAI API format.
    ///
    /// Tool-call turns become `tool_calls` with ids synthesized from their
    /// position; the following tool-result turn answers that id. Image
    /// parts of a tool result are only accepted on user turns, so they
    /// follow in a separate user message.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        let mut out = Vec::with_capacity(messages.len());
        let mut pending_call: Option<String> = None;
        let mut call_seq = 0usize;

        for m in messages {
            match (m.role, &m.function_call) {
                (Role::Assistant, Some(call)) => {
                    call_seq += 1;
                    let id = format!("call_{call_seq}");
                    out.push(ApiMessage {
                        role: "assistant".into(),
                        content: None,
                        tool_calls: Some(vec![ApiToolCall {
                            id: id.clone(),
                            r#type: "function".into(),
                            function: ApiFunction {
                                name: call.name.clone(),
                                arguments: call.arguments.clone(),
                            },
                        }]),
                        tool_call_id: None,
                    });
                    pending_call = Some(id);
                }
                (Role::Tool, _) => match pending_call.take() {
                    Some(id) => {
                        out.push(ApiMessage {
                            role: "tool".into(),
                            content: Some(TurnContent::Text(m.content.text())),
                            tool_call_id: Some(id),
                            tool_calls: None,
                        });
                        if let TurnContent::Parts(parts) = &m.content {
                            let images: Vec<ContentPart> = parts
                                .iter()
                                .filter(|p| matches!(p, ContentPart::ImageUrl { .. }))
                                .cloned()
                                .collect();
                            if !images.is_empty() {
                                out.push(ApiMessage::plain("user", TurnContent::Parts(images)));
                            }
                        }
                    }
                    None => out.push(ApiMessage::plain("user", m.content.clone())),
                },
                (role, _) => {
                    let role = match role {
                        Role::System => "system",
                        Role::User => "user",
                        _ => "assistant",
                    };
                    out.push(ApiMessage::plain(role, m.content.clone()));
                }
            }
        }
        out
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": true,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(&self, request: ProviderRequest) -> Result<FragmentStream, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request);

        debug!(provider = %self.name, model = %request.model, turns = request.messages.len(), "Sending streaming request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status == 404 {
            return Err(ProviderError::ModelNotFound(request.model));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider streaming error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Read the SSE byte stream and forward decoded fragments
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for item in decoder.push(&bytes) {
                    let fatal = item.is_err();
                    if tx.send(item).await.is_err() {
                        trace!(provider = %provider_name, "Receiver dropped, closing stream");
                        return;
                    }
                    if fatal {
                        return;
                    }
                }

                if decoder.is_done() {
                    return;
                }
            }
            trace!(provider = %provider_name, "Stream ended without [DONE]");
        });

        Ok(rx)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

/// Incremental decoder for OpenAI-style SSE bodies.
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across network chunks decode correctly.
#[derive(Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    /// True once `data: [DONE]` has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes; returns every fragment completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<StreamFragment, ProviderError>> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();

        while !self.done {
            let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            // Skip empty lines, SSE comments and non-data fields
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();

            if data == "[DONE]" {
                self.done = true;
                break;
            }
            if data.is_empty() {
                continue;
            }

            match Self::decode_payload(data) {
                Ok(fragments) => out.extend(fragments.into_iter().map(Ok)),
                Err(e) => {
                    out.push(Err(e));
                    self.done = true;
                }
            }
        }
        out
    }

    fn decode_payload(data: &str) -> Result<Vec<StreamFragment>, ProviderError> {
        let payload: StreamResponse = serde_json::from_str(data)
            .map_err(|e| ProviderError::MalformedStream(format!("{e}: {data}")))?;

        if let Some(err) = payload.error {
            return Err(ProviderError::StreamInterrupted(err.message));
        }

        let mut fragments = Vec::new();
        let Some(choice) = payload.choices.into_iter().next() else {
            return Ok(fragments);
        };
        let delta = choice.delta;

        if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
            fragments.push(StreamFragment::Text { content });
        }

        for tc in delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = tc
                .function
                .map(|f| (f.name, f.arguments))
                .unwrap_or_default();
            fragments.push(StreamFragment::tool_call(
                tc.index,
                name.as_deref(),
                arguments.as_deref(),
            ));
        }

        // Legacy single-function streaming
        if let Some(fc) = delta.function_call {
            fragments.push(StreamFragment::tool_call(
                0,
                fc.name.as_deref(),
                fc.arguments.as_deref(),
            ));
        }

        Ok(fragments)
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: Option<TurnContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn plain(role: &str, content: TurnContent) -> Self {
        Self {
            role: role.into(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
    #[serde(default)]
    function_call: Option<StreamFunctionDelta>,
}

/// A tool call delta: arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
