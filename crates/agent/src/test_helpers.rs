//! Scripted providers and tools for agent and gateway tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use opencodex_core::error::{ProviderError, ToolError};
use opencodex_core::provider::{FragmentStream, Provider, ProviderRequest, StreamFragment};
use opencodex_core::session::{ActionMetadata, ImageAttachment};
use opencodex_core::tool::{Tool, ToolResult};
use tokio::sync::mpsc;

/// One scripted model reply.
#[derive(Debug, Clone, Default)]
pub struct ScriptedReply {
    pub fragments: Vec<Result<StreamFragment, ProviderError>>,
    /// Keep the stream open after the last fragment instead of closing it.
    pub hang: bool,
}

impl ScriptedReply {
    pub fn new(fragments: Vec<StreamFragment>) -> Self {
        Self {
            fragments: fragments.into_iter().map(Ok).collect(),
            hang: false,
        }
    }

    /// A reply made only of text fragments.
    pub fn text(chunks: &[&str]) -> Self {
        Self::new(chunks.iter().map(|c| StreamFragment::text(*c)).collect())
    }

    /// A reply that calls one tool with `arguments`, with optional lead-in text.
    pub fn tool_call(thought: &str, tool: &str, arguments: serde_json::Value) -> Self {
        let mut fragments = Vec::new();
        if !thought.is_empty() {
            fragments.push(StreamFragment::text(thought));
        }
        fragments.push(StreamFragment::tool_call(0, Some(tool), Some("")));
        fragments.push(StreamFragment::tool_call(
            0,
            None,
            Some(&arguments.to_string()),
        ));
        Self::new(fragments)
    }

    /// Fail the stream after the given fragments.
    pub fn failing(fragments: Vec<StreamFragment>, error: ProviderError) -> Self {
        let mut reply = Self::new(fragments);
        reply.fragments.push(Err(error));
        reply
    }

    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }
}

/// A provider that replays scripted replies, one per `stream` call.
///
/// Panics if more calls are made than replies provided.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<ProviderRequest>>,
    open: Mutex<Vec<mpsc::Sender<Result<StreamFragment, ProviderError>>>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            open: Mutex::new(Vec::new()),
        }
    }

    /// One plain text answer.
    pub fn single_text(chunks: &[&str]) -> Self {
        Self::new(vec![ScriptedReply::text(chunks)])
    }

    /// A single tool call followed by a text answer.
    pub fn tool_then_answer(
        tool: &str,
        arguments: serde_json::Value,
        thought: &str,
        answer: &str,
    ) -> Self {
        Self::new(vec![
            ScriptedReply::tool_call(thought, tool, arguments),
            ScriptedReply::text(&[answer]),
        ])
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: ProviderRequest) -> Result<FragmentStream, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedProvider: no more replies (call #{call})"));

        let (tx, rx) = mpsc::channel(reply.fragments.len().max(1));
        for fragment in reply.fragments {
            tx.try_send(fragment).unwrap();
        }
        if reply.hang {
            self.open.lock().unwrap().push(tx);
        }
        Ok(rx)
    }
}

/// A provider whose `stream` call itself fails.
pub struct FailingProvider;

#[async_trait]
impl Provider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }

    async fn stream(&self, _request: ProviderRequest) -> Result<FragmentStream, ProviderError> {
        Err(ProviderError::Network("connection refused".into()))
    }
}

/// Tool that echoes its `text` argument.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the given text"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let text = arguments["text"].as_str().unwrap_or_default();
        Ok(ToolResult::success(text))
    }
}

/// Tool that returns a tiny PNG as image metadata.
pub struct ImageTool;

pub const IMAGE_DATA_URI: &str = "data:image/png;base64,iVBORw0KGgo=";

#[async_trait]
impl Tool for ImageTool {
    fn name(&self) -> &str {
        "screenshot"
    }

    fn description(&self) -> &str {
        "Capture a screenshot"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        Ok(
            ToolResult::success("Captured screenshot.png").with_metadata(ActionMetadata::Image(
                ImageAttachment {
                    image_data: IMAGE_DATA_URI.into(),
                    mime_type: "image/png".into(),
                    filename: Some("screenshot.png".into()),
                },
            )),
        )
    }
}

/// Tool that never finishes.
pub struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "Sleeps forever"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        std::future::pending::<()>().await;
        Ok(ToolResult::success("unreachable"))
    }
}
