//! ReAct executor: Reason → Act → Observe.
//!
//! Each step streams one model reply. Text goes straight to the client as
//! `chunk` events; tool calls are reassembled by the [`DeltaAssembler`]
//! and announced with `action_streaming` as soon as their name is known.
//! When the reply ends:
//!
//! - no tool call: the text is the final answer and the run ends;
//! - one or more calls: only the lowest-index call is executed, its
//!   outcome is appended to the running history and the next step begins.
//!
//! Tool faults never stop a run. Provider errors do.

use std::sync::Arc;

use opencodex_core::message::Message;
use opencodex_core::provider::{Provider, ProviderRequest};
use opencodex_core::tool::{ToolRegistry, ToolResult};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::delta::{AssemblerOutput, CompletedCall, DeltaAssembler};
use crate::stream_event::{EndReason, StreamEvent};
use crate::vision::VisionContentBuilder;

/// Capacity of the per-run event channel.
const EVENT_BUFFER: usize = 128;

/// How a run terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Ended normally, with a final answer or an exhausted budget.
    End(EndReason),
    /// The provider failed.
    Failed,
    /// Cancelled by the caller, or the event receiver went away.
    Cancelled,
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: RunState,
    /// Steps started.
    pub steps: u32,
    /// Turns this run added after the seed history, in order.
    pub turns: Vec<Message>,
}

/// Handle to a spawned run.
pub struct AgentRun {
    pub events: mpsc::Receiver<StreamEvent>,
    pub outcome: JoinHandle<RunOutcome>,
}

/// A ReAct agent bound to one provider, model and tool set.
#[derive(Clone)]
pub struct ReactAgent {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    max_iterations: u32,
    system_prompt: Option<String>,
    tools: Arc<ToolRegistry>,
}

impl ReactAgent {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            max_iterations: 25,
            system_prompt: None,
            tools,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the step budget. Zero is treated as one.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.system_prompt = (!prompt.is_empty()).then_some(prompt);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Start a run over `history` on the tokio runtime.
    ///
    /// Events arrive on the returned channel in emission order. Cancelling
    /// `cancel` stops the run at its next suspension point. The receiver
    /// must be drained or dropped for the run to finish.
    pub fn run(&self, history: Vec<Message>, cancel: CancellationToken) -> AgentRun {
        let (tx, events) = mpsc::channel(EVENT_BUFFER);
        let mut run = RunLoop {
            agent: self.clone(),
            renderer: VisionContentBuilder::new(&self.model),
            history,
            turns: Vec::new(),
            steps: 0,
            partial: String::new(),
            tx,
            cancel,
        };
        let outcome = tokio::spawn(async move { run.execute().await });
        AgentRun { events, outcome }
    }
}

/// Why a run stopped before reaching a terminal event.
enum Interrupted {
    Cancelled,
    Disconnected,
}

struct RunLoop {
    agent: ReactAgent,
    renderer: VisionContentBuilder,
    history: Vec<Message>,
    turns: Vec<Message>,
    steps: u32,
    /// Text of the step in progress.
    partial: String,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
}

impl RunLoop {
    async fn execute(&mut self) -> RunOutcome {
        let state = match self.drive().await {
            Ok(state) => state,
            Err(Interrupted::Cancelled) => {
                info!(steps = self.steps, "Run cancelled");
                let _ = self
                    .tx
                    .send(StreamEvent::End {
                        content: std::mem::take(&mut self.partial),
                        reason: EndReason::Cancelled,
                    })
                    .await;
                RunState::Cancelled
            }
            Err(Interrupted::Disconnected) => {
                debug!(steps = self.steps, "Event receiver dropped, stopping run");
                RunState::Cancelled
            }
        };

        RunOutcome {
            state,
            steps: self.steps,
            turns: std::mem::take(&mut self.turns),
        }
    }

    /// Send one event. A full channel yields to cancellation.
    async fn emit(&self, event: StreamEvent) -> Result<(), Interrupted> {
        tokio::select! {
            biased;
            sent = self.tx.send(event) => sent.map_err(|_| Interrupted::Disconnected),
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled),
        }
    }

    async fn drive(&mut self) -> Result<RunState, Interrupted> {
        let tool_definitions = self.agent.tools.definitions();
        let mut last_text = String::new();

        for step in 1..=self.agent.max_iterations {
            self.steps = step;
            self.partial.clear();

            let request = ProviderRequest {
                model: self.agent.model.clone(),
                messages: self.request_messages(),
                temperature: self.agent.temperature,
                max_tokens: self.agent.max_tokens,
                tools: tool_definitions.clone(),
            };
            debug!(step, turns = request.messages.len(), "Requesting completion");

            let opened = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Interrupted::Cancelled),
                opened = self.agent.provider.stream(request) => opened,
            };
            let mut stream = match opened {
                Ok(stream) => stream,
                Err(e) => return self.fail(format!("Provider error: {e}")).await,
            };

            let mut assembler = DeltaAssembler::new();
            loop {
                let item = tokio::select! {
                    _ = self.cancel.cancelled() => return Err(Interrupted::Cancelled),
                    item = stream.recv() => item,
                };
                let fragment = match item {
                    None => break,
                    Some(Ok(fragment)) => fragment,
                    Some(Err(e)) => return self.fail(format!("Provider error: {e}")).await,
                };
                match assembler.push(fragment) {
                    Some(AssemblerOutput::Text(content)) => {
                        self.partial.push_str(&content);
                        self.emit(StreamEvent::Chunk { content }).await?;
                    }
                    Some(AssemblerOutput::Announced { name, .. }) => {
                        self.emit(StreamEvent::action_streaming(name, step)).await?;
                    }
                    None => {}
                }
            }

            let turn = assembler.finish();
            let Some(call) = turn.first_call().cloned() else {
                info!(step, "Final answer");
                if !turn.text.is_empty() {
                    self.turns.push(Message::assistant(&turn.text));
                }
                self.emit(StreamEvent::End {
                    content: turn.text,
                    reason: EndReason::FinalAnswer,
                })
                .await?;
                return Ok(RunState::End(EndReason::FinalAnswer));
            };

            if turn.calls.len() > 1 {
                debug!(
                    step,
                    proposed = turn.calls.len(),
                    tool = %call.name,
                    "Executing the lowest-index call only"
                );
            }

            // The step text is complete once handed to `act`.
            self.partial.clear();
            self.act(step, &turn.text, call).await?;
            last_text = turn.text;
        }

        warn!(
            max_iterations = self.agent.max_iterations,
            "Max iterations reached"
        );
        self.emit(StreamEvent::End {
            content: last_text,
            reason: EndReason::MaxIterations,
        })
        .await?;
        Ok(RunState::End(EndReason::MaxIterations))
    }

    /// Execute one call, emit its `action`/`observation`, extend history.
    async fn act(&mut self, step: u32, text: &str, call: CompletedCall) -> Result<(), Interrupted> {
        let (input, parse_error) = parse_arguments(&call.arguments);
        self.emit(StreamEvent::Action {
            tool: call.name.clone(),
            input: input.clone(),
            step,
        })
        .await?;

        let result = match (parse_error, self.agent.tools.get(&call.name)) {
            (Some(e), _) => ToolResult::failure(format!(
                "Invalid JSON arguments for {}: {e}",
                call.name
            )),
            (None, None) => ToolResult::failure(format!("Tool not found: {}", call.name)),
            (None, Some(tool)) => {
                info!(step, tool = %call.name, "Executing tool");
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(Interrupted::Cancelled),
                    result = tool.validate_and_execute(input.clone()) => result,
                }
            }
        };
        debug!(step, tool = %call.name, success = result.success, "Tool finished");

        self.emit(StreamEvent::Observation {
            tool: call.name.clone(),
            output: result.output.clone(),
            success: result.success,
            step,
            metadata: result.metadata.clone(),
        })
        .await?;

        let mut appended = Vec::with_capacity(3);
        if !text.is_empty() {
            appended.push(Message::assistant(text));
        }
        appended.push(Message::tool_call(&call.name, &input));
        appended.push(Message::tool_result(self.renderer.render(
            result.success,
            &result.output,
            result.metadata.as_ref(),
        )));
        self.history.extend(appended.iter().cloned());
        self.turns.extend(appended);
        Ok(())
    }

    async fn fail(&mut self, message: String) -> Result<RunState, Interrupted> {
        warn!(step = self.steps, error = %message, "Run failed");
        self.emit(StreamEvent::Error { message }).await?;
        Ok(RunState::Failed)
    }

    fn request_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        if let Some(prompt) = &self.agent.system_prompt {
            messages.push(Message::system(prompt));
        }
        messages.extend(self.history.iter().cloned());
        messages
    }
}

/// Parse a streamed argument string. Empty means no arguments.
///
/// On failure the raw string is kept as the input so the client still
/// sees what the model sent.
fn parse_arguments(raw: &str) -> (serde_json::Value, Option<serde_json::Error>) {
    if raw.trim().is_empty() {
        return (serde_json::json!({}), None);
    }
    match serde_json::from_str(raw) {
        Ok(value) => (value, None),
        Err(e) => (serde_json::Value::String(raw.to_string()), Some(e)),
    }
}
