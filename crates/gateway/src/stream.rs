//! One client connection to a chat session.
//!
//! A [`StreamSession`] reads client frames, starts at most one agent run at
//! a time, and forwards every run event to the client. Each event that
//! changes the conversation is persisted before it is forwarded, so a
//! client that reconnects after seeing an event will find it in storage.
//!
//! Client → server frames:
//! - `{"type":"message","content":"..."}` starts a run
//! - `{"type":"cancel"}` cancels the active run
//!
//! Closing the connection cancels the active run as well.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use opencodex_agent::{AgentRun, ConversationHistoryBuilder, EndReason, StreamEvent};
use opencodex_core::error::StorageError;
use opencodex_core::session::{ActionMetadata, BlockContent, NewAgentAction};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::GatewayState;
use crate::active_runs::RunGuard;

/// A parsed client frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Message { content: String },
    Cancel,
}

/// Parse and validate one text frame.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, String> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| format!("Invalid message: {e}"))?;
    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| "Invalid message: missing \"type\"".to_string())?;
    if !matches!(kind, "message" | "cancel") {
        return Err(format!("Unknown message type: '{kind}'"));
    }

    let message: ClientMessage =
        serde_json::from_value(value).map_err(|e| format!("Invalid message: {e}"))?;
    if let ClientMessage::Message { content } = &message
        && content.trim().is_empty()
    {
        return Err("Message content must not be empty".into());
    }
    Ok(message)
}

struct ActiveTurn {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Drives one connection. See the module docs for the protocol.
pub struct StreamSession {
    state: Arc<GatewayState>,
    session_id: String,
    outbound: mpsc::Sender<StreamEvent>,
    active: Option<ActiveTurn>,
}

impl StreamSession {
    pub fn new(
        state: Arc<GatewayState>,
        session_id: impl Into<String>,
        outbound: mpsc::Sender<StreamEvent>,
    ) -> Self {
        Self {
            state,
            session_id: session_id.into(),
            outbound,
            active: None,
        }
    }

    /// Serve until `inbound` ends, then cancel and await any active run.
    pub async fn serve<S>(mut self, mut inbound: S)
    where
        S: Stream<Item = String> + Unpin,
    {
        info!(session_id = %self.session_id, "Stream session opened");

        while let Some(frame) = inbound.next().await {
            match parse_client_message(&frame) {
                Ok(ClientMessage::Message { content }) => self.start_turn(content).await,
                Ok(ClientMessage::Cancel) => self.cancel_active(),
                Err(message) => {
                    debug!(session_id = %self.session_id, reason = %message, "Rejected client frame");
                    self.send(StreamEvent::Error { message }).await;
                }
            }
        }

        self.cancel_active();
        if let Some(turn) = self.active.take()
            && let Err(e) = turn.handle.await
        {
            error!(session_id = %self.session_id, error = %e, "Turn task panicked");
        }
        info!(session_id = %self.session_id, "Stream session closed");
    }

    async fn send(&self, event: StreamEvent) {
        if self.outbound.send(event).await.is_err() {
            debug!(session_id = %self.session_id, "Client gone, dropping event");
        }
    }

    fn cancel_active(&self) {
        if let Some(turn) = &self.active
            && !turn.handle.is_finished()
        {
            info!(session_id = %self.session_id, "Cancelling active run");
            turn.cancel.cancel();
        }
    }

    async fn start_turn(&mut self, content: String) {
        let Some(guard) = self.state.active_runs.try_acquire(&self.session_id) else {
            self.send(StreamEvent::error(
                "A run is already active for this session",
            ))
            .await;
            return;
        };

        let cancel = CancellationToken::new();
        let turn = Turn {
            state: self.state.clone(),
            session_id: self.session_id.clone(),
            outbound: self.outbound.clone(),
            cancel: cancel.clone(),
            guard: Some(guard),
        };
        let handle = tokio::spawn(turn.run(content));
        self.active = Some(ActiveTurn { cancel, handle });
    }
}

/// One user message and the run it triggers.
struct Turn {
    state: Arc<GatewayState>,
    session_id: String,
    outbound: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
    guard: Option<RunGuard>,
}

impl Turn {
    async fn forward(&self, event: StreamEvent) {
        let _ = self.outbound.send(event).await;
    }

    /// Release the session before the terminal event so the client can
    /// send its next message as soon as it sees `end` or `error`.
    async fn finish(&mut self, event: StreamEvent) {
        self.guard.take();
        self.forward(event).await;
    }

    async fn run(mut self, content: String) {
        let store = self.state.store.clone();
        let session_id = self.session_id.clone();
        self.forward(StreamEvent::Start).await;

        let saved = match store
            .append_block(&session_id, BlockContent::UserText { text: content })
            .await
        {
            Ok(block) => block,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Failed to save user message");
                self.finish(StreamEvent::error(e.to_string())).await;
                return;
            }
        };
        if let Err(e) = store.touch_session(&session_id).await {
            warn!(session_id = %session_id, error = %e, "Failed to touch session");
        }
        self.forward(StreamEvent::UserMessageSaved {
            block_id: saved.id,
            sequence_number: saved.sequence_number,
        })
        .await;

        let history = ConversationHistoryBuilder::new(store.clone(), self.state.agent.model())
            .build(&session_id)
            .await;
        let history = match history {
            Ok(history) => history,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Failed to load history");
                self.finish(StreamEvent::error(e.to_string())).await;
                return;
            }
        };

        let AgentRun {
            mut events,
            outcome,
        } = self.state.agent.run(history, self.cancel.clone());
        let mut recorder = Recorder::new(self.state.clone(), session_id.clone());

        let mut storage_failed = false;
        while let Some(event) = events.recv().await {
            if let Err(e) = recorder.record(&event).await {
                error!(session_id = %session_id, error = %e, "Failed to persist run event");
                self.cancel.cancel();
                recorder.abandon().await;
                self.finish(StreamEvent::error(e.to_string())).await;
                storage_failed = true;
                break;
            }
            if event.is_terminal() {
                self.finish(event).await;
            } else {
                self.forward(event).await;
            }
        }
        // Unblocks a run still sending into a backlog nobody will read.
        drop(events);

        match outcome.await {
            Ok(outcome) => debug!(
                session_id = %session_id,
                steps = outcome.steps,
                state = ?outcome.state,
                "Run finished"
            ),
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Agent task panicked");
                if !storage_failed {
                    recorder.abandon().await;
                    self.finish(StreamEvent::error("Internal error")).await;
                }
            }
        }
    }
}

/// Persists a run's events as content blocks and actions.
struct Recorder {
    state: Arc<GatewayState>,
    session_id: String,
    turn_id: String,
    /// Chunks not yet written as an assistant_text block.
    pending_text: String,
    /// Action created by the latest `action` event.
    current_action: Option<String>,
}

impl Recorder {
    fn new(state: Arc<GatewayState>, session_id: String) -> Self {
        Self {
            state,
            session_id,
            turn_id: uuid::Uuid::new_v4().to_string(),
            pending_text: String::new(),
            current_action: None,
        }
    }

    async fn record(&mut self, event: &StreamEvent) -> Result<(), StorageError> {
        let store = self.state.store.clone();
        match event {
            StreamEvent::Chunk { content } => self.pending_text.push_str(content),
            StreamEvent::Action { tool, input, step } => {
                self.flush_text(true).await?;
                let action = store
                    .create_action(NewAgentAction {
                        chat_session_id: self.session_id.clone(),
                        turn_id: self.turn_id.clone(),
                        action_type: tool.clone(),
                        action_input: input.clone(),
                        step: *step,
                    })
                    .await?;
                store
                    .append_block(
                        &self.session_id,
                        BlockContent::ToolCall {
                            action_id: action.id.clone(),
                            tool: tool.clone(),
                            input: input.clone(),
                            step: *step,
                        },
                    )
                    .await?;
                self.current_action = Some(action.id);
            }
            StreamEvent::Observation {
                tool,
                output,
                success,
                step,
                metadata,
            } => {
                let Some(action_id) = self.current_action.take() else {
                    warn!(session_id = %self.session_id, tool = %tool, "Observation without an action");
                    return Ok(());
                };
                self.complete(&action_id, *success, output, metadata.clone())
                    .await?;
                store
                    .append_block(
                        &self.session_id,
                        BlockContent::ToolResult {
                            action_id,
                            tool: tool.clone(),
                            success: *success,
                            output: output.clone(),
                            step: *step,
                        },
                    )
                    .await?;
            }
            StreamEvent::End { reason, .. } => {
                self.flush_text(*reason != EndReason::Cancelled).await?;
                self.fail_open_action().await?;
                store.touch_session(&self.session_id).await?;
            }
            StreamEvent::Error { .. } => {
                self.flush_text(false).await?;
                self.fail_open_action().await?;
                store.touch_session(&self.session_id).await?;
            }
            StreamEvent::Start
            | StreamEvent::UserMessageSaved { .. }
            | StreamEvent::ActionStreaming { .. }
            | StreamEvent::Thought { .. } => {}
        }
        Ok(())
    }

    /// Best-effort cleanup after a storage fault or a crashed run.
    async fn abandon(&mut self) {
        if let Err(e) = self.flush_text(false).await {
            warn!(session_id = %self.session_id, error = %e, "Failed to save partial text");
        }
        if let Err(e) = self.fail_open_action().await {
            warn!(session_id = %self.session_id, error = %e, "Failed to close open action");
        }
    }

    async fn flush_text(&mut self, complete: bool) -> Result<(), StorageError> {
        if self.pending_text.is_empty() {
            return Ok(());
        }
        let text = std::mem::take(&mut self.pending_text);
        self.state
            .store
            .append_block(&self.session_id, BlockContent::AssistantText { text, complete })
            .await?;
        Ok(())
    }

    /// An action interrupted before its observation ends up failed.
    async fn fail_open_action(&mut self) -> Result<(), StorageError> {
        if let Some(action_id) = self.current_action.take() {
            self.complete(&action_id, false, "Cancelled before completion", None)
                .await?;
        }
        Ok(())
    }

    async fn complete(
        &self,
        action_id: &str,
        success: bool,
        output: &str,
        metadata: Option<ActionMetadata>,
    ) -> Result<(), StorageError> {
        self.state
            .store
            .complete_action(action_id, success, output.to_string(), metadata)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_message_and_cancel() {
        assert_eq!(
            parse_client_message(r#"{"type":"message","content":"hi"}"#),
            Ok(ClientMessage::Message {
                content: "hi".into()
            })
        );
        assert_eq!(
            parse_client_message(r#"{"type":"cancel"}"#),
            Ok(ClientMessage::Cancel)
        );
    }

    #[test]
    fn rejects_bad_frames() {
        assert!(
            parse_client_message("not json")
                .unwrap_err()
                .starts_with("Invalid message")
        );
        assert_eq!(
            parse_client_message(r#"{"type":"ping"}"#),
            Err("Unknown message type: 'ping'".into())
        );
        assert!(parse_client_message(r#"{"content":"hi"}"#).is_err());
        assert!(parse_client_message(r#"{"type":"message"}"#).is_err());
        assert_eq!(
            parse_client_message(r#"{"type":"message","content":"   "}"#),
            Err("Message content must not be empty".into())
        );
    }
}
