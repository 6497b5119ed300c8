//! Replaying a persisted session as provider turns.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use opencodex_core::error::StorageError;
use opencodex_core::message::Message;
use opencodex_core::session::{AgentAction, BlockContent};
use opencodex_core::store::SessionStore;
use tracing::debug;

use crate::vision::VisionContentBuilder;

/// Rebuilds the turn list a model should see for a session.
///
/// Blocks are replayed in sequence order. A tool call contributes two
/// turns (the call and its rendered result) once its action is terminal
/// and its result block exists; otherwise it is skipped.
pub struct ConversationHistoryBuilder {
    store: Arc<dyn SessionStore>,
    renderer: VisionContentBuilder,
}

impl ConversationHistoryBuilder {
    pub fn new(store: Arc<dyn SessionStore>, model: &str) -> Self {
        Self {
            store,
            renderer: VisionContentBuilder::new(model),
        }
    }

    pub async fn build(&self, session_id: &str) -> Result<Vec<Message>, StorageError> {
        let blocks = self.store.list_blocks(session_id).await?;
        let actions: HashMap<String, AgentAction> = self
            .store
            .list_actions(session_id)
            .await?
            .into_iter()
            .map(|a| (a.id.clone(), a))
            .collect();

        let answered: HashSet<&str> = blocks
            .iter()
            .filter_map(|b| match &b.content {
                BlockContent::ToolResult { action_id, .. } => Some(action_id.as_str()),
                _ => None,
            })
            .collect();

        let mut turns = Vec::with_capacity(blocks.len());
        for block in &blocks {
            match &block.content {
                BlockContent::UserText { text } => turns.push(Message::user(text)),
                BlockContent::AssistantText { text, .. } => {
                    if !text.is_empty() {
                        turns.push(Message::assistant(text));
                    }
                }
                BlockContent::ToolCall {
                    action_id,
                    tool,
                    input,
                    ..
                } => {
                    let rendered = actions
                        .get(action_id)
                        .filter(|_| answered.contains(action_id.as_str()))
                        .and_then(|action| self.renderer.render_action(action));
                    match rendered {
                        Some(content) => {
                            turns.push(Message::tool_call(tool, input));
                            turns.push(Message::tool_result(content));
                        }
                        None => debug!(
                            session_id,
                            action_id = %action_id,
                            "Skipping unfinished tool call"
                        ),
                    }
                }
                BlockContent::ToolResult { .. } => {}
            }
        }

        debug!(session_id, blocks = blocks.len(), turns = turns.len(), "History rebuilt");
        Ok(turns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencodex_core::message::{Role, TurnContent};
    use opencodex_core::session::{
        ActionMetadata, ChatSession, ImageAttachment, NewAgentAction,
    };
    use opencodex_storage::InMemoryStore;

    async fn session(store: &InMemoryStore) -> String {
        store
            .create_session(ChatSession::new("project", "test"))
            .await
            .unwrap()
            .id
    }

    /// Persist one tool call the way the gateway does.
    async fn record_action(
        store: &InMemoryStore,
        session_id: &str,
        step: u32,
        output: &str,
        metadata: Option<ActionMetadata>,
        finish: bool,
    ) -> String {
        let input = serde_json::json!({"command": "ls"});
        let action = store
            .create_action(NewAgentAction {
                chat_session_id: session_id.into(),
                turn_id: "turn-1".into(),
                action_type: "bash".into(),
                action_input: input.clone(),
                step,
            })
            .await
            .unwrap();
        store
            .append_block(
                session_id,
                BlockContent::ToolCall {
                    action_id: action.id.clone(),
                    tool: "bash".into(),
                    input,
                    step,
                },
            )
            .await
            .unwrap();
        if finish {
            store
                .complete_action(&action.id, true, output.into(), metadata)
                .await
                .unwrap();
            store
                .append_block(
                    session_id,
                    BlockContent::ToolResult {
                        action_id: action.id.clone(),
                        tool: "bash".into(),
                        success: true,
                        output: output.into(),
                        step,
                    },
                )
                .await
                .unwrap();
        }
        action.id
    }

    #[tokio::test]
    async fn user_assistant_and_actions() {
        let store = InMemoryStore::new();
        let id = session(&store).await;
        store
            .append_block(&id, BlockContent::UserText { text: "list files".into() })
            .await
            .unwrap();
        for step in 1..=3 {
            record_action(&store, &id, step, "a.txt", None, true).await;
        }
        store
            .append_block(
                &id,
                BlockContent::AssistantText {
                    text: "There is one file.".into(),
                    complete: true,
                },
            )
            .await
            .unwrap();

        let builder = ConversationHistoryBuilder::new(Arc::new(store), "gpt-4o");
        let turns = builder.build(&id).await.unwrap();

        assert_eq!(turns.len(), 2 + 2 * 3);
        assert_eq!(turns[0], Message::user("list files"));
        assert!(turns[1].is_tool_call());
        assert_eq!(turns[2].role, Role::Tool);
        assert_eq!(turns[2].content, TurnContent::Text("[SUCCESS] a.txt".into()));
        assert_eq!(turns[7], Message::assistant("There is one file."));
    }

    #[tokio::test]
    async fn unfinished_actions_are_skipped() {
        let store = InMemoryStore::new();
        let id = session(&store).await;
        store
            .append_block(&id, BlockContent::UserText { text: "go".into() })
            .await
            .unwrap();
        record_action(&store, &id, 1, "", None, false).await;

        let builder = ConversationHistoryBuilder::new(Arc::new(store), "gpt-4o");
        let turns = builder.build(&id).await.unwrap();
        assert_eq!(turns, vec![Message::user("go")]);
    }

    #[tokio::test]
    async fn empty_assistant_text_is_skipped() {
        let store = InMemoryStore::new();
        let id = session(&store).await;
        store
            .append_block(
                &id,
                BlockContent::AssistantText {
                    text: String::new(),
                    complete: false,
                },
            )
            .await
            .unwrap();
        let builder = ConversationHistoryBuilder::new(Arc::new(store), "gpt-4o");
        assert!(builder.build(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn image_results_follow_model_capability() {
        let store = InMemoryStore::new();
        let id = session(&store).await;
        let image = ActionMetadata::Image(ImageAttachment {
            image_data: "data:image/png;base64,iVBORw0KGgo=".into(),
            mime_type: "image/png".into(),
            filename: Some("chart.png".into()),
        });
        record_action(&store, &id, 1, "Successfully read image file", Some(image), true).await;
        let store: Arc<dyn SessionStore> = Arc::new(store);

        let vision = ConversationHistoryBuilder::new(store.clone(), "claude-3-opus")
            .build(&id)
            .await
            .unwrap();
        assert!(matches!(&vision[1].content, TurnContent::Parts(parts) if parts.len() == 2));

        let text_only = ConversationHistoryBuilder::new(store, "gpt-3.5-turbo")
            .build(&id)
            .await
            .unwrap();
        let TurnContent::Text(text) = &text_only[1].content else {
            panic!("expected plain text");
        };
        assert!(text.contains("Image content cannot be analyzed by this model"));
        assert!(!text.contains("iVBORw0KGgo"));
    }
}
