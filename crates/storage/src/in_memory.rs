//! In-memory store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chrono::Utc;
use opencodex_core::error::StorageError;
use opencodex_core::session::{
    ActionMetadata, ActionOutput, ActionStatus, AgentAction, BlockContent, ChatSession,
    ContentBlock, NewAgentAction,
};
use opencodex_core::store::SessionStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    sessions: HashMap<String, ChatSession>,
    blocks: HashMap<String, Vec<ContentBlock>>,
    actions: Vec<AgentAction>,
}

/// A store that keeps everything in process memory.
///
/// A single lock guards all tables, so sequence assignment is atomic.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_session(&self, session: ChatSession) -> Result<ChatSession, StorageError> {
        let mut state = self.state.write().await;
        state.blocks.entry(session.id.clone()).or_default();
        state.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Result<Option<ChatSession>, StorageError> {
        Ok(self.state.read().await.sessions.get(id).cloned())
    }

    async fn touch_session(&self, id: &str) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(id)
            .ok_or_else(|| StorageError::SessionNotFound(id.to_string()))?;
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn append_block(
        &self,
        session_id: &str,
        content: BlockContent,
    ) -> Result<ContentBlock, StorageError> {
        let mut state = self.state.write().await;
        if !state.sessions.contains_key(session_id) {
            return Err(StorageError::SessionNotFound(session_id.to_string()));
        }
        let blocks = state.blocks.entry(session_id.to_string()).or_default();
        let block = ContentBlock {
            id: Uuid::new_v4().to_string(),
            chat_session_id: session_id.to_string(),
            sequence_number: blocks.last().map_or(1, |b| b.sequence_number + 1),
            content,
            created_at: Utc::now(),
        };
        blocks.push(block.clone());
        Ok(block)
    }

    async fn list_blocks(&self, session_id: &str) -> Result<Vec<ContentBlock>, StorageError> {
        Ok(self
            .state
            .read()
            .await
            .blocks
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_action(&self, action: NewAgentAction) -> Result<AgentAction, StorageError> {
        let mut state = self.state.write().await;
        if !state.sessions.contains_key(&action.chat_session_id) {
            return Err(StorageError::SessionNotFound(action.chat_session_id));
        }
        let action = AgentAction {
            id: Uuid::new_v4().to_string(),
            chat_session_id: action.chat_session_id,
            turn_id: action.turn_id,
            action_type: action.action_type,
            action_input: action.action_input,
            action_output: None,
            action_metadata: None,
            status: ActionStatus::Running,
            step: action.step,
            created_at: Utc::now(),
        };
        state.actions.push(action.clone());
        Ok(action)
    }

    async fn complete_action(
        &self,
        id: &str,
        success: bool,
        output: String,
        metadata: Option<ActionMetadata>,
    ) -> Result<AgentAction, StorageError> {
        let mut state = self.state.write().await;
        let action = state
            .actions
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| StorageError::ActionNotFound(id.to_string()))?;
        action.status = if success {
            ActionStatus::Success
        } else {
            ActionStatus::Failed
        };
        action.action_output = Some(ActionOutput {
            success,
            result: output,
        });
        action.action_metadata = metadata;
        Ok(action.clone())
    }

    async fn get_action(&self, id: &str) -> Result<Option<AgentAction>, StorageError> {
        Ok(self
            .state
            .read()
            .await
            .actions
            .iter()
            .find(|a| a.id == id)
            .cloned())
    }

    async fn list_actions(&self, session_id: &str) -> Result<Vec<AgentAction>, StorageError> {
        Ok(self
            .state
            .read()
            .await
            .actions
            .iter()
            .filter(|a| a.chat_session_id == session_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_assigns_dense_sequence() {
        let store = InMemoryStore::new();
        let session = store
            .create_session(ChatSession::new("p1", "test"))
            .await
            .unwrap();

        for i in 0..5 {
            let block = store
                .append_block(
                    &session.id,
                    BlockContent::UserText {
                        text: format!("msg {i}"),
                    },
                )
                .await
                .unwrap();
            assert_eq!(block.sequence_number, i + 1);
        }

        let seqs: Vec<i64> = store
            .list_blocks(&session.id)
            .await
            .unwrap()
            .iter()
            .map(|b| b.sequence_number)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn append_to_unknown_session_fails() {
        let store = InMemoryStore::new();
        let err = store
            .append_block("missing", BlockContent::UserText { text: "x".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn action_lifecycle() {
        let store = InMemoryStore::new();
        let session = store
            .create_session(ChatSession::new("p1", "test"))
            .await
            .unwrap();
        let action = store
            .create_action(NewAgentAction {
                chat_session_id: session.id.clone(),
                turn_id: "t1".into(),
                action_type: "bash".into(),
                action_input: serde_json::json!({"command": "ls"}),
                step: 1,
            })
            .await
            .unwrap();
        assert_eq!(action.status, ActionStatus::Running);

        let done = store
            .complete_action(&action.id, false, "exit 1".into(), None)
            .await
            .unwrap();
        assert_eq!(done.status, ActionStatus::Failed);
        assert_eq!(done.result(), Some((false, "exit 1")));
        assert_eq!(store.list_actions(&session.id).await.unwrap().len(), 1);
    }
}
