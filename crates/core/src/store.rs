//! SessionStore trait: durable storage of sessions, blocks and actions.
//!
//! Content blocks are append-only. Storage assigns each block the next
//! sequence number for its session, so read-back order always equals
//! write order.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::session::{
    ActionMetadata, AgentAction, BlockContent, ChatSession, ContentBlock, NewAgentAction,
};

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The name of this backend (e.g., "sqlite", "memory").
    fn name(&self) -> &str;

    /// Persist a new session.
    async fn create_session(&self, session: ChatSession) -> Result<ChatSession, StorageError>;

    /// Look up a session by id.
    async fn get_session(&self, id: &str) -> Result<Option<ChatSession>, StorageError>;

    /// Bump `updated_at` to now.
    async fn touch_session(&self, id: &str) -> Result<(), StorageError>;

    /// Append a block, assigning the next sequence number.
    async fn append_block(
        &self,
        session_id: &str,
        content: BlockContent,
    ) -> Result<ContentBlock, StorageError>;

    /// All blocks for a session, in sequence order.
    async fn list_blocks(&self, session_id: &str) -> Result<Vec<ContentBlock>, StorageError>;

    /// Record a dispatched tool call with status `running`.
    async fn create_action(&self, action: NewAgentAction) -> Result<AgentAction, StorageError>;

    /// Move an action to its terminal status.
    async fn complete_action(
        &self,
        id: &str,
        success: bool,
        output: String,
        metadata: Option<ActionMetadata>,
    ) -> Result<AgentAction, StorageError>;

    async fn get_action(&self, id: &str) -> Result<Option<AgentAction>, StorageError>;

    /// All actions for a session, in creation order.
    async fn list_actions(&self, session_id: &str) -> Result<Vec<AgentAction>, StorageError>;
}
