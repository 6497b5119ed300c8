//! # OpenCodex Core
//!
//! Domain types, traits, and error definitions for the OpenCodex agent runtime.
//! This crate has **zero framework dependencies**: it defines the domain model
//! that all other crates implement against.
//!
//! Every collaborator (LLM provider, tool, session store, sandbox) is a trait
//! here. Implementations live in their respective crates.

pub mod error;
pub mod message;
pub mod provider;
pub mod sandbox;
pub mod session;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, SandboxError, StorageError, ToolError};
pub use message::{ContentPart, FunctionCall, ImageUrl, Message, Role, TurnContent};
pub use provider::{
    FragmentStream, Provider, ProviderRequest, StreamFragment, ToolCallFragment, ToolDefinition,
};
pub use sandbox::{CommandOutput, Sandbox};
pub use session::{
    ActionMetadata, ActionOutput, ActionStatus, AgentAction, BlockContent, BlockKind, ChatSession,
    ContentBlock, ImageAttachment, NewAgentAction,
};
pub use store::SessionStore;
pub use tool::{Tool, ToolRegistry, ToolResult};
