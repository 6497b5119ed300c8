//! The ReAct agent runtime for OpenCodex.
//!
//! A run follows a **Reason → Act → Observe** cycle:
//!
//! 1. **Stream** a model reply for the current history
//! 2. **Reassemble** tool calls from their streamed fragments
//! 3. **Act** on the lowest-index call through the tool registry
//! 4. **Observe**: append the call and its rendered result, loop back to 1
//!
//! The loop ends when the model replies without a tool call, when the step
//! budget runs out, or when the caller cancels. Every step is reported as
//! an ordered stream of [`StreamEvent`]s.
//!
//! [`ConversationHistoryBuilder`] turns a persisted session back into the
//! turn list the model saw, and [`VisionContentBuilder`] decides how tool
//! results carrying images are shown to a given model.

pub mod delta;
pub mod history;
pub mod react;
pub mod stream_event;
pub mod vision;

#[cfg(any(test, feature = "test-util"))]
pub mod test_helpers;

pub use delta::{AssembledTurn, AssemblerOutput, CompletedCall, DeltaAssembler};
pub use history::ConversationHistoryBuilder;
pub use react::{AgentRun, ReactAgent, RunOutcome, RunState};
pub use stream_event::{EndReason, StreamEvent};
pub use vision::{VISION_TABLE_VERSION, VisionContentBuilder, supports_vision};
