//! LLM Provider implementations for OpenCodex.
//!
//! All providers implement the `opencodex_core::Provider` trait and
//! stream typed fragments.

pub mod factory;
pub mod openai_compat;

pub use factory::{build_from_config, build_named};
pub use openai_compat::{OpenAiCompatProvider, SseDecoder};
