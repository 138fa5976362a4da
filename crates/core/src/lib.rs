//! # chatloop core
//!
//! Domain types, traits, and error definitions for the chatloop streaming
//! agent. This crate has no transport or UI dependencies — it defines the
//! model that the provider, tool and agent crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the agent loop is a trait here:
//! - [`Provider`] — streams a chat reply as typed deltas
//! - [`Tool`] — a callable the model may invoke, dispatched by [`ToolRegistry`]
//! - [`TokenCounter`] — text → token count for context budgeting
//!
//! Implementations live in their respective crates, which keeps the agent
//! loop testable with scripted stand-ins.

pub mod error;
pub mod message;
pub mod provider;
pub mod token;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ProviderError, ToolError};
pub use message::{Conversation, ConversationId, Message, Role};
pub use provider::{ChatRequest, DeltaSender, DeltaStream, Provider, StreamDelta, StreamEnd, Usage};
pub use token::TokenCounter;
pub use tool::{
    Tool, ToolArguments, ToolCall, ToolContext, ToolDescriptor, ToolOutput, ToolRegistry,
    ToolResponse, ToolStatus,
};

// Re-exported so downstream crates name one token type.
pub use tokio_util::sync::CancellationToken;
