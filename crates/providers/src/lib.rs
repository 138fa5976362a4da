//! Streaming chat providers for chatloop.
//!
//! All providers implement the `chatloop_core::Provider` trait. The
//! [`sse`] module turns a raw event-stream body into typed deltas and is
//! shared by every HTTP provider.

pub mod openai_compat;
pub mod sse;

pub use openai_compat::OpenAiCompatProvider;
