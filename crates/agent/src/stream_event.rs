//! Agent-level streaming events.
//!
//! `AgentStreamEvent` is what the control loop tells its front end: progress
//! ticks while a request is in flight, streamed reply and reasoning text,
//! tool activity, budget reports, and cycle failures. A front end receives
//! them through an [`EventSink`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::context::BudgetReport;

/// Events emitted by the agent loop.
///
/// - `waiting`         — the request is in flight; elapsed time so far
/// - `waiting_cleared` — the progress line should be erased
/// - `chunk`           — partial reply text
/// - `thought`         — reasoning text (dedicated field or `<think>` block)
/// - `tool_call`       — the model requested a tool
/// - `tool_result`     — a tool response was appended
/// - `reply`           — the final reply of a cycle, as stored
/// - `budget`          — token accounting after a ledger append
/// - `error`           — a cycle was aborted or a limit was hit
/// - `done`            — the session ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    Waiting { elapsed_ms: u64 },

    WaitingCleared,

    /// Partial text token from the model.
    Chunk { content: String },

    /// A reasoning fragment.
    Thought { content: String },

    /// The model is calling a tool.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Tool execution completed.
    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    /// The trimmed reply appended to the ledger.
    Reply { content: String },

    Budget { report: BudgetReport },

    Error { message: String },

    /// The session is over.
    Done {
        conversation_id: String,
        cycles: usize,
        tool_calls_made: usize,
    },
}

impl AgentStreamEvent {
    pub fn waiting(elapsed: Duration) -> Self {
        Self::Waiting {
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

/// Where the loop sends its events. Emitting never blocks.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AgentStreamEvent);
}

impl EventSink for mpsc::UnboundedSender<AgentStreamEvent> {
    fn emit(&self, event: AgentStreamEvent) {
        // A front end that has gone away just stops receiving.
        let _ = self.send(event);
    }
}
