//! The streaming agent loop for chatloop.
//!
//! The loop alternates between the user and the model:
//!
//! 1. **Receive** a user message and append it to the ledger
//! 2. **Stream** a request with the whole ledger and the tool descriptors
//! 3. **Demultiplex** deltas: reply text, reasoning, tool calls
//! 4. **If tool responses were appended**: loop back to step 2
//! 5. **Otherwise**: store the trimmed reply and wait for the user
//!
//! The ledger keeps the history inside a token budget, the progress
//! indicator ticks until the first delta arrives, and every cycle runs under
//! a deadline after which it is rolled back.

pub mod context;
pub mod input;
pub mod loop_runner;
pub mod progress;
pub mod stream_event;

#[cfg(test)]
mod test_helpers;

pub use context::{BudgetReport, Ledger, LedgerCheckpoint, estimate_tokens, heuristic_counter};
pub use input::InputSource;
pub use loop_runner::{AgentLoop, LoopState, SessionStats, TurnOutcome};
pub use progress::ProgressIndicator;
pub use stream_event::{AgentStreamEvent, EventSink};
