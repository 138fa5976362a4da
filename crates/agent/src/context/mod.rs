//! Conversation context: the token-budgeted ledger and token estimation.
//!
//! The ledger owns the message history sent with every request. After each
//! append it counts content tokens and evicts the oldest non-system message
//! until the history fits the budget again.

pub mod ledger;
pub mod token;

pub use ledger::{BudgetReport, Ledger, LedgerCheckpoint};
pub use token::{estimate_tokens, heuristic_counter};
