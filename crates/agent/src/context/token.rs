//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. This is close
//! enough for BPE tokenizers on English text and keeps budgeting independent
//! of any particular model's vocabulary.

use std::sync::Arc;

use chatloop_core::token::TokenCounter;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 bytes. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// The default counter handed to the ledger.
pub fn heuristic_counter() -> Arc<dyn TokenCounter> {
    Arc::new(estimate_tokens)
}
