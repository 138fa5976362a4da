//! Token counting interface.
//!
//! The conversation ledger only needs an integer count per text; how that
//! count is produced (a real tokenizer, a heuristic) is up to the caller.

/// Counts tokens in a piece of text. Must be pure: the same text always
/// yields the same count.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

impl<F> TokenCounter for F
where
    F: Fn(&str) -> usize + Send + Sync,
{
    fn count(&self, text: &str) -> usize {
        self(text)
    }
}
