//! The conversation ledger.
//!
//! Index 0 is always the system prompt. Every append is followed by a budget
//! pass: content tokens of all messages are summed and, while the sum exceeds
//! the budget, the message at index 1 is removed. The pass stops once the sum
//! fits or only the system prompt and one other message remain. Evicted
//! messages are gone for good.

use std::fmt;
use std::sync::Arc;

use chatloop_core::message::{Conversation, Message};
use chatloop_core::token::TokenCounter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Token accounting after one budget pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetReport {
    /// Tokens in the content of every message in the ledger
    pub content_tokens: usize,
    /// Tokens in the current turn's reasoning text (never stored)
    pub reasoning_tokens: usize,
    pub total_tokens: usize,
    pub budget: usize,
    /// `total_tokens` as a percentage of `budget`
    pub percent: f64,
    /// Messages removed by this pass
    pub evicted: usize,
}

impl BudgetReport {
    fn new(content_tokens: usize, reasoning_tokens: usize, budget: usize, evicted: usize) -> Self {
        let total_tokens = content_tokens + reasoning_tokens;
        Self {
            content_tokens,
            reasoning_tokens,
            total_tokens,
            budget,
            percent: total_tokens as f64 / budget.max(1) as f64 * 100.0,
            evicted,
        }
    }
}

impl fmt::Display for BudgetReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "context {} + reasoning {} = {} / {} tokens ({:.1}%)",
            self.content_tokens, self.reasoning_tokens, self.total_tokens, self.budget, self.percent
        )?;
        if self.evicted > 0 {
            write!(f, ", evicted {} oldest message(s)", self.evicted)?;
        }
        Ok(())
    }
}

/// A saved ledger state; see [`Ledger::checkpoint`].
#[derive(Debug, Clone)]
pub struct LedgerCheckpoint {
    messages: Vec<Message>,
    updated_at: DateTime<Utc>,
}

/// The token-budgeted message history.
pub struct Ledger {
    conversation: Conversation,
    counter: Arc<dyn TokenCounter>,
    budget: usize,
    turn_reasoning: String,
}

impl Ledger {
    /// Create a ledger holding only the system prompt.
    pub fn new(
        system_prompt: impl Into<String>,
        counter: Arc<dyn TokenCounter>,
        budget: usize,
    ) -> Self {
        Self {
            conversation: Conversation::with_system_prompt(system_prompt),
            counter,
            budget,
            turn_reasoning: String::new(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.conversation.messages
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn len(&self) -> usize {
        self.conversation.len()
    }

    /// Never true: the system prompt is always present.
    pub fn is_empty(&self) -> bool {
        self.conversation.is_empty()
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn system_prompt(&self) -> &str {
        self.conversation
            .messages
            .first()
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    /// Sum of content tokens over every message.
    pub fn content_tokens(&self) -> usize {
        self.conversation
            .messages
            .iter()
            .map(|m| self.counter.count(&m.content))
            .sum()
    }

    pub fn reasoning_tokens(&self) -> usize {
        self.counter.count(&self.turn_reasoning)
    }

    /// Start a new request cycle: the reasoning accumulator is cleared.
    pub fn begin_cycle(&mut self) {
        self.turn_reasoning.clear();
    }

    /// Record reasoning text for the current cycle. It is counted in budget
    /// reports but never stored as a message.
    pub fn note_reasoning(&mut self, text: &str) {
        self.turn_reasoning.push_str(text);
    }

    /// Append messages in order, then run the budget pass.
    pub fn append<I>(&mut self, messages: I) -> BudgetReport
    where
        I: IntoIterator<Item = Message>,
    {
        for message in messages {
            self.conversation.push(message);
        }
        self.enforce_budget()
    }

    fn enforce_budget(&mut self) -> BudgetReport {
        let mut content_tokens = self.content_tokens();
        let mut evicted = 0;

        while content_tokens > self.budget && self.conversation.len() > 2 {
            let removed = self.conversation.remove(1);
            content_tokens -= self.counter.count(&removed.content);
            evicted += 1;
            debug!(
                role = removed.role.as_str(),
                remaining = self.conversation.len(),
                "Evicted oldest message"
            );
        }

        let report = BudgetReport::new(content_tokens, self.reasoning_tokens(), self.budget, evicted);
        info!(
            conversation_id = %self.conversation.id,
            content_tokens = report.content_tokens,
            reasoning_tokens = report.reasoning_tokens,
            total_tokens = report.total_tokens,
            budget = report.budget,
            percent = report.percent,
            evicted = report.evicted,
            "Context budget"
        );
        report
    }

    /// Save the current history so a failed cycle can be rolled back.
    pub fn checkpoint(&self) -> LedgerCheckpoint {
        LedgerCheckpoint {
            messages: self.conversation.messages.clone(),
            updated_at: self.conversation.updated_at,
        }
    }

    /// Roll the history back to `checkpoint`, undoing appends and evictions.
    pub fn restore(&mut self, checkpoint: LedgerCheckpoint) {
        debug!(
            discarded = self.conversation.len() as i64 - checkpoint.messages.len() as i64,
            "Restoring ledger checkpoint"
        );
        self.conversation.messages = checkpoint.messages;
        self.conversation.updated_at = checkpoint.updated_at;
    }
}
