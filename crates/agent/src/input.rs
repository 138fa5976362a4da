//! Where user turns come from.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// A source of user input lines. `None` means end of input and ends the
/// session.
#[async_trait]
pub trait InputSource: Send {
    async fn next_input(&mut self) -> Option<String>;
}

#[async_trait]
impl InputSource for mpsc::Receiver<String> {
    async fn next_input(&mut self) -> Option<String> {
        self.recv().await
    }
}

/// A fixed script of inputs, consumed front to back.
#[async_trait]
impl InputSource for VecDeque<String> {
    async fn next_input(&mut self) -> Option<String> {
        self.pop_front()
    }
}
