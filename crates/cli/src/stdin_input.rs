//! Terminal input for interactive chat.
//!
//! Lines are read on a dedicated thread with blocking IO; a blocked read on
//! the runtime's stdin would keep the runtime from shutting down on Ctrl+C.

use std::io::{BufRead, Write};

use async_trait::async_trait;
use chatloop_agent::InputSource;
use tokio::sync::mpsc;

const PROMPT: &str = "  You > ";

/// Reads user turns from stdin, printing a prompt before each one.
pub struct StdinInput {
    rx: mpsc::Receiver<String>,
}

impl StdinInput {
    /// Start the reader thread.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(8);

        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                let line = line.trim().to_string();
                if is_exit_command(&line) {
                    break;
                }
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });

        Self { rx }
    }
}

#[async_trait]
impl InputSource for StdinInput {
    async fn next_input(&mut self) -> Option<String> {
        print!("{PROMPT}");
        let _ = std::io::stdout().flush();
        self.rx.recv().await
    }
}

/// Words that end an interactive session.
pub fn is_exit_command(line: &str) -> bool {
    matches!(line, "exit" | "quit" | "/exit" | "/quit" | ":q")
}
