//! Terminal rendering of agent events.
//!
//! Reply text streams to stdout as it arrives. Reasoning is shown dimmed,
//! tool activity on its own lines, and the progress indicator on a single
//! line that is erased before the first output of a reply.

use std::io::Write;
use std::sync::Mutex;

use chatloop_agent::{AgentStreamEvent, EventSink};

const SPINNER: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const CLEAR_LINE: &str = "\r\x1b[2K";

#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
enum Section {
    #[default]
    Idle,
    Thinking,
    Replying,
}

#[derive(Default)]
struct RenderState {
    section: Section,
    ticks: usize,
    /// A reply was just completed; the next budget report is shown.
    after_reply: bool,
}

/// Writes agent events to the terminal.
pub struct TerminalRenderer {
    state: Mutex<RenderState>,
    show_budget: bool,
}

impl TerminalRenderer {
    pub fn new(show_budget: bool) -> Self {
        Self {
            state: Mutex::new(RenderState::default()),
            show_budget,
        }
    }

    /// Render one event to text without touching the terminal.
    fn render(&self, state: &mut RenderState, event: &AgentStreamEvent) -> String {
        let mut out = String::new();
        match event {
            AgentStreamEvent::Waiting { elapsed_ms } => {
                let frame = SPINNER[state.ticks % SPINNER.len()];
                state.ticks += 1;
                out.push_str(&format!("{CLEAR_LINE}  {frame} waiting {}", format_elapsed(*elapsed_ms)));
            }
            AgentStreamEvent::WaitingCleared => {
                state.ticks = 0;
                out.push_str(CLEAR_LINE);
            }
            AgentStreamEvent::Thought { content } => {
                if state.section != Section::Thinking {
                    out.push_str(&format!("\n  {DIM}(thinking) "));
                    state.section = Section::Thinking;
                } else {
                    out.push_str(DIM);
                }
                out.push_str(content);
                out.push_str(RESET);
            }
            AgentStreamEvent::Chunk { content } => {
                if state.section != Section::Replying {
                    out.push_str("\n  Assistant > ");
                    state.section = Section::Replying;
                }
                out.push_str(content);
            }
            AgentStreamEvent::ToolCall { name, input, .. } => {
                state.section = Section::Idle;
                out.push_str(&format!("\n  → {name}({input})\n"));
            }
            AgentStreamEvent::ToolResult { name, success, .. } => {
                let status = if *success { "ok" } else { "failed" };
                out.push_str(&format!("  ← {name}: {status}\n"));
            }
            AgentStreamEvent::Reply { .. } => {
                state.section = Section::Idle;
                state.after_reply = true;
                out.push_str("\n\n");
            }
            AgentStreamEvent::Budget { report } => {
                // Evictions are shown regardless of `show_budget`.
                if report.evicted > 0 {
                    out.push_str(&format!("{CLEAR_LINE}  [Context trimmed] {report}\n"));
                } else if self.show_budget && state.after_reply {
                    out.push_str(&format!("  {DIM}[{report}]{RESET}\n\n"));
                }
                state.after_reply = false;
            }
            AgentStreamEvent::Error { message } => {
                state.section = Section::Idle;
                out.push_str(&format!("\n  [Error] {message}\n\n"));
            }
            AgentStreamEvent::Done { .. } => {
                out.push_str("\n  Goodbye!\n\n");
            }
        }
        out
    }
}

impl EventSink for TerminalRenderer {
    fn emit(&self, event: AgentStreamEvent) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let text = self.render(&mut state, &event);
        if text.is_empty() {
            return;
        }
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }
}

/// `1.2s` below a minute, `1m05s` above.
pub fn format_elapsed(elapsed_ms: u64) -> String {
    let secs = elapsed_ms / 1000;
    if secs < 60 {
        format!("{}.{}s", secs, (elapsed_ms % 1000) / 100)
    } else {
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}
