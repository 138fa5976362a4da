//! The agent control loop.
//!
//! States: `AwaitingUser → RequestInFlight → StreamingResponse`, then either
//! back to `AwaitingUser` with a reply, or through `DispatchingTools` straight
//! into the next `RequestInFlight` when the cycle produced tool responses.
//! End of input moves to `Done`.
//!
//! Every request cycle runs under a child of the session token that is also
//! cancelled when the request timeout elapses. A cycle that fails for any
//! reason (request error, broken stream, deadline, cancellation) leaves the
//! ledger exactly as it was when the cycle started.

use std::sync::Arc;
use std::time::Duration;

use chatloop_config::{AppConfig, SamplingConfig};
use chatloop_core::CancellationToken;
use chatloop_core::error::ProviderError;
use chatloop_core::message::Message;
use chatloop_core::provider::{ChatRequest, Provider, StreamDelta};
use chatloop_core::token::TokenCounter;
use chatloop_core::tool::{ToolCall, ToolDescriptor, ToolRegistry};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::{Ledger, heuristic_counter};
use crate::input::InputSource;
use crate::progress::ProgressIndicator;
use crate::stream_event::{AgentStreamEvent, EventSink};

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Where the loop is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingUser,
    RequestInFlight,
    StreamingResponse,
    DispatchingTools,
    Done,
}

/// How a user turn ended.
#[derive(Debug)]
pub enum TurnOutcome {
    /// The model answered. `None` when the reply was empty after trimming.
    Replied(Option<String>),
    /// The model kept calling tools past the round limit.
    ToolRoundLimit,
    /// A cycle failed; the ledger was rolled back to the cycle start.
    Aborted(ProviderError),
}

/// Counters over a whole session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub turns: usize,
    pub cycles: usize,
    pub tool_calls: usize,
    pub aborted_cycles: usize,
}

enum CycleOutcome {
    Replied(Option<String>),
    ToolsDispatched(usize),
}

/// The streaming agent loop.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    tool_descriptors: Vec<ToolDescriptor>,
    sink: Arc<dyn EventSink>,
    ledger: Ledger,
    model: String,
    sampling: SamplingConfig,
    request_timeout: Duration,
    progress_interval: Duration,
    max_tool_rounds: u32,
    state: LoopState,
    stats: SessionStats,
}

impl AgentLoop {
    /// Create a loop from resolved configuration. The ledger starts with the
    /// configured system prompt and the heuristic token counter.
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        sink: Arc<dyn EventSink>,
        config: &AppConfig,
    ) -> Self {
        let tool_descriptors = tools.descriptors();
        Self {
            provider,
            tools,
            tool_descriptors,
            sink,
            ledger: Ledger::new(
                config.system_prompt.clone(),
                heuristic_counter(),
                config.context_window_budget,
            ),
            model: config.model.clone(),
            sampling: config.sampling.clone(),
            request_timeout: config.request_timeout(),
            progress_interval: config.progress_interval(),
            max_tool_rounds: config.max_tool_rounds,
            state: LoopState::AwaitingUser,
            stats: SessionStats::default(),
        }
    }

    /// Replace the token counter. Resets the ledger to the system prompt.
    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.ledger = Ledger::new(
            self.ledger.system_prompt().to_string(),
            counter,
            self.ledger.budget(),
        );
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Set the maximum number of consecutive tool rounds per user turn.
    pub fn with_max_tool_rounds(mut self, max: u32) -> Self {
        self.max_tool_rounds = max;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    fn transition(&mut self, next: LoopState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "State transition");
            self.state = next;
        }
    }

    /// Run a whole session: read user turns from `input` until it ends or
    /// `cancel` fires.
    pub async fn run(&mut self, input: &mut dyn InputSource, cancel: &CancellationToken) -> SessionStats {
        info!(
            conversation_id = %self.ledger.conversation().id,
            provider = self.provider.name(),
            model = %self.model,
            tools = self.tool_descriptors.len(),
            "Session started"
        );

        loop {
            self.transition(LoopState::AwaitingUser);
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                line = input.next_input() => line,
            };
            let Some(line) = next else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let outcome = self.submit(line, cancel).await;
            debug!(?outcome, "Turn finished");
            if cancel.is_cancelled() {
                break;
            }
        }

        self.transition(LoopState::Done);
        self.sink.emit(AgentStreamEvent::Done {
            conversation_id: self.ledger.conversation().id.to_string(),
            cycles: self.stats.cycles,
            tool_calls_made: self.stats.tool_calls,
        });
        info!(
            turns = self.stats.turns,
            cycles = self.stats.cycles,
            tool_calls = self.stats.tool_calls,
            aborted = self.stats.aborted_cycles,
            "Session ended"
        );
        self.stats
    }

    /// Process one user turn: append the message, then run request cycles
    /// until the model answers, a cycle fails, or the tool round limit hits.
    pub async fn submit(&mut self, text: impl Into<String>, cancel: &CancellationToken) -> TurnOutcome {
        self.stats.turns += 1;
        let report = self.ledger.append([Message::user(text)]);
        self.sink.emit(AgentStreamEvent::Budget { report });

        let mut rounds = 0u32;
        loop {
            self.transition(LoopState::RequestInFlight);
            self.stats.cycles += 1;

            match self.run_cycle(cancel).await {
                Ok(CycleOutcome::Replied(reply)) => {
                    self.transition(LoopState::AwaitingUser);
                    return TurnOutcome::Replied(reply);
                }
                Ok(CycleOutcome::ToolsDispatched(responses)) => {
                    self.transition(LoopState::DispatchingTools);
                    rounds += 1;
                    debug!(round = rounds, responses, "Tool round complete");

                    if rounds >= self.max_tool_rounds {
                        warn!(rounds, "Max tool rounds reached, waiting for user input");
                        self.sink.emit(AgentStreamEvent::Error {
                            message: format!("stopped after {rounds} consecutive tool rounds"),
                        });
                        self.transition(LoopState::AwaitingUser);
                        return TurnOutcome::ToolRoundLimit;
                    }
                }
                Err(e) => {
                    self.stats.aborted_cycles += 1;
                    self.sink.emit(AgentStreamEvent::Error {
                        message: e.to_string(),
                    });
                    self.transition(LoopState::AwaitingUser);
                    return TurnOutcome::Aborted(e);
                }
            }
        }
    }

    /// One request cycle, with its deadline, indicator and rollback.
    async fn run_cycle(&mut self, session: &CancellationToken) -> Result<CycleOutcome, ProviderError> {
        let checkpoint = self.ledger.checkpoint();
        self.ledger.begin_cycle();

        let cycle = session.child_token();
        let deadline = spawn_deadline(cycle.clone(), self.request_timeout);
        let mut indicator = Some(ProgressIndicator::start(
            self.sink.clone(),
            self.progress_interval,
            &cycle,
        ));

        let result = self.stream_cycle(&cycle, &mut indicator).await;

        if let Some(indicator) = indicator.take() {
            indicator.stop().await;
        }
        // Stops the deadline timer and any producer still reading the body.
        cycle.cancel();
        let _ = deadline.await;

        result.map_err(|e| {
            let e = match e {
                ProviderError::Cancelled if !session.is_cancelled() => {
                    ProviderError::Timeout(self.request_timeout)
                }
                other => other,
            };
            warn!(error = %e, "Request cycle aborted, restoring ledger");
            self.ledger.restore(checkpoint);
            e
        })
    }

    async fn stream_cycle(
        &mut self,
        cycle: &CancellationToken,
        indicator: &mut Option<ProgressIndicator>,
    ) -> Result<CycleOutcome, ProviderError> {
        let request = self.build_request();
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Issuing streaming request"
        );

        let mut stream = tokio::select! {
            biased;
            _ = cycle.cancelled() => return Err(ProviderError::Cancelled),
            result = self.provider.stream(request, cycle.clone()) => result?,
        };

        let mut reply = String::new();
        let mut inline_reasoning = false;
        let mut tool_responses = 0usize;
        let mut finish_reason = None;

        loop {
            let delta = tokio::select! {
                biased;
                _ = cycle.cancelled() => return Err(ProviderError::Cancelled),
                delta = stream.next() => delta,
            };
            let Some(delta) = delta else {
                break;
            };

            if let Some(indicator) = indicator.take() {
                indicator.stop().await;
                self.transition(LoopState::StreamingResponse);
            }

            match delta {
                StreamDelta::ContentChunk(text) => {
                    if text == THINK_OPEN {
                        inline_reasoning = true;
                    } else if text == THINK_CLOSE {
                        inline_reasoning = false;
                    } else if inline_reasoning {
                        self.record_reasoning(text);
                    } else {
                        reply.push_str(&text);
                        self.sink.emit(AgentStreamEvent::Chunk { content: text });
                    }
                }
                StreamDelta::ReasoningChunk(text) => self.record_reasoning(text),
                StreamDelta::ToolCallChunk(call) => {
                    if self.dispatch(&call, cycle).await {
                        tool_responses += 1;
                    }
                    if cycle.is_cancelled() {
                        return Err(ProviderError::Cancelled);
                    }
                }
                StreamDelta::Finish(reason) => {
                    finish_reason = Some(reason);
                    break;
                }
            }
        }

        match finish_reason {
            Some(reason) => debug!(reason = %reason, "Stream finished"),
            None => {
                let end = stream.finish().await;
                debug!(?end, "Stream ended without a finish reason");
                if let Some(e) = end.into_error() {
                    return Err(e);
                }
            }
        }

        if tool_responses > 0 {
            // Text streamed alongside tool calls is not kept.
            return Ok(CycleOutcome::ToolsDispatched(tool_responses));
        }

        let reply = reply.trim();
        if reply.is_empty() {
            debug!("Empty reply, nothing appended");
            return Ok(CycleOutcome::Replied(None));
        }

        let report = self.ledger.append([Message::assistant(reply)]);
        self.sink.emit(AgentStreamEvent::Reply {
            content: reply.to_string(),
        });
        self.sink.emit(AgentStreamEvent::Budget { report });
        Ok(CycleOutcome::Replied(Some(reply.to_string())))
    }

    /// Dispatch one call. Returns whether a response was appended.
    async fn dispatch(&mut self, call: &ToolCall, cycle: &CancellationToken) -> bool {
        if self.tools.contains(&call.name) {
            self.sink.emit(AgentStreamEvent::ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                input: serde_json::Value::Object(call.arguments.clone()),
            });
        }

        let Some(response) = self.tools.dispatch(call, cycle).await else {
            return false;
        };

        self.stats.tool_calls += 1;
        self.sink.emit(AgentStreamEvent::ToolResult {
            id: call.id.clone(),
            name: call.name.clone(),
            output: response.body(),
            success: response.is_success(),
        });

        let report = self
            .ledger
            .append([Message::tool_call_summary(call), response.to_message()]);
        self.sink.emit(AgentStreamEvent::Budget { report });
        true
    }

    fn record_reasoning(&mut self, text: String) {
        self.ledger.note_reasoning(&text);
        self.sink.emit(AgentStreamEvent::Thought { content: text });
    }

    fn build_request(&self) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: self.ledger.messages().to_vec(),
            max_tokens: self.sampling.max_tokens,
            temperature: self.sampling.temperature,
            top_p: self.sampling.top_p,
            top_k: self.sampling.top_k,
            tools: self.tool_descriptors.clone(),
        }
    }
}

/// Cancel `cycle` once `timeout` elapses, unless it is cancelled first.
fn spawn_deadline(cycle: CancellationToken, timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cycle.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Request deadline expired");
                cycle.cancel();
            }
        }
    })
}
