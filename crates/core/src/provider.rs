//! Provider trait — the abstraction over streaming chat endpoints.
//!
//! A Provider knows how to send a conversation to a model and hand back a
//! [`DeltaStream`]: a lazy, finite, non-restartable sequence of
//! [`StreamDelta`] values fed by a background producer through a bounded
//! channel.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::message::Message;
use crate::tool::{ToolCall, ToolDescriptor};

/// Everything needed to issue one streaming chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The model to use (e.g., "llama3.1", "gpt-4o")
    pub model: String,

    /// The conversation messages, system prompt first
    pub messages: Vec<Message>,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,

    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDescriptor>,
}

/// Token usage information reported by the endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One decoded event of a streamed reply.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    /// Visible reply text.
    ContentChunk(String),
    /// Text from a dedicated reasoning channel.
    ReasoningChunk(String),
    /// A complete tool call with parsed arguments.
    ToolCallChunk(ToolCall),
    /// The model finished; carries the finish reason ("stop", "tool_calls", ...).
    Finish(String),
}

/// Why a delta stream stopped producing.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEnd {
    /// A `data: [DONE]` marker was read.
    Done,
    /// The body closed without a `[DONE]` marker.
    BodyClosed,
    /// The consumer dropped the stream before the body was exhausted.
    ConsumerGone,
    /// The lifetime token was cancelled.
    Cancelled,
    /// A frame could not be decoded.
    Malformed(String),
    /// Reading the body failed.
    Transport(String),
}

impl StreamEnd {
    /// The fault behind an unclean end, if any.
    pub fn into_error(self) -> Option<ProviderError> {
        match self {
            StreamEnd::Done | StreamEnd::BodyClosed | StreamEnd::ConsumerGone => None,
            StreamEnd::Cancelled => Some(ProviderError::Cancelled),
            StreamEnd::Malformed(reason) => Some(ProviderError::MalformedFrame(reason)),
            StreamEnd::Transport(reason) => Some(ProviderError::StreamInterrupted(reason)),
        }
    }
}

/// Producer half of a [`DeltaStream`].
pub struct DeltaSender {
    tx: mpsc::Sender<StreamDelta>,
    end: oneshot::Sender<StreamEnd>,
}

impl DeltaSender {
    /// Publish one delta, waiting for channel capacity.
    ///
    /// Returns `Err(end)` when the value was abandoned: the token was
    /// cancelled while the value was pending, or the consumer is gone.
    pub async fn send(&self, delta: StreamDelta, cancel: &CancellationToken) -> Result<(), StreamEnd> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StreamEnd::Cancelled),
            sent = self.tx.send(delta) => sent.map_err(|_| StreamEnd::ConsumerGone),
        }
    }

    /// Close the stream, recording why it ended.
    pub fn finish(self, end: StreamEnd) {
        let DeltaSender { tx, end: end_tx } = self;
        drop(tx);
        let _ = end_tx.send(end);
    }
}

/// Consumer half: the lazy sequence of deltas for one request.
pub struct DeltaStream {
    rx: mpsc::Receiver<StreamDelta>,
    end: oneshot::Receiver<StreamEnd>,
}

impl DeltaStream {
    /// Create a connected sender/stream pair with the given channel capacity.
    pub fn channel(capacity: usize) -> (DeltaSender, DeltaStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (end_tx, end_rx) = oneshot::channel();
        (
            DeltaSender { tx, end: end_tx },
            DeltaStream { rx, end: end_rx },
        )
    }

    /// A stream that replays `deltas` then ends with `end`.
    pub fn from_deltas(deltas: Vec<StreamDelta>, end: StreamEnd) -> DeltaStream {
        let (tx, rx) = mpsc::channel(deltas.len().max(1));
        for delta in deltas {
            // Capacity covers every delta.
            let _ = tx.try_send(delta);
        }
        let (end_tx, end_rx) = oneshot::channel();
        let _ = end_tx.send(end);
        DeltaStream { rx, end: end_rx }
    }

    /// Wait for the next delta. `None` once the producer has stopped.
    pub async fn next(&mut self) -> Option<StreamDelta> {
        self.rx.recv().await
    }

    /// Stop consuming and report why the producer ended.
    ///
    /// Dropping the receiver first unblocks a producer waiting on capacity.
    pub async fn finish(self) -> StreamEnd {
        let DeltaStream { rx, end } = self;
        drop(rx);
        end.await
            .unwrap_or_else(|_| StreamEnd::Transport("stream producer exited without reporting".into()))
    }
}

/// The core Provider trait.
///
/// The agent loop calls `stream()` without knowing which endpoint is behind
/// it. Implementations must observe `cancel` both while connecting and while
/// producing deltas.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider.
    fn name(&self) -> &str;

    /// Send a request and get the reply as a stream of deltas.
    async fn stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<DeltaStream, ProviderError>;
}
