//! Server-Sent-Events frame decoder.
//!
//! Turns a chat-completions response body into a [`DeltaStream`]. The body is
//! read by a background task that splits it into lines, decodes each
//! `data: {...}` frame and publishes typed deltas into a bounded channel, so a
//! slow consumer stalls the read instead of growing a buffer.
//!
//! Framing rules:
//! - `data: <json>` carries one frame
//! - `data: [DONE]` ends the stream
//! - blank lines, comments (`: keep-alive`) and any other line are skipped
//!
//! A frame that fails to decode ends the stream; the consumer sees the
//! sequence stop and can read the reason from [`DeltaStream::finish`].

use std::collections::BTreeMap;

use bytes::Bytes;
use chatloop_core::provider::{DeltaSender, DeltaStream, StreamDelta, StreamEnd, Usage};
use chatloop_core::tool::{ToolArguments, ToolCall};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Capacity of the hand-off channel between the reader task and the consumer.
pub const DELTA_CHANNEL_CAPACITY: usize = 16;

/// Longest line accepted before the stream is treated as malformed.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

const DATA_PREFIX: &str = "data: ";
const DONE_MARKER: &str = "[DONE]";

/// Spawn the reader task for `body` and return the consumer end.
///
/// The task owns the body; it is dropped, releasing the connection, when the
/// task returns on any path.
pub fn decode<S, E>(body: S, cancel: CancellationToken) -> DeltaStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let (tx, stream) = DeltaStream::channel(DELTA_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let end = pump(body, &tx, &cancel).await;
        debug!(?end, "SSE stream closed");
        tx.finish(end);
    });
    stream
}

async fn pump<S, E>(body: S, tx: &DeltaSender, cancel: &CancellationToken) -> StreamEnd
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let mut body = std::pin::pin!(body);
    let mut lines = LineBuffer::default();
    let mut frames = FrameDecoder::default();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamEnd::Cancelled,
            chunk = body.next() => chunk,
        };

        let bytes = match chunk {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                warn!(error = %e, "SSE body read failed");
                return StreamEnd::Transport(e.to_string());
            }
            None => {
                // A last line without a trailing newline still counts.
                if let Some(line) = lines.take_remainder() {
                    match decode_and_publish(&mut frames, &line, tx, cancel).await {
                        Ok(true) => return StreamEnd::Done,
                        Ok(false) => {}
                        Err(end) => return end,
                    }
                }
                return match publish_all(frames.finish(), tx, cancel).await {
                    Ok(()) => StreamEnd::BodyClosed,
                    Err(end) => end,
                };
            }
        };

        lines.extend(&bytes);
        while let Some(line) = lines.next_line() {
            match decode_and_publish(&mut frames, &line, tx, cancel).await {
                Ok(true) => return StreamEnd::Done,
                Ok(false) => {}
                Err(end) => return end,
            }
        }
        if lines.pending() > MAX_LINE_BYTES {
            warn!(pending = lines.pending(), "SSE line exceeds the length limit");
            return StreamEnd::Malformed(format!("line longer than {MAX_LINE_BYTES} bytes"));
        }
    }
}

/// Decode one raw line and publish what it yields. `Ok(true)` means `[DONE]`
/// was reached and everything pending has been published.
async fn decode_and_publish(
    frames: &mut FrameDecoder,
    line: &[u8],
    tx: &DeltaSender,
    cancel: &CancellationToken,
) -> Result<bool, StreamEnd> {
    let line = match std::str::from_utf8(line) {
        Ok(line) => line,
        Err(e) => {
            warn!(error = %e, "SSE line is not valid UTF-8");
            return Err(StreamEnd::Malformed(format!("invalid UTF-8 in stream: {e}")));
        }
    };

    match frames.feed_line(line) {
        Ok(Frame::Skip) => Ok(false),
        Ok(Frame::Deltas(deltas)) => publish_all(Ok(deltas), tx, cancel).await.map(|_| false),
        Ok(Frame::Done) => publish_all(frames.finish(), tx, cancel).await.map(|_| true),
        Err(reason) => {
            warn!(reason = %reason, "Terminating stream on undecodable frame");
            Err(StreamEnd::Malformed(reason))
        }
    }
}

async fn publish_all(
    deltas: Result<Vec<StreamDelta>, String>,
    tx: &DeltaSender,
    cancel: &CancellationToken,
) -> Result<(), StreamEnd> {
    let deltas = deltas.map_err(|reason| {
        warn!(reason = %reason, "Terminating stream on undecodable tool call");
        StreamEnd::Malformed(reason)
    })?;
    for delta in deltas {
        tx.send(delta, cancel).await?;
    }
    Ok(())
}

/// Splits raw body bytes into lines. Bytes are buffered until a newline
/// arrives, so multi-byte characters split across chunks survive.
#[derive(Default)]
pub(crate) struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// The next complete line, without its `\n` or `\r\n` terminator.
    pub(crate) fn next_line(&mut self) -> Option<Vec<u8>> {
        let end = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }

    /// Bytes buffered for the line still being read.
    pub(crate) fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Whatever is left once the body has closed.
    pub(crate) fn take_remainder(&mut self) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.buffer);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }
}

/// What one line of the body amounts to.
#[derive(Debug, PartialEq)]
pub(crate) enum Frame {
    Skip,
    Deltas(Vec<StreamDelta>),
    Done,
}

/// Decodes frames and stitches incremental tool-call fragments together.
///
/// Tool calls are announced piecewise (id and name first, then argument
/// fragments keyed by index); they are emitted whole, in index order, when a
/// finish reason arrives or the stream ends.
#[derive(Default)]
pub(crate) struct FrameDecoder {
    pending_calls: BTreeMap<u32, ToolCallAccumulator>,
}

impl FrameDecoder {
    pub(crate) fn feed_line(&mut self, line: &str) -> Result<Frame, String> {
        let Some(data) = line.strip_prefix(DATA_PREFIX) else {
            if !line.is_empty() {
                trace!(line = %line, "Ignoring non-data SSE line");
            }
            return Ok(Frame::Skip);
        };

        let data = data.trim();
        if data == DONE_MARKER {
            return Ok(Frame::Done);
        }
        if data.is_empty() {
            return Ok(Frame::Skip);
        }

        trace!(data = %data, "SSE frame");
        let envelope: StreamResponse =
            serde_json::from_str(data).map_err(|e| format!("invalid frame JSON: {e}"))?;

        if let Some(usage) = &envelope.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "Endpoint reported usage"
            );
        }

        let mut deltas = Vec::new();
        for choice in envelope.choices {
            let delta = choice.delta;

            if let Some(reasoning) = delta.reasoning.filter(|r| !r.is_empty()) {
                deltas.push(StreamDelta::ReasoningChunk(reasoning));
            }

            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                deltas.push(StreamDelta::ContentChunk(content));
            }

            for fragment in delta.tool_calls.unwrap_or_default() {
                let acc = self.pending_calls.entry(fragment.index).or_default();
                if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
                    acc.id = id;
                }
                if let Some(function) = fragment.function {
                    if let Some(name) = function.name.filter(|n| !n.is_empty()) {
                        acc.name = name;
                    }
                    match function.arguments {
                        Some(serde_json::Value::String(part)) => acc.arguments.push_str(&part),
                        // Some servers send the arguments as an object.
                        Some(serde_json::Value::Null) | None => {}
                        Some(other) => acc.arguments = other.to_string(),
                    }
                }
            }

            if let Some(reason) = choice.finish_reason {
                deltas.extend(self.flush_calls()?);
                deltas.push(StreamDelta::Finish(reason));
            }
        }

        Ok(Frame::Deltas(deltas))
    }

    /// Emit any tool calls still pending at end of stream.
    pub(crate) fn finish(&mut self) -> Result<Vec<StreamDelta>, String> {
        self.flush_calls()
    }

    fn flush_calls(&mut self) -> Result<Vec<StreamDelta>, String> {
        std::mem::take(&mut self.pending_calls)
            .into_iter()
            .map(|(index, acc)| acc.into_call(index).map(StreamDelta::ToolCallChunk))
            .collect()
    }
}

#[derive(Default)]
pub(crate) struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn into_call(self, index: u32) -> Result<ToolCall, String> {
        let arguments = if self.arguments.trim().is_empty() {
            ToolArguments::new()
        } else {
            serde_json::from_str::<ToolArguments>(&self.arguments).map_err(|e| {
                format!("tool call '{}' has invalid arguments: {e}", self.name)
            })?
        };

        let id = if self.id.is_empty() {
            format!("call_{index}")
        } else {
            self.id
        };

        Ok(ToolCall {
            id,
            name: self.name,
            arguments,
        })
    }
}

// --- Wire types ---

/// A single SSE `data: {...}` frame from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: ApiDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default, alias = "reasoning_content")]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallFragment>>,
}

/// A tool call fragment — arrives incrementally across frames.
#[derive(Debug, Deserialize)]
struct ToolCallFragment {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionFragment>,
}

#[derive(Debug, Deserialize)]
struct FunctionFragment {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<serde_json::Value>,
}
