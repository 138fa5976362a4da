//! Shared test helpers for loop and indicator tests.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chatloop_core::error::{ProviderError, ToolError};
use chatloop_core::provider::{ChatRequest, DeltaStream, Provider, StreamDelta, StreamEnd};
use chatloop_core::tool::{ToolCall, ToolDescriptor, ToolOutput, ToolRegistry};
use chatloop_core::CancellationToken;

use crate::stream_event::{AgentStreamEvent, EventSink};

/// Records every event it receives.
#[derive(Default)]
pub struct Recorder(Mutex<Vec<AgentStreamEvent>>);

impl EventSink for Recorder {
    fn emit(&self, event: AgentStreamEvent) {
        self.0.lock().unwrap().push(event);
    }
}

impl Recorder {
    pub fn events(&self) -> Vec<AgentStreamEvent> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, predicate: impl Fn(&AgentStreamEvent) -> bool) -> Option<usize> {
        self.events().iter().position(predicate)
    }
}

/// What the scripted provider does for one request.
pub enum Script {
    /// Replay the deltas, then end cleanly.
    Reply(Vec<StreamDelta>),
    /// Replay the deltas, then end with the given reason.
    Ended(Vec<StreamDelta>, StreamEnd),
    /// Fail before any delta.
    Fail(ProviderError),
    /// Wait, then send the deltas and end cleanly.
    Delayed(Duration, Vec<StreamDelta>),
    /// Send the deltas, then stall until the request is cancelled.
    Stall(Vec<StreamDelta>),
}

/// A provider that plays back one [`Script`] per request and records the
/// requests it was sent.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<DeltaStream, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::Fail(ProviderError::NotConfigured("script exhausted".into())));

        match script {
            Script::Reply(deltas) => Ok(DeltaStream::from_deltas(deltas, StreamEnd::Done)),
            Script::Ended(deltas, end) => Ok(DeltaStream::from_deltas(deltas, end)),
            Script::Fail(e) => Err(e),
            Script::Delayed(delay, deltas) => {
                let (tx, stream) = DeltaStream::channel(8);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    for delta in deltas {
                        if let Err(end) = tx.send(delta, &cancel).await {
                            tx.finish(end);
                            return;
                        }
                    }
                    tx.finish(StreamEnd::Done);
                });
                Ok(stream)
            }
            Script::Stall(deltas) => {
                let (tx, stream) = DeltaStream::channel(8);
                tokio::spawn(async move {
                    for delta in deltas {
                        if let Err(end) = tx.send(delta, &cancel).await {
                            tx.finish(end);
                            return;
                        }
                    }
                    cancel.cancelled().await;
                    tx.finish(StreamEnd::Cancelled);
                });
                Ok(stream)
            }
        }
    }
}

pub fn content(text: &str) -> StreamDelta {
    StreamDelta::ContentChunk(text.into())
}

pub fn finish(reason: &str) -> StreamDelta {
    StreamDelta::Finish(reason.into())
}

pub fn weather_call(id: &str, location: &str) -> StreamDelta {
    let mut arguments = serde_json::Map::new();
    arguments.insert("location".into(), serde_json::json!(location));
    StreamDelta::ToolCallChunk(ToolCall {
        id: id.into(),
        name: "tool_get_weather".into(),
        arguments,
    })
}

/// A registry with a canned `tool_get_weather`.
pub fn weather_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register_fn(
        ToolDescriptor {
            name: "tool_get_weather".into(),
            description: "Weather for a location".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "location": { "type": "string" } }
            }),
            required: BTreeSet::from(["location".to_string()]),
        },
        |args, _ctx| async move {
            let mut out = ToolOutput::new();
            out.insert("location".into(), args["location"].clone());
            out.insert("forecast".into(), serde_json::json!("sunny"));
            Ok::<_, ToolError>(out)
        },
    );
    registry
}
