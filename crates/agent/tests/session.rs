//! Whole-session tests: literal SSE bodies through the real decoder, the
//! built-in tools, and the agent loop.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chatloop_agent::{AgentLoop, AgentStreamEvent, LoopState, TurnOutcome};
use chatloop_config::AppConfig;
use chatloop_core::error::ProviderError;
use chatloop_core::message::Role;
use chatloop_core::provider::{ChatRequest, DeltaStream, Provider};
use chatloop_core::CancellationToken;
use chatloop_providers::sse;
use tokio::sync::mpsc;

/// Serves one canned SSE body per request, split into the given chunks.
struct SseProvider {
    bodies: Mutex<VecDeque<Vec<String>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl SseProvider {
    fn new(bodies: Vec<Vec<String>>) -> Self {
        Self {
            bodies: Mutex::new(bodies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for SseProvider {
    fn name(&self) -> &str {
        "sse-script"
    }

    async fn stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<DeltaStream, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let chunks = self
            .bodies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::NotConfigured("no more bodies".into()))?;
        let body = futures::stream::iter(
            chunks
                .into_iter()
                .map(|chunk| Ok::<_, std::io::Error>(Bytes::from(chunk))),
        );
        Ok(sse::decode(body, cancel))
    }
}

fn frame(json: &str) -> String {
    format!("data: {json}\n\n")
}

fn done() -> String {
    "data: [DONE]\n\n".to_string()
}

fn text_body(parts: &[&str]) -> Vec<String> {
    let mut body: Vec<String> = parts
        .iter()
        .map(|p| frame(&serde_json::json!({"choices": [{"delta": {"content": p}}]}).to_string()))
        .collect();
    body.push(frame(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#));
    body.push(done());
    body
}

fn weather_tool_body() -> Vec<String> {
    vec![
        frame(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_abc","function":{"name":"tool_get_weather","arguments":"{\"loca"}}]}}]}"#,
        ),
        frame(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"tion\":\"NYC\"}"}}]}}]}"#,
        ),
        frame(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#),
        done(),
    ]
}

fn agent(provider: &Arc<SseProvider>) -> (AgentLoop, mpsc::UnboundedReceiver<AgentStreamEvent>) {
    let config = AppConfig::default();
    let tools = Arc::new(chatloop_tools::default_registry(&config.tools));
    let (tx, rx) = mpsc::unbounded_channel();
    let agent = AgentLoop::new(provider.clone(), tools, Arc::new(tx), &config);
    (agent, rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<AgentStreamEvent>) -> Vec<AgentStreamEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn weather_question_runs_tool_then_answers() {
    let provider = Arc::new(SseProvider::new(vec![
        weather_tool_body(),
        text_body(&["It is ", "mild in NYC."]),
        text_body(&["You're welcome!"]),
    ]));
    let (mut agent, mut rx) = agent(&provider);

    let mut input: VecDeque<String> = ["What's the weather in NYC?", "Thanks"]
        .into_iter()
        .map(String::from)
        .collect();
    let stats = agent.run(&mut input, &CancellationToken::new()).await;

    assert_eq!(stats.turns, 2);
    assert_eq!(stats.cycles, 3);
    assert_eq!(stats.tool_calls, 1);
    assert_eq!(agent.state(), LoopState::Done);

    let messages = agent.ledger().messages();
    let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::System,
            Role::User,
            Role::Assistant,
            Role::Tool,
            Role::Assistant,
            Role::User,
            Role::Assistant,
        ]
    );
    assert_eq!(messages[2].tool_calls[0].id, "call_abc");
    let tool_body: serde_json::Value = serde_json::from_str(&messages[3].content).unwrap();
    assert_eq!(tool_body["status"], "SUCCESS");
    assert_eq!(tool_body["data"]["location"], "NYC");
    assert!(tool_body["data"]["temperature"].is_number());
    assert_eq!(messages[4].content, "It is mild in NYC.");
    assert_eq!(messages[6].content, "You're welcome!");

    // The second request already carries the tool exchange.
    let requests = provider.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[1].messages[3].tool_call_id.as_deref(), Some("call_abc"));
    assert_eq!(requests[0].tools.len(), 3);

    let events = drain(&mut rx);
    assert!(matches!(events.last(), Some(AgentStreamEvent::Done { cycles: 3, .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        AgentStreamEvent::ToolResult { name, success: true, .. } if name == "tool_get_weather"
    )));
}

#[tokio::test]
async fn malformed_frame_aborts_cycle_and_session_continues() {
    let mut broken = vec![frame(r#"{"choices":[{"delta":{"content":"Half an ans"}}]}"#)];
    broken.push(frame("{not json"));
    let provider = Arc::new(SseProvider::new(vec![broken, text_body(&["Second try."])]));
    let (mut agent, mut rx) = agent(&provider);
    let cancel = CancellationToken::new();

    let outcome = agent.submit("First", &cancel).await;
    assert!(matches!(outcome, TurnOutcome::Aborted(ProviderError::MalformedFrame(_))));
    assert_eq!(agent.ledger().len(), 2);
    assert!(
        drain(&mut rx)
            .iter()
            .any(|e| matches!(e, AgentStreamEvent::Error { .. }))
    );

    let outcome = agent.submit("Again", &cancel).await;
    assert!(matches!(outcome, TurnOutcome::Replied(Some(ref r)) if r == "Second try."));
    let roles: Vec<Role> = agent.ledger().messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::User, Role::Assistant]);
}

#[tokio::test]
async fn reasoning_field_and_think_tags_stay_out_of_the_ledger() {
    let body = vec![
        frame(r#"{"choices":[{"delta":{"reasoning_content":"User wants a greeting."}}]}"#),
        frame(r#"{"choices":[{"delta":{"content":"<think>"}}]}"#),
        frame(r#"{"choices":[{"delta":{"content":"Keep it short."}}]}"#),
        frame(r#"{"choices":[{"delta":{"content":"</think>"}}]}"#),
        frame(r#"{"choices":[{"delta":{"content":"Hello!"}}]}"#),
        frame(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#),
        done(),
    ];
    let provider = Arc::new(SseProvider::new(vec![body]));
    let (mut agent, mut rx) = agent(&provider);

    agent.submit("Hi", &CancellationToken::new()).await;

    assert_eq!(agent.ledger().len(), 3);
    assert_eq!(agent.ledger().messages()[2].content, "Hello!");

    let events = drain(&mut rx);
    let thoughts: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            AgentStreamEvent::Thought { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(thoughts, vec!["User wants a greeting.", "Keep it short."]);

    let last_budget = events
        .iter()
        .rev()
        .find_map(|e| match e {
            AgentStreamEvent::Budget { report } => Some(*report),
            _ => None,
        })
        .unwrap();
    assert!(last_budget.reasoning_tokens > 0);
    assert_eq!(
        last_budget.total_tokens,
        last_budget.content_tokens + last_budget.reasoning_tokens
    );
}

#[tokio::test]
async fn frames_split_mid_line_are_reassembled() {
    let whole = text_body(&["Stitched ", "together"]).concat();
    let (a, b) = whole.split_at(17);
    let (b, c) = b.split_at(40);
    let provider = Arc::new(SseProvider::new(vec![vec![
        a.to_string(),
        b.to_string(),
        c.to_string(),
    ]]));
    let (mut agent, _rx) = agent(&provider);

    let outcome = agent.submit("Go", &CancellationToken::new()).await;
    assert!(matches!(outcome, TurnOutcome::Replied(Some(ref r)) if r == "Stitched together"));
}

#[tokio::test]
async fn channel_input_drives_a_session() {
    let provider = Arc::new(SseProvider::new(vec![text_body(&["Pong."])]));
    let (mut agent, mut events) = agent(&provider);
    let (tx, mut rx) = mpsc::channel(4);

    tx.send("Ping".to_string()).await.unwrap();
    drop(tx);
    let stats = agent.run(&mut rx, &CancellationToken::new()).await;

    assert_eq!(stats.turns, 1);
    let replies: Vec<String> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            AgentStreamEvent::Reply { content } => Some(content),
            _ => None,
        })
        .collect();
    assert_eq!(replies, vec!["Pong."]);
}
