//! `chatloop chat` — Interactive or single-message chat mode.

use std::sync::Arc;

use chatloop_agent::{AgentLoop, TurnOutcome};
use chatloop_config::AppConfig;
use chatloop_core::CancellationToken;
use chatloop_providers::OpenAiCompatProvider;

use crate::render::TerminalRenderer;
use crate::stdin_input::StdinInput;

/// Command-line overrides for a chat session.
pub struct ChatArgs {
    pub message: Option<String>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
}

pub async fn run(args: ChatArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    apply_overrides(&mut config, &args)?;

    let provider = Arc::new(OpenAiCompatProvider::from_config(&config)?);
    let tools = Arc::new(chatloop_tools::default_registry(&config.tools));
    let tool_names: Vec<String> = tools.descriptors().into_iter().map(|d| d.name).collect();

    let interactive = args.message.is_none();
    let renderer = Arc::new(TerminalRenderer::new(interactive));
    let mut agent = AgentLoop::new(provider, tools, renderer, &config);

    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());

    match args.message {
        Some(message) => match agent.submit(message, &cancel).await {
            TurnOutcome::Replied(_) => Ok(()),
            TurnOutcome::ToolRoundLimit => Err("the model did not answer within the tool round limit".into()),
            TurnOutcome::Aborted(e) => Err(e.into()),
        },
        None => {
            println!();
            println!("  ╔══════════════════════════════════════════════╗");
            println!("  ║          chatloop — Interactive Mode         ║");
            println!("  ╚══════════════════════════════════════════════╝");
            println!();
            println!("  Endpoint:  {}", config.endpoint);
            println!("  Model:     {}", config.model);
            println!("  Tools:     {}", tool_names.join(", "));
            println!("  Budget:    {} tokens", config.context_window_budget);
            if !config.has_api_key() {
                println!("  API key:   none (set CHATLOOP_API_KEY if the endpoint needs one)");
            }
            println!();
            println!("  Type your message and press Enter.");
            println!("  Type 'exit' or Ctrl+C to quit.");
            println!();

            let mut input = StdinInput::spawn();
            agent.run(&mut input, &cancel).await;
            Ok(())
        }
    }
}

/// Apply `--model` and `--endpoint`, then re-check the result.
fn apply_overrides(config: &mut AppConfig, args: &ChatArgs) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(endpoint) = &args.endpoint {
        config.endpoint = endpoint.clone();
    }
    config.validate()?;
    Ok(())
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
            cancel.cancel();
        }
    });
}
