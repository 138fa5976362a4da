//! chatloop CLI — the main entry point.
//!
//! Commands:
//! - `chat`    — Interactive chat or single-message mode
//! - `config`  — Show, locate, validate or initialize the config file

use clap::{Parser, Subcommand};

mod commands;
mod render;
mod stdin_input;

#[derive(Parser)]
#[command(
    name = "chatloop",
    about = "chatloop — streaming, tool-calling chat for OpenAI-compatible endpoints",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Override the configured model
        #[arg(long)]
        model: Option<String>,

        /// Override the configured chat-completions endpoint
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the resolved configuration
    Show,
    /// Print the config file path
    Path,
    /// Check the configuration for errors
    Validate,
    /// Write a default config file if none exists
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so they never interleave with the chat on stdout.
    let filter = if cli.verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if cli.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }

    match cli.command {
        Commands::Chat {
            message,
            model,
            endpoint,
        } => {
            commands::chat::run(commands::chat::ChatArgs {
                message,
                model,
                endpoint,
            })
            .await?
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
            ConfigAction::Init => commands::config_cmd::init().await?,
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_chat_overrides() {
        let cli = Cli::parse_from([
            "chatloop",
            "-v",
            "chat",
            "-m",
            "hello",
            "--model",
            "qwen2.5",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Chat {
                message,
                model,
                endpoint,
            } => {
                assert_eq!(message.as_deref(), Some("hello"));
                assert_eq!(model.as_deref(), Some("qwen2.5"));
                assert!(endpoint.is_none());
            }
            _ => panic!("expected chat"),
        }
    }
}
