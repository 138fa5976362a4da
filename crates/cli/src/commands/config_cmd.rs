//! `chatloop config` — Configuration management commands.

use std::path::{Path, PathBuf};

use chatloop_config::AppConfig;

fn config_path() -> PathBuf {
    AppConfig::config_dir().join("config.toml")
}

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let warnings = warnings(&config);
            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   Endpoint:  {}", config.endpoint);
            println!("   Model:     {}", config.model);
            println!("   Budget:    {} tokens", config.context_window_budget);
            println!("   Timeout:   {}s", config.request_timeout_secs);
            println!("   Commands:  {}", config.tools.allowed_commands.len());
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

/// Settings that load fine but are probably not what the user wants.
fn warnings(config: &AppConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if !config.has_api_key() && !is_local(&config.endpoint) {
        warnings.push(
            "No API key set for a remote endpoint (set CHATLOOP_API_KEY or OPENAI_API_KEY)".to_string(),
        );
    }

    if config.tools.allowed_commands.is_empty() {
        warnings.push("tool_run_command may run any command (allowed_commands is empty)".to_string());
    }

    let prompt_tokens = chatloop_agent::estimate_tokens(&config.system_prompt);
    if prompt_tokens * 2 > config.context_window_budget {
        warnings.push(format!(
            "System prompt uses ~{prompt_tokens} of {} budget tokens",
            config.context_window_budget
        ));
    }

    warnings
}

fn is_local(endpoint: &str) -> bool {
    ["://localhost", "://127.0.0.1", "://[::1]"]
        .iter()
        .any(|host| endpoint.contains(host))
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if config.api_key.is_some() {
        config.api_key = Some("[REDACTED]".into());
    }
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", config_path().display());
    Ok(())
}

pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path();
    if write_default(&path)? {
        println!("   ✅ Wrote default config to {}", path.display());
    } else {
        println!("   Config already exists at {}", path.display());
    }
    Ok(())
}

/// Write the default config unless a file is already there.
fn write_default(path: &Path) -> std::io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;
    Ok(true)
}
