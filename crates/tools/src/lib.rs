//! Built-in tool implementations for chatloop.
//!
//! Tools give the agent the ability to interact with the world:
//! check the weather, read files, and run allowlisted shell commands.

pub mod file_read;
pub mod shell;
pub mod weather_lookup;

use chatloop_config::ToolsConfig;
use chatloop_core::tool::ToolRegistry;

pub use file_read::FileReadTool;
pub use shell::ShellTool;
pub use weather_lookup::WeatherLookupTool;

/// Create a tool registry with all built-in tools.
///
/// The shell allowlist and the file size cap come from `config`.
pub fn default_registry(config: &ToolsConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(WeatherLookupTool));
    registry.register(Box::new(FileReadTool::new(config.max_read_bytes)));
    registry.register(Box::new(ShellTool::new(config.allowed_commands.clone())));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatloop_core::{CancellationToken, ToolCall, ToolStatus};

    #[test]
    fn default_registry_has_builtins() {
        let registry = default_registry(&ToolsConfig::default());
        assert_eq!(
            registry.names(),
            vec!["tool_get_weather", "tool_read_file", "tool_run_command"]
        );
    }

    #[tokio::test]
    async fn dispatch_checks_required_location() {
        let registry = default_registry(&ToolsConfig::default());
        let call = ToolCall {
            id: "call_1".into(),
            name: "tool_get_weather".into(),
            arguments: Default::default(),
        };
        let response = registry
            .dispatch(&call, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.status, ToolStatus::Failed);
        assert_eq!(response.data["error"], "Missing required argument 'location'");
    }

    #[tokio::test]
    async fn configured_allowlist_is_enforced() {
        let config = ToolsConfig {
            allowed_commands: vec!["echo".into()],
            ..ToolsConfig::default()
        };
        let registry = default_registry(&config);
        let mut arguments = serde_json::Map::new();
        arguments.insert("command".into(), serde_json::json!("rm -rf /tmp/x"));
        let call = ToolCall {
            id: "call_2".into(),
            name: "tool_run_command".into(),
            arguments,
        };
        let response = registry
            .dispatch(&call, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!response.is_success());
        assert!(response.data["error"].as_str().unwrap().contains("allowlist"));
    }
}
