//! Shell tool — execute system commands.
//!
//! The command line is split into words with shell quoting rules and the
//! program is run directly, never through a shell. Lines carrying shell
//! operators are refused before the allowlist check.
//!
//! The process is killed when the request cycle is cancelled.

use async_trait::async_trait;
use chatloop_core::error::ToolError;
use chatloop_core::tool::{Tool, ToolArguments, ToolContext, ToolOutput};
use tokio::process::Command;
use tracing::{debug, warn};

pub const TOOL_NAME: &str = "tool_run_command";

/// Characters that chain, redirect or substitute commands in a shell.
const SHELL_OPERATORS: &[char] = &[';', '&', '|', '$', '`', '<', '>', '(', ')', '\n', '\r'];

/// Execute shell commands with safety constraints.
pub struct ShellTool {
    /// If non-empty, only these commands are allowed.
    allowed_commands: Vec<String>,
}

impl ShellTool {
    pub fn new(allowed_commands: Vec<String>) -> Self {
        Self { allowed_commands }
    }

    fn is_command_allowed(&self, program: &str) -> bool {
        self.allowed_commands.is_empty() || self.allowed_commands.iter().any(|a| a == program)
    }

    /// Split `command` into argv, refusing anything a shell would treat as
    /// an operator or substitution.
    fn parse(&self, command: &str) -> Result<Vec<String>, ToolError> {
        if let Some(op) = command.chars().find(|c| SHELL_OPERATORS.contains(c)) {
            return Err(ToolError::PermissionDenied {
                tool_name: TOOL_NAME.into(),
                reason: format!("shell operator {op:?} is not allowed; run one program at a time"),
            });
        }

        let argv = shlex::split(command)
            .ok_or_else(|| ToolError::InvalidArguments("unbalanced quotes in 'command'".into()))?;
        let Some(program) = argv.first() else {
            return Err(ToolError::InvalidArguments("'command' is empty".into()));
        };

        if !self.is_command_allowed(program) {
            return Err(ToolError::PermissionDenied {
                tool_name: TOOL_NAME.into(),
                reason: format!("Command '{program}' not in allowlist"),
            });
        }
        Ok(argv)
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Run one program with arguments and return stdout/stderr. Use this for listing directories, checking files, git status, etc. Pipes, redirection and command chaining are not supported."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The program and its arguments, e.g. `git status`"
                }
            }
        })
    }

    fn required_params(&self) -> &[&str] {
        &["command"]
    }

    async fn execute(
        &self,
        arguments: ToolArguments,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let command = arguments
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("'command' must be a string".into()))?;

        let argv = self.parse(command)?;
        debug!(command = %command, call_id = %ctx.call_id, "Executing command");

        let child = Command::new(&argv[0])
            .args(&argv[1..])
            .kill_on_drop(true)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: TOOL_NAME.into(),
                reason: e.to_string(),
            })?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                warn!(command = %command, "Command cancelled");
                return Err(ToolError::Cancelled(TOOL_NAME.into()));
            }
            output = child.wait_with_output() => output?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            warn!(command = %command, exit_code = code, "Command failed");
            return Err(ToolError::ExecutionFailed {
                tool_name: TOOL_NAME.into(),
                reason: format!("exit code {code}: {stderr}"),
            });
        }

        let mut out = ToolOutput::new();
        out.insert("exit_code".into(), serde_json::json!(0));
        out.insert("stdout".into(), serde_json::json!(stdout));
        if !stderr.is_empty() {
            out.insert("stderr".into(), serde_json::json!(stderr));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatloop_core::CancellationToken;
    use std::time::Duration;

    fn ctx(cancel: CancellationToken) -> ToolContext {
        ToolContext {
            call_id: "call_1".into(),
            cancel,
        }
    }

    fn command_arg(command: &str) -> ToolArguments {
        let mut args = ToolArguments::new();
        args.insert("command".into(), serde_json::json!(command));
        args
    }

    #[test]
    fn allowlist_check() {
        let tool = ShellTool::new(vec!["ls".into(), "cat".into(), "git".into()]);
        assert_eq!(tool.parse("ls -la").unwrap(), vec!["ls", "-la"]);
        assert!(tool.parse("cat file.txt").is_ok());
        assert!(tool.parse("git status").is_ok());
        assert!(matches!(tool.parse("rm -rf /"), Err(ToolError::PermissionDenied { .. })));
        assert!(matches!(tool.parse("sudo something"), Err(ToolError::PermissionDenied { .. })));
    }

    #[test]
    fn empty_allowlist_allows_all() {
        let tool = ShellTool::new(vec![]);
        assert_eq!(tool.parse("anything goes").unwrap(), vec!["anything", "goes"]);
    }

    #[test]
    fn shell_operators_are_refused() {
        let tool = ShellTool::new(vec!["echo".into()]);
        for command in [
            "echo ok; id",
            "echo ok && id",
            "echo ok | sh",
            "echo $(id)",
            "echo `id`",
            "echo ok > /tmp/x",
            "echo ok\nid",
        ] {
            assert!(
                matches!(tool.parse(command), Err(ToolError::PermissionDenied { .. })),
                "{command:?} should be refused"
            );
        }
        // Also without an allowlist.
        assert!(ShellTool::new(vec![]).parse("ls; id").is_err());
    }

    #[test]
    fn quoting_and_empty_input() {
        let tool = ShellTool::new(vec![]);
        assert_eq!(tool.parse("echo 'a  b' \"c\"").unwrap(), vec!["echo", "a  b", "c"]);
        assert!(matches!(tool.parse("echo 'open"), Err(ToolError::InvalidArguments(_))));
        assert!(matches!(tool.parse("   "), Err(ToolError::InvalidArguments(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn execute_echo() {
        let tool = ShellTool::new(vec![]);
        let out = tool
            .execute(command_arg("echo hello"), &ctx(CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(out["stdout"], "hello");
        assert_eq!(out["exit_code"], 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn chained_command_does_not_run() {
        let tool = ShellTool::new(vec!["echo".into()]);
        let result = tool
            .execute(command_arg("echo ok; id -un"), &ctx(CancellationToken::new()))
            .await;
        assert!(matches!(result, Err(ToolError::PermissionDenied { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn quoted_argument_reaches_program_verbatim() {
        let tool = ShellTool::new(vec![]);
        let out = tool
            .execute(command_arg("echo 'a  b'"), &ctx(CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(out["stdout"], "a  b");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let tool = ShellTool::new(vec![]);
        let result = tool
            .execute(
                command_arg(&format!("ls {}", missing.display())),
                &ctx(CancellationToken::new()),
            )
            .await;
        match result {
            Err(ToolError::ExecutionFailed { reason, .. }) => {
                assert!(reason.starts_with("exit code "));
                assert!(!reason.starts_with("exit code 0"));
                assert!(reason.contains("missing"));
            }
            other => panic!("expected ExecutionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_program_fails_to_spawn() {
        let tool = ShellTool::new(vec![]);
        let result = tool
            .execute(
                command_arg("chatloop-no-such-program --flag"),
                &ctx(CancellationToken::new()),
            )
            .await;
        assert!(matches!(result, Err(ToolError::ExecutionFailed { .. })));
    }

    #[tokio::test]
    async fn blocked_command() {
        let tool = ShellTool::new(vec!["ls".into()]);
        let result = tool
            .execute(command_arg("rm -rf /"), &ctx(CancellationToken::new()))
            .await;
        assert!(matches!(result, Err(ToolError::PermissionDenied { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_stops_long_command() {
        let tool = ShellTool::new(vec![]);
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let result = tool.execute(command_arg("sleep 30"), &ctx(token)).await;
        assert!(matches!(result, Err(ToolError::Cancelled(_))));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
