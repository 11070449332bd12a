//! Shell execution skill: one command per call, block-listed first token,
//! bounded runtime, truncated output.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tracing::warn;

use super::{Skill, ToolDefinition, ToolResult};

pub const TOOL_RUN_COMMAND: &str = "run_command";

/// Commands refused by their first token, whatever the arguments.
pub const BLOCKED_COMMANDS: &[&str] = &[
    "rm", "sudo", "mv", "rmdir", "dd", "mkfs", "shutdown", "reboot", "chown", "chmod",
];

pub struct ShellSkill {
    timeout: Duration,
    max_output: usize,
}

impl ShellSkill {
    pub fn new(timeout: Duration, max_output: usize) -> Self {
        Self {
            timeout,
            max_output,
        }
    }

    /// The block-list check applied before any subprocess is spawned.
    fn blocked_token(command: &str) -> Option<&str> {
        let first = command.split_whitespace().next()?;
        // `/bin/rm` and `rm` are the same command.
        let bare = first.rsplit('/').next().unwrap_or(first);
        BLOCKED_COMMANDS.contains(&bare).then_some(first)
    }

    fn truncate(&self, s: String) -> (String, bool) {
        if s.len() <= self.max_output {
            return (s, false);
        }
        let mut end = self.max_output;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        (s[..end].to_string(), true)
    }

    async fn run(&self, command: &str) -> ToolResult {
        if let Some(token) = Self::blocked_token(command) {
            warn!(command, "blocked shell command");
            return ToolResult::fail(format!(
                "command '{token}' is on the block-list and was not executed"
            ));
        }

        let child = match tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return ToolResult::fail(format!("spawn failed: {e}")),
        };

        // On expiry the future is dropped and kill_on_drop reaps the child.
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let (stdout, stdout_truncated) =
                    self.truncate(String::from_utf8_lossy(&output.stdout).into_owned());
                let (stderr, _) =
                    self.truncate(String::from_utf8_lossy(&output.stderr).into_owned());
                ToolResult::ok(json!({
                    "stdout": stdout,
                    "stderr": stderr,
                    "exit_code": output.status.code(),
                    "truncated": stdout_truncated,
                }))
            }
            Ok(Err(e)) => ToolResult::fail(format!("wait failed: {e}")),
            Err(_) => ToolResult::fail(format!(
                "command timed out after {}s",
                self.timeout.as_secs()
            )),
        }
    }
}

#[async_trait]
impl Skill for ShellSkill {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run shell commands on the host"
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: TOOL_RUN_COMMAND.to_string(),
            description: "Run a single shell command and return stdout, stderr, and the exit code. \
                          Destructive commands are refused."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The command line to run."
                    }
                },
                "required": ["command"],
                "additionalProperties": false
            }),
        }]
    }

    async fn execute(&self, _tool_name: &str, arguments: &Value) -> ToolResult {
        let Some(command) = arguments.get("command").and_then(Value::as_str) else {
            return ToolResult::fail("missing 'command' argument");
        };
        self.run(command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skill() -> ShellSkill {
        ShellSkill::new(Duration::from_secs(10), 10_000)
    }

    #[tokio::test]
    async fn blocklist_refuses_without_spawning() {
        let result = skill().run("rm -rf /").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("block-list"));

        let result = skill().run("sudo reboot").await;
        assert!(!result.success);

        // Absolute paths do not bypass the list.
        let result = skill().run("/bin/rm file").await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn runs_command_and_captures_output() {
        let result = skill().run("echo hello").await;
        assert!(result.success);
        assert_eq!(result.output["stdout"], "hello\n");
        assert_eq!(result.output["exit_code"], 0);
    }

    #[tokio::test]
    async fn nonzero_exit_is_still_a_successful_invocation() {
        let result = skill().run("sh -c 'exit 3'").await;
        assert!(result.success);
        assert_eq!(result.output["exit_code"], 3);
    }

    #[tokio::test]
    async fn output_is_truncated_at_the_limit() {
        let small = ShellSkill::new(Duration::from_secs(10), 8);
        let result = small.run("echo aaaaaaaaaaaaaaaa").await;
        assert!(result.success);
        assert_eq!(result.output["stdout"], "aaaaaaaa");
        assert_eq!(result.output["truncated"], true);
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let fast = ShellSkill::new(Duration::from_millis(100), 10_000);
        let result = fast.run("sleep 30").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn execute_requires_command_argument() {
        let result = skill().execute(TOOL_RUN_COMMAND, &json!({})).await;
        assert!(!result.success);
    }
}
