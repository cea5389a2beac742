//! External command hook handler implementation

use crate::hooks::config::ExternalCommandConfig;
use crate::hooks::{AsyncHookHandler, HandlerResult, HookError, HookEvent, HookResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, warn};

/// Runs a configured command with the enriched event on stdin
pub struct ExternalCommandHandler {
    /// Handler name
    name: String,
    /// External command configuration
    config: ExternalCommandConfig,
}

impl ExternalCommandHandler {
    /// Create a new external command handler
    pub fn new(name: impl Into<String>, config: ExternalCommandConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// Build environment variables for the command
    fn build_env(&self, event: &HookEvent) -> HashMap<String, String> {
        let mut env = self.config.env.clone();

        env.insert("HOOK_EVENT".to_string(), event.event_name().to_string());
        env.insert("HOOK_SESSION_ID".to_string(), event.session_id.clone());
        env.insert("HOOK_HANDLER".to_string(), self.name.clone());

        if let Some(tool) = event.tool_name() {
            env.insert("HOOK_TOOL_NAME".to_string(), tool.to_string());
        }

        env
    }

    /// Map command output onto a handler result
    fn parse_output(&self, stdout: &str, stderr: &str, exit_code: i32) -> HandlerResult {
        let mut result = HandlerResult::success().with_exit_code(exit_code);

        let trimmed = stdout.trim();
        if !trimmed.is_empty() {
            match serde_json::from_str::<Value>(trimmed) {
                Ok(json @ Value::Object(_)) => result = result.with_output(json),
                _ => result = result.with_stdout(trimmed),
            }
        }

        let stderr = stderr.trim();
        if !stderr.is_empty() {
            if exit_code == 0 {
                warn!("Command '{}' stderr: {}", self.config.command, stderr);
            }
            result = result.with_stderr(stderr);
        }

        result
    }
}

#[async_trait]
impl AsyncHookHandler for ExternalCommandHandler {
    async fn execute(&self, event: &HookEvent) -> HookResult<HandlerResult> {
        debug!(
            "Executing external command handler '{}' for {} event",
            self.name,
            event.kind()
        );

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .envs(self.build_env(event))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if event.cwd.is_dir() {
            cmd.current_dir(&event.cwd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            error!("Failed to spawn command '{}': {}", self.config.command, e);
            HookError::handler_failed(&self.name, format!("Failed to spawn command: {}", e))
        })?;

        // Write the event to stdin, then close it
        if let Some(mut stdin) = child.stdin.take() {
            let data = serde_json::to_vec(event)?;
            if let Err(e) = stdin.write_all(&data).await {
                warn!("Failed to write to command stdin: {}", e);
            }
        }

        let timeout_duration = Duration::from_millis(self.config.timeout_ms);
        let output = match timeout(timeout_duration, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!("Command execution error: {}", e);
                return Err(HookError::handler_failed(
                    &self.name,
                    format!("Command execution error: {}", e),
                ));
            }
            Err(_) => {
                error!("Command timed out after {}ms", self.config.timeout_ms);
                // kill_on_drop reaps the child
                return Err(HookError::handler_failed(
                    &self.name,
                    HookError::timeout(timeout_duration),
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = match output.status.code() {
            Some(code) => code,
            None => {
                return Err(HookError::handler_failed(
                    &self.name,
                    "Command terminated by signal",
                ))
            }
        };

        debug!("Command exited with code {}", exit_code);

        Ok(self.parse_output(&stdout, &stderr, exit_code))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
