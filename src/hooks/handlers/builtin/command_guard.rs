//! Command guard hook handler
//!
//! Blocks shell commands about to run when they match a deny pattern.

use crate::hooks::config::BuiltInConfig;
use crate::hooks::{AsyncHookHandler, HandlerResult, HookError, HookEvent, HookResult};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};

const DEFAULT_MESSAGE: &str = "Command blocked by policy";

/// Built-in handler that refuses matching tool commands
pub struct CommandGuardHandler {
    name: String,
    tools: Vec<String>,
    deny: Vec<Regex>,
    allow: Vec<Regex>,
    message: String,
}

impl CommandGuardHandler {
    /// Create a guard from `deny`, `allow`, `tools` and `message` settings
    pub fn new(name: impl Into<String>, config: &BuiltInConfig) -> HookResult<Self> {
        let name = name.into();
        let deny = compile_patterns(&name, config.settings.get("deny"))?;
        let allow = compile_patterns(&name, config.settings.get("allow"))?;

        if deny.is_empty() {
            return Err(HookError::invalid_config(format!(
                "Command guard '{}' has no deny patterns",
                name
            )));
        }

        let tools = match config.settings.get("tools").and_then(|v| v.as_array()) {
            Some(tools) => tools
                .iter()
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect(),
            None => vec!["Bash".to_string()],
        };

        let message = config
            .settings
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_MESSAGE)
            .to_string();

        Ok(Self {
            name,
            tools,
            deny,
            allow,
            message,
        })
    }

    /// The deny pattern `command` trips, unless an allow pattern exempts it
    fn violation(&self, command: &str) -> Option<&Regex> {
        if self.allow.iter().any(|re| re.is_match(command)) {
            return None;
        }
        self.deny.iter().find(|re| re.is_match(command))
    }
}

fn compile_patterns(name: &str, value: Option<&Value>) -> HookResult<Vec<Regex>> {
    let patterns = match value {
        None => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(HookError::invalid_config(format!(
                "Command guard '{}' patterns must be a list",
                name
            )))
        }
    };

    patterns
        .iter()
        .map(|p| {
            let pattern = p.as_str().ok_or_else(|| {
                HookError::invalid_config(format!("Command guard '{}' has a non-string pattern", name))
            })?;
            Regex::new(pattern).map_err(|e| {
                HookError::invalid_config(format!(
                    "Command guard '{}' has an invalid pattern '{}': {}",
                    name, pattern, e
                ))
            })
        })
        .collect()
}

#[async_trait]
impl AsyncHookHandler for CommandGuardHandler {
    async fn execute(&self, event: &HookEvent) -> HookResult<HandlerResult> {
        let command = match event
            .tool_input()
            .and_then(|input| input.get("command"))
            .and_then(Value::as_str)
        {
            Some(command) => command,
            None => return Ok(HandlerResult::success()),
        };

        match self.violation(command) {
            Some(pattern) => {
                info!(handler = %self.name, pattern = pattern.as_str(), "Blocking command");
                Ok(HandlerResult::block(format!(
                    "{} (matched '{}')",
                    self.message,
                    pattern.as_str()
                )))
            }
            None => {
                debug!(handler = %self.name, "Command allowed");
                Ok(HandlerResult::success())
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn should_run(&self, event: &HookEvent) -> bool {
        event.kind() == crate::hooks::HookEventKind::PreToolUse
            && event
                .tool_name()
                .is_some_and(|tool| self.tools.iter().any(|t| t == tool))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{EventPayload, EXIT_BLOCKING};
    use serde_json::json;
    use std::collections::HashMap;

    fn config_from_json(json_config: Value) -> BuiltInConfig {
        let settings: HashMap<String, Value> = match json_config {
            Value::Object(map) => map.into_iter().collect(),
            _ => HashMap::new(),
        };
        BuiltInConfig {
            handler_name: "command_guard".to_string(),
            settings,
        }
    }

    fn bash(command: &str) -> HookEvent {
        HookEvent::new(
            "s1",
            "/t",
            "/w",
            EventPayload::PreToolUse {
                tool_name: "Bash".into(),
                tool_input: json!({ "command": command }),
            },
        )
    }

    #[tokio::test]
    async fn test_blocks_denied_command() {
        let guard = CommandGuardHandler::new(
            "no-rm",
            &config_from_json(json!({"deny": ["rm\\s+-rf\\s+/"], "message": "Refusing"})),
        )
        .unwrap();

        let event = bash("rm -rf /");
        assert!(guard.should_run(&event));

        let result = guard.execute(&event).await.unwrap();
        assert_eq!(result.exit_code, EXIT_BLOCKING);
        assert!(result.stderr.unwrap().starts_with("Refusing"));

        let result = guard.execute(&bash("ls -la")).await.unwrap();
        assert_eq!(result, HandlerResult::success());
    }

    #[tokio::test]
    async fn test_allow_overrides_deny() {
        let guard = CommandGuardHandler::new(
            "git-guard",
            &config_from_json(json!({
                "deny": ["^git push"],
                "allow": ["^git push --dry-run"],
            })),
        )
        .unwrap();

        assert!(guard.execute(&bash("git push origin main")).await.unwrap().is_blocking());
        assert!(!guard.execute(&bash("git push --dry-run")).await.unwrap().is_blocking());
    }

    #[test]
    fn test_only_configured_tools() {
        let guard = CommandGuardHandler::new(
            "guard",
            &config_from_json(json!({"deny": ["x"]})),
        )
        .unwrap();

        let edit = HookEvent::new(
            "s1",
            "/t",
            "/w",
            EventPayload::PreToolUse {
                tool_name: "Edit".into(),
                tool_input: json!({"command": "x"}),
            },
        );
        assert!(!guard.should_run(&edit));

        let post = HookEvent::new(
            "s1",
            "/t",
            "/w",
            EventPayload::PostToolUse {
                tool_name: "Bash".into(),
                tool_input: json!({"command": "x"}),
                tool_response: Value::Null,
            },
        );
        assert!(!guard.should_run(&post));
    }

    #[test]
    fn test_invalid_settings() {
        assert!(CommandGuardHandler::new("g", &config_from_json(json!({}))).is_err());
        assert!(CommandGuardHandler::new("g", &config_from_json(json!({"deny": ["("]}))).is_err());
        assert!(CommandGuardHandler::new("g", &config_from_json(json!({"deny": "rm"}))).is_err());
    }
}
