//! Hook handler implementations
//!
//! This module provides concrete implementations of hook handlers for:
//! - External command execution
//! - Built-in handlers

pub mod builtin;
pub mod external_handler;

pub use self::builtin::*;
pub use self::external_handler::ExternalCommandHandler;

use crate::hooks::config::{HandlerConfig, HandlerKind};
use crate::hooks::{AsyncHookHandler, ConditionalHandler, HookError, HookResult};
use regex::Regex;
use std::sync::Arc;

/// Build the handler described by one `[[handlers]]` entry
pub fn build_handler(config: &HandlerConfig) -> HookResult<Arc<dyn AsyncHookHandler>> {
    let matcher = config
        .matcher
        .as_deref()
        .map(Regex::new)
        .transpose()
        .map_err(|e| {
            HookError::invalid_config(format!(
                "Handler '{}' has an invalid matcher: {}",
                config.name, e
            ))
        })?;

    match &config.kind {
        HandlerKind::Command(command) => Ok(with_matcher(
            ExternalCommandHandler::new(&config.name, command.clone()),
            matcher,
        )),
        HandlerKind::Builtin(builtin) => match builtin.handler_name.as_str() {
            "logging" => Ok(with_matcher(LoggingHandler::new(&config.name, builtin), matcher)),
            "command_guard" => Ok(with_matcher(
                CommandGuardHandler::new(&config.name, builtin)?,
                matcher,
            )),
            other => Err(HookError::invalid_config(format!(
                "Handler '{}' uses unknown built-in '{}'",
                config.name, other
            ))),
        },
    }
}

fn with_matcher<H: AsyncHookHandler + 'static>(
    handler: H,
    matcher: Option<Regex>,
) -> Arc<dyn AsyncHookHandler> {
    match matcher {
        Some(matcher) => Arc::new(handler.matching_tool(matcher)),
        None => Arc::new(handler),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::config::{BuiltInConfig, ExternalCommandConfig};
    use crate::hooks::{EventPayload, HookEvent, HookEventKind};
    use serde_json::json;
    use std::collections::HashMap;

    fn guard_config(matcher: Option<&str>) -> HandlerConfig {
        HandlerConfig {
            name: "guard".into(),
            events: vec![HookEventKind::PreToolUse],
            enabled: true,
            matcher: matcher.map(str::to_string),
            kind: HandlerKind::Builtin(BuiltInConfig {
                handler_name: "command_guard".into(),
                settings: HashMap::from([("deny".to_string(), json!(["rm"])), ("tools".to_string(), json!(["Bash", "Shell"]))]),
            }),
        }
    }

    fn tool_event(tool: &str) -> HookEvent {
        HookEvent::new(
            "s1",
            "/t",
            "/w",
            EventPayload::PreToolUse {
                tool_name: tool.into(),
                tool_input: json!({"command": "rm x"}),
            },
        )
    }

    #[test]
    fn test_matcher_applied() {
        let handler = build_handler(&guard_config(Some("^Bash$"))).unwrap();
        assert_eq!(handler.name(), "guard");
        assert!(handler.should_run(&tool_event("Bash")));
        assert!(!handler.should_run(&tool_event("Shell")));

        let handler = build_handler(&guard_config(None)).unwrap();
        assert!(handler.should_run(&tool_event("Shell")));
    }

    #[test]
    fn test_unknown_builtin_rejected() {
        let config = HandlerConfig {
            name: "mystery".into(),
            events: vec![HookEventKind::Stop],
            enabled: true,
            matcher: None,
            kind: HandlerKind::Builtin(BuiltInConfig {
                handler_name: "transform".into(),
                settings: HashMap::new(),
            }),
        };
        assert!(build_handler(&config).is_err());
    }

    #[test]
    fn test_command_handler_built() {
        let config = HandlerConfig {
            name: "notify".into(),
            events: vec![HookEventKind::Stop],
            enabled: true,
            matcher: None,
            kind: HandlerKind::Command(ExternalCommandConfig {
                command: "true".into(),
                args: Vec::new(),
                env: HashMap::new(),
                timeout_ms: 1000,
            }),
        };
        assert_eq!(build_handler(&config).unwrap().name(), "notify");
    }
}
