//! Logging hook handler

use crate::hooks::config::BuiltInConfig;
use crate::hooks::{AsyncHookHandler, HandlerResult, HookEvent, HookResult};
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error, info, warn, Level};

/// Built-in handler that traces every event it sees
pub struct LoggingHandler {
    name: String,
    level: Level,
    format: LogFormat,
    include_payload: bool,
}

#[derive(Debug, Clone, Copy)]
enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl LoggingHandler {
    /// Create a new logging handler
    pub fn new(name: impl Into<String>, config: &BuiltInConfig) -> Self {
        let level = config
            .settings
            .get("level")
            .and_then(|v| v.as_str())
            .and_then(|s| match s.to_lowercase().as_str() {
                "error" => Some(Level::ERROR),
                "warn" | "warning" => Some(Level::WARN),
                "info" => Some(Level::INFO),
                "debug" => Some(Level::DEBUG),
                "trace" => Some(Level::TRACE),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        let format = config
            .settings
            .get("format")
            .and_then(|v| v.as_str())
            .and_then(|s| match s.to_lowercase().as_str() {
                "json" => Some(LogFormat::Json),
                "pretty" => Some(LogFormat::Pretty),
                "compact" => Some(LogFormat::Compact),
                _ => None,
            })
            .unwrap_or(LogFormat::Compact);

        let include_payload = config
            .settings
            .get("include_payload")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        Self {
            name: name.into(),
            level,
            format,
            include_payload,
        }
    }

    /// Format the log message
    fn format_message(&self, event: &HookEvent) -> String {
        let transaction_id = event
            .context
            .as_ref()
            .and_then(|c| c.transaction_id.as_deref())
            .unwrap_or("-");

        match self.format {
            LogFormat::Json => {
                let mut entry = json!({
                    "event": event.event_name(),
                    "handler": self.name,
                    "session_id": event.session_id,
                    "transaction_id": transaction_id,
                    "tool_name": event.tool_name(),
                });
                if self.include_payload {
                    entry["payload"] =
                        serde_json::to_value(event.without_context()).unwrap_or_default();
                }
                entry.to_string()
            }
            LogFormat::Pretty => {
                let mut message = format!(
                    "Event: {} | Handler: {} | Session: {} | Transaction: {}",
                    event.event_name(),
                    self.name,
                    event.session_id,
                    transaction_id
                );
                if self.include_payload {
                    message.push_str(" | Payload: ");
                    message.push_str(
                        &serde_json::to_string_pretty(&event.without_context()).unwrap_or_default(),
                    );
                }
                message
            }
            LogFormat::Compact => {
                let mut message = format!(
                    "[{}] {}: {}",
                    event.event_name(),
                    self.name,
                    event.session_id
                );
                if let Some(tool) = event.tool_name() {
                    message.push_str(&format!(" tool={}", tool));
                }
                message
            }
        }
    }
}

#[async_trait]
impl AsyncHookHandler for LoggingHandler {
    async fn execute(&self, event: &HookEvent) -> HookResult<HandlerResult> {
        let message = self.format_message(event);

        match self.level {
            Level::ERROR => error!("{}", message),
            Level::WARN => warn!("{}", message),
            Level::INFO => info!("{}", message),
            Level::DEBUG => debug!("{}", message),
            Level::TRACE => tracing::trace!("{}", message),
        }

        Ok(HandlerResult::success())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{EventContext, EventPayload};
    use serde_json::Value;
    use std::collections::HashMap;
    use tracing_test::traced_test;

    fn config_from_json(json_config: Value) -> BuiltInConfig {
        let mut settings = HashMap::new();
        if let Value::Object(map) = json_config {
            for (k, v) in map {
                settings.insert(k, v);
            }
        }
        BuiltInConfig {
            handler_name: "logging".to_string(),
            settings,
        }
    }

    fn event() -> HookEvent {
        HookEvent::new(
            "sess-9",
            "/t",
            "/w",
            EventPayload::PostToolUse {
                tool_name: "Write".into(),
                tool_input: json!({"file_path": "/a.ts"}),
                tool_response: Value::Null,
            },
        )
        .with_context(EventContext {
            transaction_id: Some("tx-1".into()),
            ..EventContext::default()
        })
    }

    #[tokio::test]
    #[traced_test]
    async fn test_json_format_logging() {
        let handler = LoggingHandler::new(
            "json_logger",
            &config_from_json(json!({"level": "info", "format": "json", "include_payload": true})),
        );

        let result = handler.execute(&event()).await.unwrap();
        assert_eq!(result, HandlerResult::success());

        assert!(logs_contain("json_logger"));
        assert!(logs_contain("tx-1"));
        assert!(logs_contain("/a.ts"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_pretty_format_logging() {
        let handler = LoggingHandler::new(
            "pretty_logger",
            &config_from_json(json!({"level": "debug", "format": "pretty"})),
        );

        handler.execute(&event()).await.unwrap();
        assert!(logs_contain("Event: PostToolUse"));
        assert!(logs_contain("Session: sess-9"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_compact_is_default() {
        let handler = LoggingHandler::new("compact_logger", &config_from_json(json!({})));

        handler.execute(&event()).await.unwrap();
        assert!(logs_contain("[PostToolUse] compact_logger: sess-9 tool=Write"));
    }

    #[tokio::test]
    async fn test_different_log_levels() {
        for level in ["error", "warn", "info", "debug", "trace", "bogus"] {
            let handler = LoggingHandler::new(
                format!("{}_logger", level),
                &config_from_json(json!({"level": level})),
            );
            assert_eq!(handler.execute(&event()).await.unwrap(), HandlerResult::success());
        }
    }
}
