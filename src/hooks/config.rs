//! TOML configuration for the dispatcher

use crate::hooks::dispatcher::{DEFAULT_DRAIN_LIMIT, DEFAULT_TIMEOUT};
use crate::hooks::queue::DEFAULT_MAX_RETRIES;
use crate::hooks::HookEventKind;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Main dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Identifies the extension; state files are kept per client
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Root for per-client state; platform data dir when unset
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    /// Budget for one dispatch in milliseconds, 0 disables
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Propagate handler exit codes to the host
    #[serde(default)]
    pub blocking: bool,

    /// Verbose logging
    #[serde(default)]
    pub debug: bool,

    /// Collect repository metadata for the context store
    #[serde(default = "default_true")]
    pub capture_git: bool,

    #[serde(default)]
    pub retry_queue: RetryQueueConfig,

    #[serde(default)]
    pub event_log: EventLogConfig,

    /// Configured handlers
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,
}

/// Retry queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryQueueConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Failed redeliveries before a record is dropped
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Records redelivered per invocation
    #[serde(default = "default_drain_limit")]
    pub drain_limit: usize,

    /// Keep dropped records in a dead-letter file
    #[serde(default)]
    pub dead_letter: bool,
}

/// Event log configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLogConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Log file; `events.jsonl` in the client state dir when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Individual handler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Handler name
    pub name: String,

    /// Event kinds this handler responds to
    pub events: Vec<HookEventKind>,

    /// Whether handler is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Regex on the tool name for tool events
    #[serde(default)]
    pub matcher: Option<String>,

    /// Handler-specific configuration
    #[serde(flatten)]
    pub kind: HandlerKind,
}

/// Handler implementations available from configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandlerKind {
    Command(ExternalCommandConfig),
    Builtin(BuiltInConfig),
}

/// External command handler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalCommandConfig {
    /// Command to execute
    pub command: String,

    /// Command arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Timeout in milliseconds
    #[serde(default = "default_command_timeout")]
    pub timeout_ms: u64,
}

/// Built-in handler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltInConfig {
    /// Built-in handler name
    pub handler_name: String,

    /// Handler-specific settings
    #[serde(default)]
    pub settings: HashMap<String, serde_json::Value>,
}

/// Locations of one client's state files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    root: PathBuf,
}

impl StatePaths {
    /// State for `client_id` under `state_dir`
    pub fn new(state_dir: &Path, client_id: &str) -> Self {
        Self {
            root: state_dir.join(sanitize_client_id(client_id)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn context_file(&self) -> PathBuf {
        self.root.join("context.json")
    }

    pub fn queue_file(&self) -> PathBuf {
        self.root.join("failed-events.jsonl")
    }

    pub fn dead_letter_file(&self) -> PathBuf {
        self.root.join("dead-letter.jsonl")
    }

    pub fn event_log_file(&self) -> PathBuf {
        self.root.join("events.jsonl")
    }

    pub fn repo_instances_file(&self) -> PathBuf {
        self.root.join("repo-instances.json")
    }
}

fn sanitize_client_id(client_id: &str) -> String {
    let cleaned: String = client_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        default_client_id()
    } else {
        cleaned
    }
}

impl DispatchConfig {
    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Save configuration to TOML string
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.client_id.trim().is_empty() {
            return Err("client_id cannot be empty".to_string());
        }
        if self.retry_queue.enabled && self.retry_queue.max_retries == 0 {
            return Err("retry_queue.max_retries must be at least 1".to_string());
        }
        if self.retry_queue.enabled && self.retry_queue.drain_limit == 0 {
            return Err("retry_queue.drain_limit must be at least 1".to_string());
        }

        // Check for duplicate handler names
        let mut names = HashSet::new();
        for handler in &self.handlers {
            if !names.insert(&handler.name) {
                return Err(format!("Duplicate handler name: {}", handler.name));
            }
        }

        for handler in &self.handlers {
            handler.validate()?;
        }

        Ok(())
    }

    /// Handler configs that are enabled
    pub fn enabled_handlers(&self) -> impl Iterator<Item = &HandlerConfig> {
        self.handlers.iter().filter(|h| h.enabled)
    }
}

impl HandlerConfig {
    /// Validate handler configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("Handler name cannot be empty".to_string());
        }

        if self.events.is_empty() {
            return Err(format!("Handler '{}' has no events", self.name));
        }

        if let Some(matcher) = &self.matcher {
            regex::Regex::new(matcher)
                .map_err(|e| format!("Handler '{}' has an invalid matcher: {}", self.name, e))?;
        }

        if let HandlerKind::Command(command) = &self.kind {
            if command.command.trim().is_empty() {
                return Err(format!("Handler '{}' has an empty command", self.name));
            }
        }

        Ok(())
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            state_dir: None,
            timeout_ms: default_timeout(),
            blocking: false,
            debug: false,
            capture_git: true,
            retry_queue: RetryQueueConfig::default(),
            event_log: EventLogConfig::default(),
            handlers: Vec::new(),
        }
    }
}

impl Default for RetryQueueConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: default_max_retries(),
            drain_limit: default_drain_limit(),
            dead_letter: false,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_client_id() -> String {
    "default".to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_drain_limit() -> usize {
    DEFAULT_DRAIN_LIMIT
}

fn default_command_timeout() -> u64 {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serialization() {
        let config = DispatchConfig::default();
        let toml = config.to_toml().unwrap();
        let parsed = DispatchConfig::from_toml(&toml).unwrap();

        assert_eq!(parsed.client_id, "default");
        assert_eq!(parsed.timeout_ms, 30_000);
        assert!(!parsed.blocking);
        assert!(!parsed.retry_queue.enabled);
        assert_eq!(parsed.retry_queue.max_retries, 3);
        assert_eq!(parsed.retry_queue.drain_limit, DEFAULT_DRAIN_LIMIT);
    }

    #[test]
    fn test_parse_handlers() {
        let config = DispatchConfig::from_toml(
            r#"
            client_id = "guard"
            blocking = true

            [retry_queue]
            enabled = true
            drain_limit = 5

            [[handlers]]
            name = "no-rm"
            events = ["PreToolUse"]
            matcher = "^Bash$"
            type = "builtin"
            handler_name = "command_guard"
            settings = { deny = ["rm -rf"] }

            [[handlers]]
            name = "notify"
            events = ["Stop", "SessionEnd"]
            type = "command"
            command = "notify-send"
            args = ["done"]
            "#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.client_id, "guard");
        assert_eq!(config.retry_queue.drain_limit, 5);
        assert_eq!(config.retry_queue.max_retries, 3);
        assert_eq!(config.handlers.len(), 2);
        assert!(matches!(config.handlers[0].kind, HandlerKind::Builtin(ref b) if b.handler_name == "command_guard"));
        match &config.handlers[1].kind {
            HandlerKind::Command(cmd) => {
                assert_eq!(cmd.command, "notify-send");
                assert_eq!(cmd.timeout_ms, 10_000);
            }
            other => panic!("unexpected kind {:?}", other),
        }
        assert_eq!(config.handlers[1].events, vec![HookEventKind::Stop, HookEventKind::SessionEnd]);
    }

    #[test]
    fn test_handler_validation() {
        let mut handler = HandlerConfig {
            name: "test".to_string(),
            events: vec![HookEventKind::PreToolUse],
            enabled: true,
            matcher: Some("^(Edit|Write)$".to_string()),
            kind: HandlerKind::Command(ExternalCommandConfig {
                command: "true".to_string(),
                args: Vec::new(),
                env: HashMap::new(),
                timeout_ms: 1000,
            }),
        };

        assert!(handler.validate().is_ok());

        handler.matcher = Some("(".to_string());
        assert!(handler.validate().is_err());

        handler.matcher = None;
        handler.name.clear();
        assert!(handler.validate().is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut config = DispatchConfig::default();
        let handler = HandlerConfig {
            name: "same".to_string(),
            events: vec![HookEventKind::Stop],
            enabled: true,
            matcher: None,
            kind: HandlerKind::Builtin(BuiltInConfig {
                handler_name: "logging".to_string(),
                settings: HashMap::new(),
            }),
        };
        config.handlers = vec![handler.clone(), handler];
        assert!(config.validate().unwrap_err().contains("Duplicate"));
    }

    #[test]
    fn test_state_paths() {
        let paths = StatePaths::new(Path::new("/state"), "my ext/../x");
        assert_eq!(paths.root(), Path::new("/state/my_ext____x"));
        assert_eq!(paths.queue_file(), PathBuf::from("/state/my_ext____x/failed-events.jsonl"));
        assert_eq!(StatePaths::new(Path::new("/s"), "").root(), Path::new("/s/default"));
    }
}
