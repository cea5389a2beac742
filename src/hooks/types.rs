//! Core types for the dispatch pipeline

use crate::hooks::git::GitMetadata;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

/// Exit code for a successful handler
pub const EXIT_SUCCESS: i32 = 0;

/// Canonical exit code for a generic handler error
pub const EXIT_ERROR: i32 = 1;

/// Reserved exit code telling the host not to proceed
pub const EXIT_BLOCKING: i32 = 2;

/// Discriminator for the lifecycle notification that started this process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookEventKind {
    PreToolUse,
    PostToolUse,
    UserPromptSubmit,
    Stop,
    SubagentStop,
    SessionStart,
    SessionEnd,
    Notification,
    PreCompact,
    Other,
}

impl HookEventKind {
    /// Get all kinds the host is known to emit
    pub fn all() -> Vec<Self> {
        vec![
            Self::PreToolUse,
            Self::PostToolUse,
            Self::UserPromptSubmit,
            Self::Stop,
            Self::SubagentStop,
            Self::SessionStart,
            Self::SessionEnd,
            Self::Notification,
            Self::PreCompact,
        ]
    }

    /// The `hook_event_name` the host uses for this kind
    pub fn name(&self) -> &'static str {
        match self {
            Self::PreToolUse => "PreToolUse",
            Self::PostToolUse => "PostToolUse",
            Self::UserPromptSubmit => "UserPromptSubmit",
            Self::Stop => "Stop",
            Self::SubagentStop => "SubagentStop",
            Self::SessionStart => "SessionStart",
            Self::SessionEnd => "SessionEnd",
            Self::Notification => "Notification",
            Self::PreCompact => "PreCompact",
            Self::Other => "Other",
        }
    }

    /// Look up a known kind by its `hook_event_name`
    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for HookEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind-specific fields, tagged by `hook_event_name`
///
/// Names the host emits that are not modelled here land in `Other`, which
/// keeps the original name. The fields of such events live in
/// [`HookEvent::extra`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "hook_event_name")]
pub enum EventPayload {
    PreToolUse {
        tool_name: String,
        #[serde(default)]
        tool_input: Value,
    },
    PostToolUse {
        tool_name: String,
        #[serde(default)]
        tool_input: Value,
        #[serde(default)]
        tool_response: Value,
    },
    UserPromptSubmit {
        prompt: String,
    },
    Stop {
        #[serde(default)]
        stop_hook_active: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    SubagentStop {
        #[serde(default)]
        stop_hook_active: bool,
    },
    SessionStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },
    SessionEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Notification {
        #[serde(default)]
        message: String,
    },
    PreCompact {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trigger: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        custom_instructions: Option<String>,
    },
    #[serde(skip)]
    Other { hook_event_name: String },
}

/// Correlation data attached to an event by the context store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventContext {
    /// Correlation id for the current session, if one was started
    pub transaction_id: Option<String>,

    /// Id of the most recent prompt
    pub prompt_id: Option<String>,

    /// Repository metadata for the working directory
    pub git: Option<GitMetadata>,

    /// Files edited since the last prompt; only present on turn-finished events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_files: Option<Vec<String>>,
}

/// Fields every event carries, read ahead of the kind-specific payload
#[derive(Deserialize)]
struct EventHeader {
    session_id: String,
    transcript_path: PathBuf,
    cwd: PathBuf,
    #[serde(default)]
    permission_mode: Option<String>,
    #[serde(default)]
    context: Option<EventContext>,
}

/// One notification read from the host.
///
/// Serializes back to the object the host sent: typed fields are written
/// over `extra`, and `context` is added on top.
#[derive(Debug, Clone, PartialEq)]
pub struct HookEvent {
    pub session_id: String,

    pub transcript_path: PathBuf,

    pub cwd: PathBuf,

    pub permission_mode: Option<String>,

    pub payload: EventPayload,

    /// Host fields the typed view does not model, kept verbatim
    pub extra: Map<String, Value>,

    /// Enrichment added by the dispatcher
    pub context: Option<EventContext>,
}

impl Serialize for HookEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_map()
            .map_err(<S::Error as serde::ser::Error>::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for HookEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        Self::from_map(map).map_err(<D::Error as serde::de::Error>::custom)
    }
}

impl HookEvent {
    /// Create an event with no enrichment
    pub fn new(
        session_id: impl Into<String>,
        transcript_path: impl Into<PathBuf>,
        cwd: impl Into<PathBuf>,
        payload: EventPayload,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            transcript_path: transcript_path.into(),
            cwd: cwd.into(),
            permission_mode: None,
            payload,
            extra: Map::new(),
            context: None,
        }
    }

    fn from_map(mut map: Map<String, Value>) -> Result<Self, serde_json::Error> {
        let header: EventHeader = serde_json::from_value(Value::Object(map.clone()))?;
        let name = match map.get("hook_event_name").and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None => {
                return Err(serde::de::Error::missing_field("hook_event_name"));
            }
        };

        let payload = match HookEventKind::from_name(&name) {
            Some(_) => serde_json::from_value(Value::Object(map.clone()))?,
            None => EventPayload::Other {
                hook_event_name: name,
            },
        };

        let mut event = Self {
            session_id: header.session_id,
            transcript_path: header.transcript_path,
            cwd: header.cwd,
            permission_mode: header.permission_mode,
            payload,
            extra: Map::new(),
            context: header.context,
        };

        let typed = event.to_map()?;
        map.retain(|key, _| key != "context" && !typed.contains_key(key));
        event.extra = map;
        Ok(event)
    }

    fn to_map(&self) -> Result<Map<String, Value>, serde_json::Error> {
        let mut map = self.extra.clone();
        map.insert("session_id".into(), Value::String(self.session_id.clone()));
        map.insert(
            "transcript_path".into(),
            serde_json::to_value(&self.transcript_path)?,
        );
        map.insert("cwd".into(), serde_json::to_value(&self.cwd)?);
        if let Some(mode) = &self.permission_mode {
            map.insert("permission_mode".into(), Value::String(mode.clone()));
        }

        match &self.payload {
            EventPayload::Other { hook_event_name } => {
                map.insert(
                    "hook_event_name".into(),
                    Value::String(hook_event_name.clone()),
                );
            }
            payload => {
                if let Value::Object(fields) = serde_json::to_value(payload)? {
                    map.extend(fields);
                }
            }
        }

        if let Some(context) = &self.context {
            map.insert("context".into(), serde_json::to_value(context)?);
        }
        Ok(map)
    }

    /// Parse a single event from raw stdin contents
    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }

    /// Get the event kind
    pub fn kind(&self) -> HookEventKind {
        match self.payload {
            EventPayload::PreToolUse { .. } => HookEventKind::PreToolUse,
            EventPayload::PostToolUse { .. } => HookEventKind::PostToolUse,
            EventPayload::UserPromptSubmit { .. } => HookEventKind::UserPromptSubmit,
            EventPayload::Stop { .. } => HookEventKind::Stop,
            EventPayload::SubagentStop { .. } => HookEventKind::SubagentStop,
            EventPayload::SessionStart { .. } => HookEventKind::SessionStart,
            EventPayload::SessionEnd { .. } => HookEventKind::SessionEnd,
            EventPayload::Notification { .. } => HookEventKind::Notification,
            EventPayload::PreCompact { .. } => HookEventKind::PreCompact,
            EventPayload::Other { .. } => HookEventKind::Other,
        }
    }

    /// The `hook_event_name` as the host sent it
    pub fn event_name(&self) -> &str {
        match &self.payload {
            EventPayload::Other { hook_event_name } => hook_event_name,
            _ => self.kind().name(),
        }
    }

    /// Tool name for tool events
    pub fn tool_name(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::PreToolUse { tool_name, .. }
            | EventPayload::PostToolUse { tool_name, .. } => Some(tool_name),
            _ => None,
        }
    }

    /// Tool input for tool events
    pub fn tool_input(&self) -> Option<&Value> {
        match &self.payload {
            EventPayload::PreToolUse { tool_input, .. }
            | EventPayload::PostToolUse { tool_input, .. } => Some(tool_input),
            _ => None,
        }
    }

    /// A copy of this event carrying the given enrichment
    pub fn with_context(&self, context: EventContext) -> Self {
        Self {
            context: Some(context),
            ..self.clone()
        }
    }

    /// A copy of this event with the enrichment removed
    pub fn without_context(&self) -> Self {
        Self {
            context: None,
            ..self.clone()
        }
    }

    /// Fill in `usage`/`model` on a turn-finished event from a transcript line.
    ///
    /// Returns `None` when nothing was missing or the line has nothing to offer;
    /// values the host supplied are never replaced.
    pub fn backfill_turn_metrics(&self, transcript_line: &Value) -> Option<Self> {
        let (stop_hook_active, usage, model) = match &self.payload {
            EventPayload::Stop {
                stop_hook_active,
                usage,
                model,
            } => (*stop_hook_active, usage, model),
            _ => return None,
        };

        if usage.is_some() && model.is_some() {
            return None;
        }

        let message = transcript_line.get("message");
        let line_usage = message.and_then(|m| m.get("usage")).filter(|u| !u.is_null());
        let line_model = message
            .and_then(|m| m.get("model"))
            .and_then(|m| m.as_str());

        let new_usage = usage.clone().or_else(|| line_usage.cloned());
        let new_model = model.clone().or_else(|| line_model.map(str::to_string));

        if &new_usage == usage && &new_model == model {
            return None;
        }

        Some(Self {
            payload: EventPayload::Stop {
                stop_hook_active,
                usage: new_usage,
                model: new_model,
            },
            ..self.clone()
        })
    }
}

/// Whether the handler chain should keep going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainControl {
    Continue,
    Stop,
}

/// Outcome of one handler, and the running merge of a handler chain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandlerResult {
    /// 0 success, 2 blocking, anything else a generic error
    pub exit_code: i32,

    /// Text for the host's stdout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,

    /// Text for the host's stderr
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,

    /// Structured output, written to stdout as JSON in preference to text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl HandlerResult {
    /// Create a neutral success result
    pub fn success() -> Self {
        Self::default()
    }

    /// Create a blocking result with a message for the host
    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            exit_code: EXIT_BLOCKING,
            stderr: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Create a generic error result
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: EXIT_ERROR,
            stderr: Some(message.into()),
            ..Self::default()
        }
    }

    /// Set the exit code
    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }

    /// Set stdout text
    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = Some(stdout.into());
        self
    }

    /// Set stderr text
    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = Some(stderr.into());
        self
    }

    /// Set structured output
    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    /// Whether this result carries the reserved blocking code
    pub fn is_blocking(&self) -> bool {
        self.exit_code == EXIT_BLOCKING
    }

    /// Whether the structured output asks the host to stop (`"continue": false`)
    pub fn requests_stop(&self) -> bool {
        self.output
            .as_ref()
            .and_then(|o| o.get("continue"))
            .and_then(Value::as_bool)
            == Some(false)
    }

    /// Fold the next handler's result into this one.
    ///
    /// Non-zero exit codes overwrite, zero never erases. Text and structured
    /// output are replaced field by field, only by non-empty values.
    pub fn absorb(&mut self, next: HandlerResult) -> ChainControl {
        let control = if next.is_blocking() || next.requests_stop() {
            ChainControl::Stop
        } else {
            ChainControl::Continue
        };

        if next.exit_code != EXIT_SUCCESS {
            self.exit_code = next.exit_code;
        }
        if let Some(stdout) = next.stdout.filter(|s| !s.is_empty()) {
            self.stdout = Some(stdout);
        }
        if let Some(stderr) = next.stderr.filter(|s| !s.is_empty()) {
            self.stderr = Some(stderr);
        }
        if let Some(output) = next.output.filter(|o| !is_empty_value(o)) {
            self.output = Some(output);
        }

        control
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_parsing() {
        let event = HookEvent::from_json(
            r#"{
                "session_id": "s1",
                "transcript_path": "/tmp/t.jsonl",
                "cwd": "/work",
                "hook_event_name": "PreToolUse",
                "tool_name": "Bash",
                "tool_input": {"command": "ls"}
            }"#,
        )
        .unwrap();

        assert_eq!(event.kind(), HookEventKind::PreToolUse);
        assert_eq!(event.tool_name(), Some("Bash"));
        assert_eq!(event.tool_input().unwrap()["command"], "ls");
        assert!(event.context.is_none());
    }

    #[test]
    fn test_unknown_kind_parses_as_other() {
        let event = HookEvent::from_json(
            r#"{"session_id":"s","transcript_path":"t","cwd":"c","hook_event_name":"SomethingNew","extra":1}"#,
        )
        .unwrap();
        assert_eq!(event.kind(), HookEventKind::Other);
        assert_eq!(event.event_name(), "SomethingNew");

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["hook_event_name"], "SomethingNew");
        assert_eq!(value["extra"], 1);
        assert_eq!(HookEvent::from_json(&value.to_string()).unwrap(), event);
    }

    #[test]
    fn test_unmodelled_fields_survive() {
        let event = HookEvent::from_json(
            r#"{
                "session_id": "s1",
                "transcript_path": "/t",
                "cwd": "/w",
                "hook_event_name": "PreToolUse",
                "tool_name": "Bash",
                "tool_input": {"command": "ls"},
                "tool_use_id": "toolu_123"
            }"#,
        )
        .unwrap();
        assert_eq!(event.extra.get("tool_use_id"), Some(&json!("toolu_123")));
        assert!(!event.extra.contains_key("tool_name"));

        let enriched = event.with_context(EventContext::default());
        let value = serde_json::to_value(&enriched).unwrap();
        assert_eq!(value["tool_use_id"], "toolu_123");
        assert_eq!(value["tool_name"], "Bash");
        assert!(value.get("context").is_some());
    }

    #[test]
    fn test_known_kind_names() {
        for kind in HookEventKind::all() {
            assert_eq!(HookEventKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(HookEventKind::from_name("Other"), None);
    }

    #[test]
    fn test_missing_required_fields_fail() {
        assert!(HookEvent::from_json(r#"{"hook_event_name":"Stop"}"#).is_err());
        assert!(HookEvent::from_json("not json").is_err());
    }

    #[test]
    fn test_context_is_additive() {
        let event = HookEvent::new(
            "s1",
            "/t",
            "/w",
            EventPayload::UserPromptSubmit { prompt: "hi".into() },
        );
        let enriched = event.with_context(EventContext {
            transaction_id: Some("tx".into()),
            ..EventContext::default()
        });

        let value = serde_json::to_value(&enriched).unwrap();
        assert_eq!(value["hook_event_name"], "UserPromptSubmit");
        assert_eq!(value["prompt"], "hi");
        assert_eq!(value["context"]["transaction_id"], "tx");
        assert_eq!(enriched.without_context(), event);
    }

    #[test]
    fn test_backfill_keeps_host_values() {
        let event = HookEvent::new(
            "s1",
            "/t",
            "/w",
            EventPayload::Stop {
                stop_hook_active: false,
                usage: None,
                model: Some("host-model".into()),
            },
        );
        let line = json!({"message": {"model": "transcript-model", "usage": {"input_tokens": 3}}});

        let filled = event.backfill_turn_metrics(&line).unwrap();
        match filled.payload.clone() {
            EventPayload::Stop { usage, model, .. } => {
                assert_eq!(usage, Some(json!({"input_tokens": 3})));
                assert_eq!(model.as_deref(), Some("host-model"));
            }
            other => panic!("unexpected payload {:?}", other),
        }

        assert!(filled.backfill_turn_metrics(&line).is_none());
    }

    #[test]
    fn test_absorb_merge_rules() {
        let mut merged = HandlerResult::success();
        assert_eq!(
            merged.absorb(HandlerResult::success().with_stdout("a")),
            ChainControl::Continue
        );
        assert_eq!(
            merged.absorb(HandlerResult::error("boom")),
            ChainControl::Continue
        );
        assert_eq!(
            merged.absorb(HandlerResult::success().with_stdout("")),
            ChainControl::Continue
        );

        assert_eq!(merged.exit_code, 1);
        assert_eq!(merged.stdout.as_deref(), Some("a"));
        assert_eq!(merged.stderr.as_deref(), Some("boom"));
    }

    #[test]
    fn test_absorb_stops_on_block_or_continue_false() {
        let mut merged = HandlerResult::success();
        assert_eq!(merged.absorb(HandlerResult::block("no")), ChainControl::Stop);
        assert!(merged.is_blocking());

        let mut merged = HandlerResult::success();
        let control = merged.absorb(HandlerResult::success().with_output(json!({"continue": false})));
        assert_eq!(control, ChainControl::Stop);
        assert_eq!(merged.exit_code, 0);
    }
}
