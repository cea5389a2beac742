//! Append-only log of handled events

use crate::hooks::persist;
use crate::hooks::{HandlerResult, HookEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::warn;

/// What the handler chain produced, without the text itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputMetadata {
    pub exit_code: i32,
    pub has_stdout: bool,
    pub has_stderr: bool,
    pub has_output: bool,
    pub handlers_run: usize,
    pub duration_ms: u64,
}

impl OutputMetadata {
    pub fn from_result(result: &HandlerResult, handlers_run: usize, duration_ms: u64) -> Self {
        Self {
            exit_code: result.exit_code,
            has_stdout: result.stdout.as_ref().is_some_and(|s| !s.is_empty()),
            has_stderr: result.stderr.as_ref().is_some_and(|s| !s.is_empty()),
            has_output: result.output.is_some(),
            handlers_run,
            duration_ms,
        }
    }
}

/// One line of the event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogRecord {
    pub timestamp: DateTime<Utc>,

    /// The event without its enrichment
    pub event: HookEvent,

    pub transcript_line: Option<Value>,

    pub output: OutputMetadata,
}

/// Line-delimited JSON log file
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. Failures are logged and swallowed.
    pub fn record(&self, event: &HookEvent, transcript_line: Option<&Value>, output: OutputMetadata) {
        let record = EventLogRecord {
            timestamp: Utc::now(),
            event: event.without_context(),
            transcript_line: transcript_line.cloned(),
            output,
        };

        let written = serde_json::to_string(&record)
            .map_err(crate::hooks::HookError::from)
            .and_then(|line| persist::append_line(&self.path, &line));

        if let Err(e) = written {
            warn!("Failed to write event log {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{EventContext, EventPayload};
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_record_strips_enrichment() {
        let dir = TempDir::new().unwrap();
        let log = EventLog::new(dir.path().join("logs").join("events.jsonl"));

        let event = HookEvent::new("s1", "/t", "/w", EventPayload::Notification { message: "m".into() })
            .with_context(EventContext {
                transaction_id: Some("tx".into()),
                ..EventContext::default()
            });
        let result = HandlerResult::success().with_stdout("hello");

        log.record(&event, Some(&json!({"n": 1})), OutputMetadata::from_result(&result, 2, 5));
        log.record(&event, None, OutputMetadata::from_result(&HandlerResult::success(), 0, 1));

        let content = std::fs::read_to_string(log.path()).unwrap();
        let records: Vec<EventLogRecord> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(records.len(), 2);
        assert!(records[0].event.context.is_none());
        assert_eq!(records[0].transcript_line, Some(json!({"n": 1})));
        assert!(records[0].output.has_stdout);
        assert_eq!(records[0].output.handlers_run, 2);
        assert!(!records[1].output.has_stdout);
    }

    #[test]
    fn test_unwritable_log_is_swallowed() {
        let dir = TempDir::new().unwrap();
        let log = EventLog::new(dir.path());
        let event = HookEvent::new(
            "s1",
            "/t",
            "/w",
            EventPayload::Other {
                hook_event_name: "SubagentStart".into(),
            },
        );
        log.record(
            &event,
            None,
            OutputMetadata::from_result(&HandlerResult::success(), 0, 0),
        );
    }
}
