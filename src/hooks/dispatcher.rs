//! Per-invocation dispatch pipeline
//!
//! A [`Dispatcher`] handles exactly one event: it drains the retry backlog,
//! enriches the event from the context store, runs the registered handlers
//! in order under a time budget, and turns the merged result into a
//! [`DispatchOutcome`] for the binary to write out.

use crate::hooks::config::{DispatchConfig, StatePaths};
use crate::hooks::context::ContextStore;
use crate::hooks::event_log::{EventLog, OutputMetadata};
use crate::hooks::git::CommandGitCollector;
use crate::hooks::handlers::build_handler;
use crate::hooks::plugin::{HookPlugin, PluginSet};
use crate::hooks::queue::{BacklogObserver, DrainReport, QueueStatus, RetryQueue};
use crate::hooks::registry::HandlerRegistry;
use crate::hooks::transcript::TranscriptReader;
use crate::hooks::{
    ChainControl, HandlerResult, HookError, HookEvent, HookResult, EXIT_ERROR, EXIT_SUCCESS,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Default budget for one dispatch
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Default number of queued events redelivered per invocation
pub const DEFAULT_DRAIN_LIMIT: usize = 10;

/// What the process should write and how it should exit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub exit_code: i32,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl DispatchOutcome {
    /// Exit 0 with no output
    pub fn neutral() -> Self {
        Self::default()
    }
}

/// Runs one event through the handler chain
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    plugins: PluginSet,
    context: Option<ContextStore>,
    queue: Option<RetryQueue>,
    event_log: Option<EventLog>,

    /// Zero disables the budget
    timeout: Duration,
    blocking: bool,
    drain_limit: usize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(Arc::new(HandlerRegistry::new()))
    }
}

impl Dispatcher {
    /// Create a dispatcher with no state files over `registry`
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            plugins: PluginSet::new(),
            context: None,
            queue: None,
            event_log: None,
            timeout: DEFAULT_TIMEOUT,
            blocking: false,
            drain_limit: DEFAULT_DRAIN_LIMIT,
        }
    }

    /// Build a dispatcher, its handlers and its state files from configuration
    pub fn from_config(config: &DispatchConfig, paths: &StatePaths) -> HookResult<Self> {
        config.validate().map_err(HookError::invalid_config)?;

        let registry = HandlerRegistry::new();
        for handler_config in config.enabled_handlers() {
            let handler = build_handler(handler_config)?;
            registry.register_arc(&handler_config.events, handler)?;
        }

        let mut context = ContextStore::new(paths.context_file(), paths.repo_instances_file());
        if config.capture_git {
            context = context.with_git_collector(Arc::new(CommandGitCollector));
        }

        let mut dispatcher = Self::new(Arc::new(registry))
            .with_context_store(context)
            .with_timeout(Duration::from_millis(config.timeout_ms))
            .with_blocking(config.blocking)
            .with_drain_limit(config.retry_queue.drain_limit);

        if config.retry_queue.enabled {
            let mut queue = RetryQueue::new(paths.queue_file(), config.retry_queue.max_retries);
            if config.retry_queue.dead_letter {
                queue = queue.with_dead_letter(paths.dead_letter_file());
            }
            dispatcher = dispatcher.with_retry_queue(queue);
        }

        if config.event_log.enabled {
            let path = config
                .event_log
                .path
                .clone()
                .unwrap_or_else(|| paths.event_log_file());
            dispatcher = dispatcher.with_event_log(EventLog::new(path));
        }

        Ok(dispatcher)
    }

    pub fn with_context_store(mut self, store: ContextStore) -> Self {
        self.context = Some(store);
        self
    }

    pub fn with_retry_queue(mut self, queue: RetryQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.event_log = Some(log);
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn HookPlugin>) -> Self {
        self.plugins.register(plugin);
        self
    }

    /// Observe the backlog before each drain; no-op without a retry queue
    pub fn with_backlog_observer(mut self, observer: BacklogObserver) -> Self {
        self.queue = self.queue.map(|q| q.with_backlog_observer(observer));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn with_drain_limit(mut self, limit: usize) -> Self {
        self.drain_limit = limit;
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn context_store(&self) -> Option<&ContextStore> {
        self.context.as_ref()
    }

    pub fn retry_queue(&self) -> Option<&RetryQueue> {
        self.queue.as_ref()
    }

    /// Read one event from `reader` and dispatch it
    pub async fn run_from_reader<R: AsyncRead + Unpin>(&self, mut reader: R) -> DispatchOutcome {
        let mut input = String::new();
        if let Err(e) = reader.read_to_string(&mut input).await {
            warn!("Failed to read event from stdin: {}", e);
            return DispatchOutcome::neutral();
        }
        self.run_from_str(&input).await
    }

    /// Parse one event and dispatch it; unparseable input is ignored
    pub async fn run_from_str(&self, input: &str) -> DispatchOutcome {
        match HookEvent::from_json(input) {
            Ok(event) => self.dispatch(event).await,
            Err(e) => {
                warn!("Ignoring malformed event: {}", HookError::InvalidEvent(e.to_string()));
                DispatchOutcome::neutral()
            }
        }
    }

    /// Handle one event start to finish
    pub async fn dispatch(&self, event: HookEvent) -> DispatchOutcome {
        if let Some(queue) = &self.queue {
            let backlog = match self.drain_queue(self.drain_limit).await {
                Ok(report) => report.remaining,
                Err(e) => {
                    warn!("Retry queue drain failed: {}", e);
                    // Undrained records still go first unless the queue is provably empty
                    queue.len().unwrap_or_else(|e| {
                        warn!("Retry queue unreadable: {}", e);
                        usize::MAX
                    })
                }
            };

            if backlog > 0 {
                info!(
                    kind = %event.event_name(),
                    backlog,
                    "Backlog remains, queueing event behind it"
                );
                if let Err(e) = queue.enqueue(&event, "queued behind backlog").await {
                    warn!("Failed to queue event: {}", e);
                }
                return DispatchOutcome::neutral();
            }
        }

        match self.run(&event).await {
            Ok(merged) => self.complete(merged),
            Err(e) => self.fail(&event, e).await,
        }
    }

    /// Redeliver up to `limit` queued events
    pub async fn drain_queue(&self, limit: usize) -> HookResult<DrainReport> {
        let queue = match &self.queue {
            Some(queue) => queue,
            None => return Ok(DrainReport::default()),
        };

        queue
            .drain(limit, |event| async move { self.run(&event).await.map(|_| ()) })
            .await
    }

    /// Backlog size and entries; `None` without a retry queue
    pub fn queue_status(&self) -> HookResult<Option<QueueStatus>> {
        self.queue.as_ref().map(RetryQueue::status).transpose()
    }

    /// Process one event under the time budget
    async fn run(&self, event: &HookEvent) -> HookResult<HandlerResult> {
        if self.timeout.is_zero() {
            return self.process(event).await;
        }

        match timeout(self.timeout, self.process(event)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(kind = %event.event_name(), "Dispatch timed out after {:?}", self.timeout);
                Err(HookError::timeout(self.timeout))
            }
        }
    }

    /// Enrich, run plugins and handlers, record
    async fn process(&self, event: &HookEvent) -> HookResult<HandlerResult> {
        let start = Instant::now();

        let enriched = match &self.context {
            Some(store) => store.enrich(event).await,
            None => event.clone(),
        };

        let handlers = self.registry.handlers_for(enriched.kind());
        if handlers.is_empty() {
            debug!(kind = %enriched.event_name(), "No handlers registered");
            return Ok(HandlerResult::success());
        }

        let transcript_line = self.transcript_line(&enriched);
        let enriched = transcript_line
            .as_ref()
            .and_then(|line| enriched.backfill_turn_metrics(line))
            .unwrap_or(enriched);

        self.plugins
            .run_before(&enriched, transcript_line.as_ref())
            .await;

        let mut merged = HandlerResult::success();
        let mut handlers_run = 0;
        for handler in handlers {
            if !handler.should_run(&enriched) {
                debug!(handler = handler.name(), "Handler skipped");
                continue;
            }

            handlers_run += 1;
            let result = handler.execute(&enriched).await.map_err(|e| match e {
                e @ HookError::HandlerFailed { .. } => e,
                other => HookError::handler_failed(handler.name(), other),
            })?;

            debug!(handler = handler.name(), exit_code = result.exit_code, "Handler finished");
            if merged.absorb(result) == ChainControl::Stop {
                debug!(handler = handler.name(), "Handler stopped the chain");
                break;
            }
        }

        self.plugins
            .run_after(&enriched, &merged, transcript_line.as_ref())
            .await;

        if let Some(log) = &self.event_log {
            let elapsed = start.elapsed().as_millis() as u64;
            log.record(
                &enriched,
                transcript_line.as_ref(),
                OutputMetadata::from_result(&merged, handlers_run, elapsed),
            );
        }

        Ok(merged)
    }

    fn transcript_line(&self, event: &HookEvent) -> Option<Value> {
        if event.transcript_path.as_os_str().is_empty() {
            return None;
        }

        TranscriptReader::new(&event.transcript_path)
            .last_line()
            .unwrap_or_else(|e| {
                debug!("Transcript unavailable: {}", e);
                None
            })
    }

    fn complete(&self, merged: HandlerResult) -> DispatchOutcome {
        let stdout = match &merged.output {
            Some(output) => match serde_json::to_string(output) {
                Ok(json) => Some(json),
                Err(e) => {
                    warn!("Failed to serialize structured output: {}", e);
                    merged.stdout.clone()
                }
            },
            None => merged.stdout.clone(),
        };

        DispatchOutcome {
            exit_code: if self.blocking {
                merged.exit_code
            } else {
                EXIT_SUCCESS
            },
            stdout: stdout.filter(|s| !s.is_empty()),
            stderr: merged.stderr.filter(|s| !s.is_empty()),
        }
    }

    async fn fail(&self, event: &HookEvent, error: HookError) -> DispatchOutcome {
        warn!(kind = %event.event_name(), "Dispatch failed: {}", error);

        if let Some(queue) = &self.queue {
            if let Err(e) = queue.enqueue(event, error.to_string()).await {
                warn!("Failed to queue event for retry: {}", e);
            }
        }

        if self.blocking {
            DispatchOutcome {
                exit_code: EXIT_ERROR,
                stdout: None,
                stderr: Some(error.to_string()),
            }
        } else {
            DispatchOutcome::neutral()
        }
    }
}
