//! Plugin observers around the handler chain
//!
//! Plugins see every dispatched event before and after the handlers run. A
//! plugin failure, including a panic, is captured as a [`PluginOutcome`] and
//! logged; it never aborts the pipeline.

use crate::hooks::{HandlerResult, HookEvent, HookResult};
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

/// Pipeline phase a plugin ran in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginPhase {
    Before,
    After,
}

/// Observer of dispatched events
#[async_trait]
pub trait HookPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Called before the first handler runs
    async fn before(&self, _event: &HookEvent, _transcript_line: Option<&Value>) -> HookResult<()> {
        Ok(())
    }

    /// Called with the merged result after the last handler ran
    async fn after(
        &self,
        _event: &HookEvent,
        _result: &HandlerResult,
        _transcript_line: Option<&Value>,
    ) -> HookResult<()> {
        Ok(())
    }
}

/// What happened when one plugin ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginOutcome {
    Completed,
    Failed(String),
    Panicked(String),
}

impl PluginOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Plugins in registration order
#[derive(Default, Clone)]
pub struct PluginSet {
    plugins: Vec<Arc<dyn HookPlugin>>,
}

impl PluginSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn HookPlugin>) {
        self.plugins.push(plugin);
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Run every plugin's `before` hook in order
    pub async fn run_before(
        &self,
        event: &HookEvent,
        transcript_line: Option<&Value>,
    ) -> Vec<PluginOutcome> {
        let mut outcomes = Vec::with_capacity(self.plugins.len());
        for plugin in &self.plugins {
            let call = plugin.before(event, transcript_line);
            outcomes.push(isolate(plugin.name(), PluginPhase::Before, call).await);
        }
        outcomes
    }

    /// Run every plugin's `after` hook in order
    pub async fn run_after(
        &self,
        event: &HookEvent,
        result: &HandlerResult,
        transcript_line: Option<&Value>,
    ) -> Vec<PluginOutcome> {
        let mut outcomes = Vec::with_capacity(self.plugins.len());
        for plugin in &self.plugins {
            let call = plugin.after(event, result, transcript_line);
            outcomes.push(isolate(plugin.name(), PluginPhase::After, call).await);
        }
        outcomes
    }
}

async fn isolate<F>(name: &str, phase: PluginPhase, call: F) -> PluginOutcome
where
    F: std::future::Future<Output = HookResult<()>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(())) => PluginOutcome::Completed,
        Ok(Err(e)) => {
            warn!(plugin = name, ?phase, "Plugin failed: {}", e);
            PluginOutcome::Failed(e.to_string())
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!(plugin = name, ?phase, "Plugin panicked: {}", message);
            PluginOutcome::Panicked(message)
        }
    }
}

/// Plugin that traces each event and its merged result
pub struct TracingPlugin;

#[async_trait]
impl HookPlugin for TracingPlugin {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn before(&self, event: &HookEvent, transcript_line: Option<&Value>) -> HookResult<()> {
        debug!(
            kind = %event.kind(),
            session_id = %event.session_id,
            has_transcript_line = transcript_line.is_some(),
            "Dispatching event"
        );
        Ok(())
    }

    async fn after(
        &self,
        event: &HookEvent,
        result: &HandlerResult,
        _transcript_line: Option<&Value>,
    ) -> HookResult<()> {
        debug!(
            kind = %event.kind(),
            exit_code = result.exit_code,
            has_output = result.output.is_some(),
            "Dispatched event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{EventPayload, HookError};
    use std::sync::Mutex;
    use tracing_test::traced_test;

    struct Recorder {
        name: String,
        calls: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl HookPlugin for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn before(&self, _event: &HookEvent, _line: Option<&Value>) -> HookResult<()> {
            self.calls.lock().unwrap().push(format!("{}:before", self.name));
            if self.fail {
                return Err(HookError::custom("plugin broke"));
            }
            Ok(())
        }

        async fn after(
            &self,
            _event: &HookEvent,
            _result: &HandlerResult,
            _line: Option<&Value>,
        ) -> HookResult<()> {
            self.calls.lock().unwrap().push(format!("{}:after", self.name));
            Ok(())
        }
    }

    struct Panicker;

    #[async_trait]
    impl HookPlugin for Panicker {
        fn name(&self) -> &str {
            "panicker"
        }

        async fn before(&self, _event: &HookEvent, _line: Option<&Value>) -> HookResult<()> {
            panic!("observer exploded");
        }
    }

    fn event() -> HookEvent {
        HookEvent::new("s1", "/t", "/w", EventPayload::Notification { message: "m".into() })
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failures_are_isolated_and_order_kept() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut plugins = PluginSet::new();
        plugins.register(Arc::new(Recorder {
            name: "a".into(),
            calls: calls.clone(),
            fail: true,
        }));
        plugins.register(Arc::new(Panicker));
        plugins.register(Arc::new(Recorder {
            name: "b".into(),
            calls: calls.clone(),
            fail: false,
        }));

        let outcomes = plugins.run_before(&event(), None).await;
        assert_eq!(
            outcomes,
            vec![
                PluginOutcome::Failed("plugin broke".into()),
                PluginOutcome::Panicked("observer exploded".into()),
                PluginOutcome::Completed,
            ]
        );

        let outcomes = plugins
            .run_after(&event(), &HandlerResult::success(), None)
            .await;
        assert!(outcomes.iter().all(PluginOutcome::is_completed));

        assert_eq!(
            *calls.lock().unwrap(),
            vec!["a:before", "b:before", "a:after", "b:after"]
        );
        assert!(logs_contain("Plugin panicked"));
    }
}
