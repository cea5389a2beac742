//! Hook handler traits and implementations

use crate::hooks::{HandlerResult, HookError, HookEvent, HookResult};
use async_trait::async_trait;
use std::sync::Arc;

/// Trait for synchronous hook handlers
pub trait HookHandler: Send + Sync {
    /// Handle one enriched event
    fn execute(&self, event: &HookEvent) -> HookResult<HandlerResult>;

    /// Get the handler name
    fn name(&self) -> &str;

    /// Check if the handler should run for the given event
    fn should_run(&self, _event: &HookEvent) -> bool {
        true
    }
}

/// Trait for asynchronous hook handlers
///
/// Handlers may be abandoned mid-flight when the dispatch deadline passes, so
/// they must not rely on running to completion.
#[async_trait]
pub trait AsyncHookHandler: Send + Sync {
    /// Handle one enriched event
    async fn execute(&self, event: &HookEvent) -> HookResult<HandlerResult>;

    /// Get the handler name
    fn name(&self) -> &str;

    /// Check if the handler should run for the given event
    fn should_run(&self, _event: &HookEvent) -> bool {
        true
    }
}

/// Wrapper to use sync handlers as async
pub struct SyncToAsyncHandler<H: HookHandler> {
    inner: Arc<H>,
}

impl<H: HookHandler> SyncToAsyncHandler<H> {
    pub fn new(handler: H) -> Self {
        Self {
            inner: Arc::new(handler),
        }
    }
}

#[async_trait]
impl<H: HookHandler + 'static> AsyncHookHandler for SyncToAsyncHandler<H> {
    async fn execute(&self, event: &HookEvent) -> HookResult<HandlerResult> {
        let handler = self.inner.clone();
        let handler_name = handler.name().to_string();
        let event = event.clone();

        tokio::task::spawn_blocking(move || handler.execute(&event))
            .await
            .map_err(|e| HookError::handler_failed(handler_name, e))?
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn should_run(&self, event: &HookEvent) -> bool {
        self.inner.should_run(event)
    }
}

/// Handler backed by a closure, for extension code that registers inline logic
pub struct FnHandler<F> {
    name: String,
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&HookEvent) -> HookResult<HandlerResult> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F> AsyncHookHandler for FnHandler<F>
where
    F: Fn(&HookEvent) -> HookResult<HandlerResult> + Send + Sync,
{
    async fn execute(&self, event: &HookEvent) -> HookResult<HandlerResult> {
        (self.func)(event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::EventPayload;

    struct TestHandler {
        name: String,
        result: HandlerResult,
    }

    impl HookHandler for TestHandler {
        fn execute(&self, _event: &HookEvent) -> HookResult<HandlerResult> {
            Ok(self.result.clone())
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    fn event() -> HookEvent {
        HookEvent::new("s1", "/t", "/w", EventPayload::SessionStart { source: None })
    }

    #[test]
    fn test_sync_handler() {
        let handler = TestHandler {
            name: "test".to_string(),
            result: HandlerResult::success().with_stdout("ok"),
        };

        let result = handler.execute(&event()).unwrap();
        assert_eq!(result.stdout.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_sync_to_async() {
        let handler = TestHandler {
            name: "test".to_string(),
            result: HandlerResult::block("nope"),
        };

        let async_handler = SyncToAsyncHandler::new(handler);
        assert_eq!(AsyncHookHandler::name(&async_handler), "test");

        let result = async_handler.execute(&event()).await.unwrap();
        assert!(result.is_blocking());
    }

    #[tokio::test]
    async fn test_fn_handler() {
        let handler = FnHandler::new("session", |event: &HookEvent| {
            Ok(HandlerResult::success().with_stdout(event.session_id.clone()))
        });

        let result = handler.execute(&event()).await.unwrap();
        assert_eq!(result.stdout.as_deref(), Some("s1"));
    }
}
