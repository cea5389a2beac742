//! Event kind to handler routing

use crate::hooks::{AsyncHookHandler, HookError, HookEventKind, HookResult, SyncToAsyncHandler};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Ordered handler lists per event kind, populated once at startup
#[derive(Default)]
pub struct HandlerRegistry {
    /// Handlers by event kind, in registration order
    handlers: DashMap<HookEventKind, Vec<Arc<dyn AsyncHookHandler>>>,

    /// Registered handler names
    names: Mutex<HashSet<String>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async handler for each of `kinds`, after any already registered
    pub fn register<H: AsyncHookHandler + 'static>(
        &self,
        kinds: &[HookEventKind],
        handler: H,
    ) -> HookResult<()> {
        self.register_arc(kinds, Arc::new(handler))
    }

    /// Register a synchronous handler; it runs on the blocking pool
    pub fn register_sync<H: crate::hooks::HookHandler + 'static>(
        &self,
        kinds: &[HookEventKind],
        handler: H,
    ) -> HookResult<()> {
        self.register(kinds, SyncToAsyncHandler::new(handler))
    }

    /// Register a shared handler
    pub fn register_arc(
        &self,
        kinds: &[HookEventKind],
        handler: Arc<dyn AsyncHookHandler>,
    ) -> HookResult<()> {
        if kinds.is_empty() {
            return Err(HookError::invalid_config(format!(
                "Handler '{}' has no event kinds",
                handler.name()
            )));
        }

        {
            let mut names = self
                .names
                .lock()
                .map_err(|_| HookError::custom("handler registry lock poisoned"))?;
            if !names.insert(handler.name().to_string()) {
                return Err(HookError::invalid_config(format!(
                    "Handler '{}' already registered",
                    handler.name()
                )));
            }
        }

        for kind in kinds {
            self.handlers
                .entry(*kind)
                .or_default()
                .push(handler.clone());
        }
        Ok(())
    }

    /// Handlers for `kind` in registration order
    pub fn handlers_for(&self, kind: HookEventKind) -> Vec<Arc<dyn AsyncHookHandler>> {
        self.handlers
            .get(&kind)
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    /// Names of every registered handler with the kinds they listen to
    pub fn list_handlers(&self) -> Vec<(String, Vec<HookEventKind>)> {
        let mut listing: Vec<(String, Vec<HookEventKind>)> = Vec::new();
        for kind in HookEventKind::all().into_iter().chain([HookEventKind::Other]) {
            for handler in self.handlers_for(kind) {
                match listing.iter_mut().find(|(name, _)| name == handler.name()) {
                    Some((_, kinds)) => kinds.push(kind),
                    None => listing.push((handler.name().to_string(), vec![kind])),
                }
            }
        }
        listing.sort_by(|a, b| a.0.cmp(&b.0));
        listing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{EventPayload, FnHandler, HandlerResult, HookEvent, HookHandler};

    fn named(name: &str) -> FnHandler<impl Fn(&HookEvent) -> HookResult<HandlerResult> + Send + Sync> {
        let label = name.to_string();
        FnHandler::new(name, move |_event: &HookEvent| {
            Ok(HandlerResult::success().with_stdout(label.clone()))
        })
    }

    #[test]
    fn test_registration_order_is_kept() {
        let registry = HandlerRegistry::new();
        registry.register(&[HookEventKind::Stop], named("first")).unwrap();
        registry.register(&[HookEventKind::Stop], named("second")).unwrap();
        registry
            .register(&[HookEventKind::Stop, HookEventKind::PreToolUse], named("third"))
            .unwrap();

        let names: Vec<String> = registry
            .handlers_for(HookEventKind::Stop)
            .iter()
            .map(|h| h.name().to_string())
            .collect();
        assert_eq!(names, vec!["first", "second", "third"]);
        assert_eq!(registry.handlers_for(HookEventKind::PreToolUse).len(), 1);
        assert!(registry.handlers_for(HookEventKind::SessionEnd).is_empty());
    }

    #[test]
    fn test_duplicate_and_empty_registration() {
        let registry = HandlerRegistry::new();
        registry.register(&[HookEventKind::Stop], named("dup")).unwrap();
        assert!(registry.register(&[HookEventKind::Stop], named("dup")).is_err());
        assert!(registry.register(&[], named("none")).is_err());
    }

    #[test]
    fn test_list_handlers() {
        let registry = HandlerRegistry::new();
        registry
            .register(&[HookEventKind::SessionStart, HookEventKind::SessionEnd], named("lifecycle"))
            .unwrap();

        let listing = registry.list_handlers();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].0, "lifecycle");
        assert_eq!(
            listing[0].1,
            vec![HookEventKind::SessionStart, HookEventKind::SessionEnd]
        );
    }

    struct Upper;

    impl HookHandler for Upper {
        fn execute(&self, event: &HookEvent) -> HookResult<HandlerResult> {
            Ok(HandlerResult::success().with_stdout(event.session_id.to_uppercase()))
        }

        fn name(&self) -> &str {
            "upper"
        }
    }

    #[tokio::test]
    async fn test_sync_handler_registration() {
        let registry = HandlerRegistry::new();
        registry.register_sync(&[HookEventKind::Notification], Upper).unwrap();
        assert!(registry.register_sync(&[HookEventKind::Stop], Upper).is_err());

        let handlers = registry.handlers_for(HookEventKind::Notification);
        assert_eq!(handlers.len(), 1);

        let event = HookEvent::new(
            "abc",
            "/t",
            "/w",
            EventPayload::Notification {
                message: "m".into(),
            },
        );
        let result = handlers[0].execute(&event).await.unwrap();
        assert_eq!(result.stdout.as_deref(), Some("ABC"));
    }
}
