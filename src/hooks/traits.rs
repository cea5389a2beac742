//! Additional traits for hook handlers

use crate::hooks::{AsyncHookHandler, HandlerResult, HookEvent, HookResult};
use async_trait::async_trait;
use regex::Regex;

/// Predicate deciding whether a wrapped handler runs
pub type EventPredicate = Box<dyn Fn(&HookEvent) -> bool + Send + Sync>;

/// Trait for handlers that can be conditionally executed
pub trait ConditionalHandler: AsyncHookHandler {
    /// Execute only if condition is met
    fn when<F>(self, condition: F) -> ConditionalWrapper<Self>
    where
        Self: Sized,
        F: Fn(&HookEvent) -> bool + Send + Sync + 'static,
    {
        ConditionalWrapper {
            handler: self,
            condition: Box::new(condition),
        }
    }

    /// Execute only for tool events whose tool name matches `matcher`.
    ///
    /// Events without a tool name are always passed through.
    fn matching_tool(self, matcher: Regex) -> ConditionalWrapper<Self>
    where
        Self: Sized,
    {
        self.when(move |event| match event.tool_name() {
            Some(tool) => matcher.is_match(tool),
            None => true,
        })
    }
}

impl<T: AsyncHookHandler> ConditionalHandler for T {}

/// Wrapper for conditional execution
pub struct ConditionalWrapper<H: AsyncHookHandler> {
    handler: H,
    condition: EventPredicate,
}

#[async_trait]
impl<H: AsyncHookHandler> AsyncHookHandler for ConditionalWrapper<H> {
    async fn execute(&self, event: &HookEvent) -> HookResult<HandlerResult> {
        if (self.condition)(event) {
            self.handler.execute(event).await
        } else {
            Ok(HandlerResult::success())
        }
    }

    fn name(&self) -> &str {
        self.handler.name()
    }

    fn should_run(&self, event: &HookEvent) -> bool {
        (self.condition)(event) && self.handler.should_run(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{EventPayload, FnHandler};
    use serde_json::json;

    fn tool_event(tool: &str) -> HookEvent {
        HookEvent::new(
            "s1",
            "/t",
            "/w",
            EventPayload::PreToolUse {
                tool_name: tool.into(),
                tool_input: json!({}),
            },
        )
    }

    #[tokio::test]
    async fn test_conditional_handler() {
        let handler = FnHandler::new("conditional", |_event: &HookEvent| {
            Ok(HandlerResult::block("stopped"))
        })
        .when(|event| event.session_id == "s1");

        let event = tool_event("Bash");
        assert!(handler.should_run(&event));
        assert!(handler.execute(&event).await.unwrap().is_blocking());

        let mut other = tool_event("Bash");
        other.session_id = "s2".into();
        assert!(!handler.should_run(&other));
        assert_eq!(handler.execute(&other).await.unwrap(), HandlerResult::success());
    }

    #[test]
    fn test_tool_matcher() {
        let handler = FnHandler::new("edits", |_event: &HookEvent| Ok(HandlerResult::success()))
            .matching_tool(Regex::new("^(Edit|Write|MultiEdit)$").unwrap());

        assert!(handler.should_run(&tool_event("Write")));
        assert!(!handler.should_run(&tool_event("Bash")));

        let prompt = HookEvent::new(
            "s1",
            "/t",
            "/w",
            EventPayload::UserPromptSubmit { prompt: "x".into() },
        );
        assert!(handler.should_run(&prompt));
    }
}
