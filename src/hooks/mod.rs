//! Hook event dispatch
//!
//! Each invocation reads one lifecycle event from the host, enriches it with
//! correlation context persisted across invocations, runs the registered
//! handlers in order and reports a single merged result. Events whose
//! handlers fail can be kept in a per-client retry queue and redelivered by
//! later invocations.

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod errors;
pub mod event_log;
pub mod git;
pub mod handler;
pub mod handlers;
pub mod persist;
pub mod plugin;
pub mod queue;
pub mod registry;
pub mod traits;
pub mod transcript;
pub mod types;

// Re-export commonly used types
pub use self::config::{
    BuiltInConfig, DispatchConfig, EventLogConfig, ExternalCommandConfig, HandlerConfig,
    HandlerKind, RetryQueueConfig, StatePaths,
};
pub use self::context::{ContextStore, TransactionContext};
pub use self::dispatcher::{DispatchOutcome, Dispatcher};
pub use self::errors::{HookError, HookResult};
pub use self::event_log::{EventLog, EventLogRecord, OutputMetadata};
pub use self::git::{CommandGitCollector, GitCollector, GitMetadata};
pub use self::handler::{AsyncHookHandler, FnHandler, HookHandler, SyncToAsyncHandler};
pub use self::handlers::{CommandGuardHandler, ExternalCommandHandler, LoggingHandler};
pub use self::plugin::{HookPlugin, PluginOutcome, PluginSet, TracingPlugin};
pub use self::queue::{DrainReport, FailedEventRecord, QueueStatus, RetryQueue};
pub use self::registry::HandlerRegistry;
pub use self::traits::{ConditionalHandler, ConditionalWrapper};
pub use self::transcript::TranscriptReader;
pub use self::types::{
    ChainControl, EventContext, EventPayload, HandlerResult, HookEvent, HookEventKind,
    EXIT_BLOCKING, EXIT_ERROR, EXIT_SUCCESS,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::{
        AsyncHookHandler, ConditionalHandler, DispatchOutcome, Dispatcher, EventPayload, FnHandler,
        HandlerRegistry, HandlerResult, HookError, HookEvent, HookEventKind, HookHandler,
        HookPlugin, HookResult,
    };
}
