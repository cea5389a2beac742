//! Hook dispatch for short-lived, per-notification processes.
//!
//! Every host notification starts a fresh process that reads one JSON event
//! from stdin, routes it through registered handlers and exits. Continuity
//! between invocations lives in two per-client files: the transaction context
//! store and the retry queue.

pub mod hooks;
pub mod platform_dirs;

pub use hooks::prelude;
