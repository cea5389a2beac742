//! Built-in hook handlers

mod command_guard;
mod logging;

pub use self::command_guard::CommandGuardHandler;
pub use self::logging::LoggingHandler;
