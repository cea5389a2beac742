//! Error handling for the dispatch pipeline

use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Result type for hook operations
pub type HookResult<T> = Result<T, HookError>;

/// Dispatch pipeline error types
#[derive(Debug)]
pub enum HookError {
    /// A handler returned an error
    HandlerFailed {
        handler: String,
        source: Box<dyn Error + Send + Sync>,
    },

    /// The handler chain did not finish inside the dispatch budget
    Timeout {
        duration: Duration,
    },

    /// Input could not be read as an event
    InvalidEvent(String),

    /// Invalid configuration
    InvalidConfiguration(String),

    /// A shared state file stayed locked past the wait budget
    LockTimeout(PathBuf),

    /// Serialization/deserialization error
    SerializationError(serde_json::Error),

    /// IO error
    IoError(std::io::Error),

    /// Custom error
    Custom(String),
}

impl HookError {
    /// Create a handler failure
    pub fn handler_failed(
        handler: impl Into<String>,
        source: impl Into<Box<dyn Error + Send + Sync>>,
    ) -> Self {
        Self::HandlerFailed {
            handler: handler.into(),
            source: source.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Create a custom error
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    /// Whether this error came from the dispatch deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandlerFailed { handler, source } => {
                write!(f, "Hook handler '{}' failed: {}", handler, source)
            }
            Self::Timeout { duration } => {
                write!(f, "Dispatch timed out after {:?}", duration)
            }
            Self::InvalidEvent(msg) => write!(f, "Invalid event: {}", msg),
            Self::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {}", msg),
            Self::LockTimeout(path) => write!(f, "Timed out waiting for lock {}", path.display()),
            Self::SerializationError(e) => write!(f, "Serialization error: {}", e),
            Self::IoError(e) => write!(f, "IO error: {}", e),
            Self::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl Error for HookError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::HandlerFailed { source, .. } => Some(source.as_ref() as &(dyn Error + 'static)),
            Self::SerializationError(e) => Some(e),
            Self::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for HookError {
    fn from(error: serde_json::Error) -> Self {
        Self::SerializationError(error)
    }
}

impl From<std::io::Error> for HookError {
    fn from(error: std::io::Error) -> Self {
        Self::IoError(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HookError::handler_failed("guard", "boom");
        assert_eq!(err.to_string(), "Hook handler 'guard' failed: boom");

        let err = HookError::timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "Dispatch timed out after 30s");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let hook_err: HookError = json_err.into();
        assert!(matches!(hook_err, HookError::SerializationError(_)));
        assert!(hook_err.source().is_some());
    }
}
