//! Error types for embedded Ruby operations
//!
//! Every failure of a protected call arrives here as either an
//! [`RbError::Exception`] carrying the raised object, or an
//! [`RbError::Jump`] for non-exception exits such as `throw`.
//! Numeric range violations are not a separate variant: they are raised as a
//! Ruby `RangeError` inside the coercion and travel the same channel.

use thiserror::Error;

use crate::value::RbValue;

/// Result type alias for embedded Ruby operations
pub type RbResult<T> = Result<T, RbError>;

/// Errors surfaced by the safe boundary layer
#[derive(Debug, Error)]
pub enum RbError {
    /// A Ruby exception escaped a protected call
    #[error("{class_name}: {message}")]
    Exception {
        class_name: String,
        message: String,
        /// The raised object, kept rooted so it can be inspected or re-raised
        exception: RbValue,
    },

    /// A non-local exit that is not an exception (`throw`, `break`, ...)
    #[error("Non-local exit with tag {tag}")]
    Jump { tag: i32 },

    /// `ruby_setup` reported a failure
    #[error("Ruby VM setup failed with status {status}")]
    Setup { status: i32 },

    /// The VM was torn down; it cannot be used or set up again
    #[error("Ruby VM has been torn down")]
    TornDown,

    /// The VM is owned by a different thread
    #[error("Ruby VM is owned by another thread")]
    WrongThread,

    /// The boxed value was already released
    #[error("GC root already released")]
    AlreadyReleased,

    /// Interior NUL in source text, or non UTF-8 bytes where a String was requested
    #[error("String encoding error: {0}")]
    StringEncoding(String),

    /// Internal/unexpected error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RbError {
    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a string encoding error
    pub fn string_encoding(message: impl Into<String>) -> Self {
        Self::StringEncoding(message.into())
    }

    /// Check if this error carries a Ruby exception object
    pub fn is_exception(&self) -> bool {
        matches!(self, Self::Exception { .. })
    }

    /// The raised exception object, if any
    pub fn exception(&self) -> Option<&RbValue> {
        match self {
            Self::Exception { exception, .. } => Some(exception),
            _ => None,
        }
    }

    /// Ruby class name of the raised exception, or a stable name for host-side errors
    pub fn class_name(&self) -> &str {
        match self {
            Self::Exception { class_name, .. } => class_name,
            Self::Jump { .. } => "NonLocalExit",
            Self::Setup { .. } => "SetupError",
            Self::TornDown => "TornDown",
            Self::WrongThread => "WrongThread",
            Self::AlreadyReleased => "AlreadyReleased",
            Self::StringEncoding(_) => "EncodingError",
            Self::Internal(_) => "InternalError",
        }
    }

    /// The exception message, if this is an exception
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Exception { message, .. } => Some(message),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jump_display() {
        let err = RbError::Jump { tag: 7 };
        assert_eq!(err.to_string(), "Non-local exit with tag 7");
        assert_eq!(err.class_name(), "NonLocalExit");
        assert!(!err.is_exception());
        assert!(err.exception().is_none());
        assert!(err.message().is_none());
    }

    #[test]
    fn test_setup_display() {
        let err = RbError::Setup { status: 1 };
        assert!(err.to_string().contains("status 1"));
    }

    #[test]
    fn test_torn_down() {
        let err = RbError::TornDown;
        assert_eq!(err.to_string(), "Ruby VM has been torn down");
        assert_eq!(err.class_name(), "TornDown");
    }

    #[test]
    fn test_string_encoding() {
        let err = RbError::string_encoding("nul byte at 3");
        assert_eq!(err.to_string(), "String encoding error: nul byte at 3");
        assert_eq!(err.class_name(), "EncodingError");
    }

    #[test]
    fn test_internal_error() {
        let err = RbError::internal("something went wrong");
        assert_eq!(err.to_string(), "Internal error: something went wrong");
    }
}
