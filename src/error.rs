//! Error types for weak reference operations.

use thiserror::Error;

use crate::host::value::ObjectId;

/// An exception raised by host code, typically a callback.
///
/// # Examples
///
/// ```
/// use weakref::Thrown;
///
/// let thrown = Thrown::new("boom");
/// assert_eq!(thrown.to_string(), "boom");
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct Thrown {
    message: String,
}

impl Thrown {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Broad classification of a [`WeakError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Wrong argument shape: non-object target, non-callable callback.
    Type,
    /// Operating on a handle this subsystem did not produce.
    State,
    /// The host refused the operation in its current state.
    Host,
    /// A user callback raised and the host treats it as fatal.
    Callback,
}

/// Errors that can occur while creating or inspecting weak references.
///
/// # Examples
///
/// ```
/// use weakref::{ErrorKind, WeakError, WeakResult};
///
/// let err = WeakError::Type("target should be object".into());
/// assert_eq!(err.kind(), ErrorKind::Type);
/// assert_eq!(err.to_string(), "TypeError: target should be object");
///
/// let ok: WeakResult<u32> = Ok(1);
/// assert!(ok.is_ok());
/// ```
#[derive(Error, Debug, Clone)]
pub enum WeakError {
    #[error("TypeError: {0}")]
    Type(String),
    #[error("invalid weak reference: {0}")]
    State(String),
    #[error("collection in progress")]
    CollectionInProgress,
    #[error("host cannot attach a weak notification to object {0}")]
    Unsupported(ObjectId),
    #[error("uncaught exception in weak callback: {0}")]
    Uncaught(Thrown),
}

impl WeakError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WeakError::Type(_) => ErrorKind::Type,
            WeakError::State(_) => ErrorKind::State,
            WeakError::CollectionInProgress | WeakError::Unsupported(_) => ErrorKind::Host,
            WeakError::Uncaught(_) => ErrorKind::Callback,
        }
    }
}

/// Result type for weak reference operations
pub type WeakResult<T> = Result<T, WeakError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_readable_messages() {
        let cases = [
            (
                WeakError::Type("callback should be function".into()),
                "TypeError: callback should be function",
            ),
            (
                WeakError::State("not created by this manager".into()),
                "invalid weak reference: not created by this manager",
            ),
            (WeakError::CollectionInProgress, "collection in progress"),
            (
                WeakError::Unsupported(ObjectId::from_raw(7)),
                "host cannot attach a weak notification to object #7",
            ),
            (
                WeakError::Uncaught(Thrown::new("boom")),
                "uncaught exception in weak callback: boom",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn kinds_follow_variants() {
        assert_eq!(WeakError::Type(String::new()).kind(), ErrorKind::Type);
        assert_eq!(WeakError::State(String::new()).kind(), ErrorKind::State);
        assert_eq!(WeakError::CollectionInProgress.kind(), ErrorKind::Host);
        assert_eq!(
            WeakError::Uncaught(Thrown::new("x")).kind(),
            ErrorKind::Callback
        );
    }
}
