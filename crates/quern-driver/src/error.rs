//! Driver and configuration error types.

use thiserror::Error;

/// Errors that can occur while parsing a connection string.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A segment of the connection string is not in `key=value` form.
    #[error("invalid connection string segment: `{segment}` (expected key=value)")]
    InvalidSegment {
        /// The offending segment, as written.
        segment: String,
    },

    /// The `ssl` option carried a value outside the supported set.
    #[error("invalid ssl mode: `{value}` (expected off, preferred or required)")]
    InvalidSslMode {
        /// The offending value.
        value: String,
    },
}

/// Broad classification of a driver failure.
///
/// The pool never interprets driver-specific error codes; it only asks
/// whether a failure belongs to a class it has a policy for. Drivers map
/// their native codes into these classes when constructing a
/// [`DriverError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The connection could not be established or was lost.
    Connection,
    /// A deadlock (or lock-wait) was detected and the statement was
    /// rolled back. The only class the pool retries, and only on direct
    /// transaction commits.
    Deadlock,
    /// The statement was rejected by the server (syntax, unknown object,
    /// constraint violation and similar).
    Rejected,
    /// Anything else.
    Other,
}

/// An error reported by a connection implementation.
///
/// Carries the driver's native numeric code alongside the classified
/// [`ErrorKind`] so that logs stay actionable while the pool's policy
/// decisions stay driver-agnostic.
#[derive(Debug, Clone, Error)]
#[error("driver error {code}: {message}")]
pub struct DriverError {
    kind: ErrorKind,
    code: u32,
    message: String,
}

impl DriverError {
    /// Create a new driver error.
    pub fn new(kind: ErrorKind, code: u32, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }

    /// The classified failure kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The driver's native error code (nonzero).
    #[must_use]
    pub fn code(&self) -> u32 {
        self.code
    }

    /// The driver's message text.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether this failure is deadlock-class and therefore eligible for
    /// the bounded retry on direct transaction commits.
    #[must_use]
    pub fn is_deadlock(&self) -> bool {
        self.kind == ErrorKind::Deadlock
    }
}
