use thiserror::Error;

/// Failures that are reported synchronously to the immediate caller. None of them is fatal for
///  a connection, let alone for other connections.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ThrottleError {
    #[error("malformed throttle data: expected at least {expected} bytes, got {actual}")]
    MalformedThrottleData {
        expected: usize,
        actual: usize,
    },
    #[error("invalid packet category {0}")]
    InvalidCategory(i32),
    #[error("connection is closed")]
    ConnectionClosed,
}
