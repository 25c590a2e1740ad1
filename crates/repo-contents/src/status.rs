//! Mapping of HTTP outcomes onto the error taxonomy
//!
//! The contents API reports a stale version token as 409 (sha mismatch) or
//! 422 (sha missing for an existing file, or file already exists on create).
//! Both mean "someone else wrote first" and are only meaningful for writes.

use crate::error::Error;

/// Which side of the read-modify-write cycle produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

/// Classify a non-success HTTP status into an `Error`.
///
/// `context` is the repository path, carried into the message so logs show
/// which file failed.
pub fn classify_status(operation: Operation, status: u16, context: &str, body: &str) -> Error {
    let detail = format!("{context} ({status}): {}", body.trim());
    match (operation, status) {
        (_, 401 | 403) => Error::Auth(detail),
        (_, 404) => Error::NotFound(detail),
        (Operation::Write, 409 | 422) => Error::VersionConflict(detail),
        (_, 408 | 429) | (_, 500..=599) => Error::Transient(detail),
        _ => Error::Unexpected(detail),
    }
}

/// Classify a transport-level failure (no HTTP status available).
///
/// Connection failures never reached the store and are always safe to retry.
/// Timeouts and broken responses may have been applied remotely.
pub fn classify_transport(err: &reqwest::Error, context: &str) -> Error {
    if err.is_connect() {
        Error::Unreachable(format!("{context}: {err}"))
    } else if err.is_decode() {
        Error::Unexpected(format!("{context}: {err}"))
    } else {
        Error::Transient(format!("{context}: {err}"))
    }
}
