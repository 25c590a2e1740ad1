//! Error types for remote contents operations

/// Errors from the remote contents store.
///
/// `Auth` and `NotFound` are setup faults and are never retried. `Transient`
/// and `Unreachable` are retried with backoff. `VersionConflict` is retried by
/// redoing the whole read-modify-write cycle, and surfaces as
/// `ConflictRetriesExhausted` once the attempts run out.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("store unreachable: {0}")]
    Unreachable(String),

    #[error("version conflict: {0}")]
    VersionConflict(String),

    #[error("gave up on {path} after {attempts} conflicting writes")]
    ConflictRetriesExhausted { path: String, attempts: u32 },

    #[error("unexpected response: {0}")]
    Unexpected(String),

    #[error("content decode error: {0}")]
    Decode(String),
}

impl Error {
    /// Network-level failures that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::Unreachable(_))
    }
}

/// Result alias for contents operations.
pub type Result<T> = std::result::Result<T, Error>;
