//! Error types for the whole crate.
//!
//! Everything funnels into one `Error` enum. Transient conditions that the
//! library resolves internally (a ref CAS losing a race) never appear here;
//! what callers see is the final outcome of an operation.

use thiserror::Error;

/// The crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// A key, reference or object does not exist.
    #[error("no such key or object: {0}")]
    NotFound(String),

    /// An object exists but is not of the required kind.
    #[error("'{path}' is a {found}, expected {expected}")]
    KindMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    /// A path could not be turned into a meaningful key.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The commit retry loop gave up after too many CAS conflicts.
    #[error("too many failed merge attempts, giving up after {0} tries")]
    RetryExhausted(usize),

    /// A three-way merge produced a state that could not be resolved.
    #[error("unresolvable merge: {0}")]
    MergeFailure(String),

    /// A pipeline assertion did not hold.
    #[error("assertion failed: {0}")]
    AssertionFailed(String),

    /// Malformed tar input, or metadata missing during decode.
    #[error("codec error: {0}")]
    Codec(String),

    /// Error from the underlying Git library.
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True if the error indicates a missing key, ref or object.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Git(e) => e.code() == git2::ErrorCode::NotFound,
            _ => false,
        }
    }

    /// True if the error is a wrong-kind lookup (blob where a tree was
    /// required, or the reverse).
    pub fn is_kind_mismatch(&self) -> bool {
        matches!(self, Error::KindMismatch { .. })
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
