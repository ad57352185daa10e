//! Unified error type for registry, persistence and remote operations.
//!
//! Structural misuse (empty names, unknown ids, calling things in the wrong
//! order) is surfaced synchronously through [`Error`]. Operational failures
//! in the background (periodic save errors, panicking consumers) are isolated
//! and logged at their boundary instead of propagating into producers; they
//! intentionally have no variant here beyond [`Error::Persistence`], which is
//! only returned from the one-shot save API.

use thiserror::Error;

/// Error type shared by all fallible operations in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A structurally invalid argument, e.g. a counter created with an
    /// empty name.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An id-based counter lookup found nothing. Name-based lookups never
    /// fail; id lookups do not auto-create.
    #[error("no counter registered under id `{0}`")]
    NotFound(String),

    /// An operation was invoked in an invalid order, e.g. asking for the
    /// viewer endpoint before publishing the registry.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Writing or renaming a snapshot file failed.
    #[error("snapshot persistence failed: {0}")]
    Persistence(#[source] std::io::Error),

    /// A snapshot file was missing, truncated or not in the binary format.
    /// No partial snapshot is ever accepted.
    #[error("snapshot load failed: {0}")]
    SnapshotLoad(String),

    /// A remote connection could not be established or broke mid-call.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A wire message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// JSON rendering failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = Error::InvalidArgument("counter name must not be empty".into());
        assert_eq!(
            err.to_string(),
            "invalid argument: counter name must not be empty"
        );

        let err = Error::NotFound("build.compile".into());
        assert!(err.to_string().contains("build.compile"));
    }

    #[test]
    fn test_io_error_converts_to_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "nope");
        let err: Error = io.into();
        assert!(matches!(err, Error::Transport(_)));
    }
}
