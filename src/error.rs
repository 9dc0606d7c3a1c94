//! Error types shared across the crate.

use thiserror::Error;

/// Errors produced while resolving an archive entry.
///
/// Each variant maps to one user-visible disposition: the not-found family
/// and `LoopDetected` surface as 404, transport and decode failures as 500,
/// and `Config` aborts startup.
#[derive(Debug, Error)]
pub enum MegError {
    #[error("no registered format matches {0:?}")]
    UnknownFormat(String),

    #[error("archive not found: {0}")]
    NotFoundArchive(String),

    #[error("entry not found in archive: {0}")]
    NotFoundEntry(String),

    #[error("object store error: {0}")]
    Transport(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("magic bytes mismatch for format {0}")]
    MagicMismatch(&'static str),

    #[error("symlink chain exceeded {max} hops at {path:?}")]
    LoopDetected { path: String, max: usize },

    #[error("configuration error: {0}")]
    Config(String),
}

impl MegError {
    /// Wrap a codec-level failure.
    pub fn decode(err: impl std::fmt::Display) -> Self {
        MegError::Decode(err.to_string())
    }

    /// Wrap a store-level failure.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        MegError::Transport(err.to_string())
    }

    /// Whether this error should be reported as a missing resource rather
    /// than a server fault. `LoopDetected` is deliberately in the not-found
    /// family: a cyclic symlink resolves to nothing.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            MegError::UnknownFormat(_)
                | MegError::NotFoundArchive(_)
                | MegError::NotFoundEntry(_)
                | MegError::LoopDetected { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, MegError>;
