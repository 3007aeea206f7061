//! Server error types.
//!
//! Protocol-level failures (undecodable frames, unknown recipients, empty
//! identities) are not errors: they end in a silent local discard and never
//! produce a value of these types. Only the plumbing that can legitimately
//! fail at startup or while serving is fallible.

use std::io;

/// Errors from server startup and the listener.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl ServerError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Bind { .. } => "bind",
            Self::Io(_) => "io",
        }
    }
}
