//! Client-facing error taxonomy.

use std::time::Duration;

use registry_core::OperationErrorKind;
use registry_protocol::CodecError;
use thiserror::Error;

/// Everything a remote call can fail with, from the caller's point of view.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// Malformed frame or unexpected wire content. Fatal to the current
    /// frame, never retried.
    #[error("protocol error: {0}")]
    Protocol(#[from] CodecError),

    /// No common protocol version with the peer. Fatal to channel setup.
    #[error("version negotiation failed: {0}")]
    Negotiation(String),

    /// The bounded wait for a response expired. The caller may retry.
    #[error("call timed out after {elapsed:?} waiting for a response")]
    Timeout { elapsed: Duration },

    /// The channel closed or errored. Every pending call on the channel
    /// observes the same failure.
    #[error("transport failed: {0}")]
    Transport(String),

    /// The remote operation itself failed; `kind` is the most specific
    /// error kind the operation declares that matches the remote failure.
    #[error("remote operation failed ({kind:?}): {message}")]
    Operation {
        kind: OperationErrorKind,
        message: String,
    },
}

impl From<std::io::Error> for RemoteError {
    fn from(e: std::io::Error) -> Self {
        RemoteError::Transport(e.to_string())
    }
}
