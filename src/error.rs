//! Error taxonomy for the transport layer.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the client/server transport.
///
/// Protocol violations (unexpected frame tags, corrupt headers, truncated
/// payloads) are modelled as non-graceful [`RemoteError::Disconnected`]
/// values: from the peer's point of view the connection is over either way,
/// only the reason differs.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// The socket died, the peer closed, or the peer broke protocol.
    ///
    /// `graceful` is true only when the peer shut the connection down
    /// cleanly (read returned end-of-stream between frames).
    #[error("{reason}")]
    Disconnected { reason: String, graceful: bool },

    /// Connecting to a session socket failed.
    #[error("failed to connect to '{}'", .0.display())]
    ConnectionFailed(PathBuf),

    /// A collaborator (command execution, invariant check, system call
    /// outside the socket I/O paths) failed.
    #[error("{0}")]
    Runtime(String),
}

impl RemoteError {
    /// Clean shutdown by the peer.
    pub(crate) fn peer_disconnected() -> RemoteError {
        RemoteError::Disconnected {
            reason: "peer disconnected".to_string(),
            graceful: true,
        }
    }

    /// Protocol violation; always non-graceful.
    pub(crate) fn protocol(reason: impl Into<String>) -> RemoteError {
        RemoteError::Disconnected {
            reason: reason.into(),
            graceful: false,
        }
    }

    pub(crate) fn runtime(message: impl Into<String>) -> RemoteError {
        RemoteError::Runtime(message.into())
    }

    /// True for a clean peer shutdown, false for everything else.
    pub fn is_graceful(&self) -> bool {
        matches!(self, RemoteError::Disconnected { graceful: true, .. })
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;
