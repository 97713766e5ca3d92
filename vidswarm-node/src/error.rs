//! Errors surfaced by the tracker server, tracker client and peer node.

use std::path::PathBuf;

use crate::transport::TransportError;

pub type Result<T> = std::result::Result<T, NodeError>;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("already running")]
    AlreadyRunning,
    #[error("not running")]
    NotRunning,
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The remote side answered with `status=error`.
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("video {0} not found")]
    NotFound(String),
    #[error("malformed reply: {0}")]
    BadReply(&'static str),
    #[error("transfer truncated: received {received} of {expected} bytes")]
    Truncated { received: u64, expected: u64 },
    #[error("{op} {path}: {source}")]
    File {
        op: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

impl NodeError {
    pub(crate) fn file(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        NodeError::File {
            op,
            path: path.into(),
            source,
        }
    }
}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        NodeError::Transport(TransportError::Io(err))
    }
}
