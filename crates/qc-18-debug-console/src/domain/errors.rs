//! Error types shared across the console.

use crate::domain::keys::{KeyParseError, NodeId};
use std::time::Duration;
use thiserror::Error;

/// Failures reported by the network backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("not found")]
    NotFound,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("peer unreachable: {0}")]
    Unreachable(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("transfer error: {0}")]
    Transfer(String),

    #[error("stream closed")]
    StreamClosed,

    #[error("{0}")]
    Other(String),
}

/// Failures resolving the peer named by the operator.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid peer ID or node ID: {0}")]
    InvalidTarget(#[from] KeyParseError),

    #[error("target node is self")]
    SelfTarget,

    #[error("peer {0} not found")]
    NotFound(NodeId),

    #[error("{0}")]
    Backend(#[from] BackendError),

    #[error("cancelled")]
    Cancelled,
}

/// Failures of the socket endpoint.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}
