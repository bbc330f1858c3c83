use thiserror::Error;

/// Result type for coordination-service operations.
pub type CoordinationResult<T> = Result<T, CoordinationError>;

/// Failures reported by a [`Coordinator`](crate::Coordinator) handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CoordinationError {
    /// The node (or the parent of a node being created) does not exist.
    #[error("no node at {0}")]
    NoNode(String),

    /// A node already exists at the requested path.
    #[error("node already exists at {0}")]
    NodeExists(String),

    /// The node still has children and cannot be deleted.
    #[error("node {0} has children")]
    NotEmpty(String),

    /// The path is not absolute or has an empty segment.
    #[error("invalid path {0:?}")]
    InvalidPath(String),

    /// The connection to the service is currently down.
    #[error("connection to the coordination service was lost")]
    ConnectionLoss,

    /// The session was closed or expired; its ephemeral nodes are gone.
    #[error("coordination session has expired")]
    SessionExpired,
}

impl From<CoordinationError> for slotflake::Error {
    fn from(err: CoordinationError) -> Self {
        slotflake::Error::unavailable_from("coordination service failure", err)
    }
}
