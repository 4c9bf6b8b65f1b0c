use thiserror::Error;

/// Error taxonomy shared by every layer of the engine.
///
/// Variants correspond to the error *kinds* from the protocol design
/// rather than to implementation details; each carries just enough
/// context for a caller to decide whether to retry, surface to the
/// user, or tear the session down.
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP or websocket I/O failure.
    #[error("network error: {0}")]
    Network(String),

    /// Missing or invalid bearer token.
    #[error("unauthorized")]
    Unauthorized,

    /// Crypto core rejection, invalid message index, round mismatch.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Structural wire validation failure; dropped at the transport,
    /// never surfaced to a caller.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// At-rest checksum mismatch or envelope schema violation.
    #[error("corrupt data: {0}")]
    CorruptData(String),

    /// Driver or session operation attempted before `initialize`.
    #[error("session not initialized")]
    SessionUninitialized,

    /// Duplicate party or group identifier.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Operation abandoned because of an in-flight `disconnect`.
    #[error("cancelled")]
    Cancelled,

    /// Encryption key absent when required, recursive encrypt guard
    /// triggered, or an out-of-bounds member index. The session that
    /// raised this must be destroyed.
    #[error("fatal: {0}")]
    Fatal(String),

    /// The requested group, party, or keyshare record was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Requested parameters violate a group invariant (e.g. `t > n`).
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// The group has already reached its party limit.
    #[error("group is full")]
    Full,

    /// Error generated by the JSON codec.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Error generated by input/output.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type used throughout the protocol crate.
pub type Result<T> = std::result::Result<T, Error>;
