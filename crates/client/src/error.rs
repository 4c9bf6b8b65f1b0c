use thiserror::Error;

/// Errors surfaced by the relay client, transport and session façade.
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP or websocket I/O failure.
    #[error("network error: {0}")]
    Network(String),

    /// The server rejected a request with a non-2xx status.
    #[error("server error ({status}): {body}")]
    Server {
        /// HTTP status code returned by the relay.
        status: dkls_protocol::StatusCode,
        /// Response body, or a placeholder if it could not be read.
        body: String,
    },

    /// A websocket connection attempt did not reach `Open` within the
    /// 10-second timeout.
    #[error("connection timed out")]
    ConnectTimeout,

    /// A session operation was attempted before `initialize()`.
    #[error("session not initialized")]
    SessionUninitialized,

    /// Operation abandoned because of an in-flight `disconnect`.
    #[error("cancelled")]
    Cancelled,

    /// Wraps the shared protocol error taxonomy unchanged.
    #[error(transparent)]
    Protocol(#[from] dkls_protocol::Error),

    /// Wraps the driver crate's error taxonomy unchanged.
    #[error(transparent)]
    Driver(#[from] dkls_driver::Error),

    /// Error generated by the HTTP client.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Error generated by the websocket client.
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Error generated by the JSON codec.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
