//! Error types for the translation relay.

/// Top-level error type for the relay engine.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration or environment error.
    #[error("config error: {0}")]
    Config(String),

    /// Upstream translation source error.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Glasses display sink error.
    #[error("glasses error: {0}")]
    Glasses(String),

    /// Per-user session lifecycle error.
    #[error("session error: {0}")]
    Session(String),

    /// Viewer fan-out error.
    #[error("fanout error: {0}")]
    Fanout(String),

    /// HTTP surface error.
    #[error("server error: {0}")]
    Server(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, RelayError>;
