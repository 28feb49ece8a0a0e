use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Config error: {0}")]
    Config(String),

    /// A malformed inbound frame. Recovered locally: the frame is skipped.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Recognition connection failed, dropped, or timed out. Fatal to the session.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A segment failed to synthesize. Recovered locally: the segment is dropped.
    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BridgeError {
    /// Whether this error tears down the owning call session. Connection and
    /// session failures are fatal; protocol and synthesis errors are local.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BridgeError::Connection(_) | BridgeError::Session(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
