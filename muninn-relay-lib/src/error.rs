use thiserror::Error;

/// Errors that can occur in the relay
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Packet diversion error: {0}")]
    Divert(String),

    #[error("Ping request must be 8 bytes, got {len}")]
    PingProtocol { len: usize },

    #[error("Bloat probe failed: {0}")]
    BloatProbe(String),

    #[error("{0} channel closed")]
    ChannelClosed(&'static str),

    #[error("No usable paths")]
    NoPaths,
}

pub type Result<T> = std::result::Result<T, RelayError>;
