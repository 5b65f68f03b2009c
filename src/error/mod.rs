use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Handshake error: {0}")]
    Handshake(String),

    #[error("Handshake timed out")]
    HandshakeTimeout,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Transfer exceeded declared size: {accumulated} of {total} bytes")]
    SizeInvariant { accumulated: u64, total: u64 },

    #[error("Forward error: {0}")]
    Forward(String),

    #[error("Secondary channel negotiation timed out for {0}")]
    NegotiationTimeout(String),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("File operation error: {0}")]
    FileOperation(String),

    #[error("Request {0} timed out")]
    RequestTimeout(uuid::Uuid),

    #[error("Not connected to the relay")]
    NotConnected,

    #[error("Client is closed")]
    ClientClosed,
}

impl RelayError {
    /// True when the error came from the underlying connection rather than
    /// from the data that was carried over it.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            RelayError::Network(_) | RelayError::NotConnected | RelayError::ClientClosed
        )
    }
}
