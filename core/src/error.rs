//! Error types for the IRC gateway

use thiserror::Error;

/// Main error type for the gateway core
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed by peer")]
    Eof,

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("parse error at byte {offset}: {reason}")]
    MessageParse { offset: usize, reason: String },

    #[error("registration failed: {0}")]
    Registration(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the error tears down the owning connection. Parse errors
    /// discard the offending line and the reader keeps going; anything
    /// touching the transport is fatal.
    pub fn is_transport_fatal(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Eof | Error::Tls(_))
    }
}
