// ABOUTME: Error types for the tether-grpc crate.
// ABOUTME: Endpoint building and runtime failures, mapped onto tether-core's ChannelError.

use tether_core::ChannelError;
use thiserror::Error;

/// Errors raised while building tonic channels.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Invalid server address format.
    #[error("invalid server address: {0}")]
    InvalidAddress(String),

    /// A recognised channel argument had an unusable value.
    #[error("invalid channel argument '{key}': {reason}")]
    InvalidArg { key: String, reason: String },

    /// TLS settings could not be applied.
    #[error("TLS config error: {0}")]
    TlsConfig(String),

    /// Failed to connect to the server.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The connector's runtime could not be started.
    #[error("failed to start transport runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

impl From<tonic::transport::Error> for TransportError {
    fn from(err: tonic::transport::Error) -> Self {
        TransportError::ConnectionFailed(err.to_string())
    }
}

impl From<TransportError> for ChannelError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::InvalidAddress(addr) => ChannelError::InvalidAddress(addr),
            invalid @ TransportError::InvalidArg { .. } => {
                ChannelError::InvalidArgument(invalid.to_string())
            }
            other => ChannelError::ConnectionFailed(other.to_string()),
        }
    }
}
