// ABOUTME: Error types for the tether-core crate.
// ABOUTME: Separates caller mistakes, closed channels, transport failures and internal faults.

use thiserror::Error;

/// Errors surfaced by channel handles and the registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Malformed construct arguments. Nothing was committed to the registry.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The handle's entry has no underlying channel any more.
    #[error("channel already closed")]
    AlreadyClosed,

    /// The channel reported a failed connection while waiting for readiness.
    #[error("failed to connect to server: {0}")]
    ConnectFailed(String),

    /// The connector rejected the target address.
    #[error("invalid server address: {0}")]
    InvalidAddress(String),

    /// The connector could not build the underlying channel.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ChannelError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ChannelError::InvalidArgument(msg.into())
    }

    /// True for errors a caller recovers from by constructing a new handle.
    pub fn is_closed(&self) -> bool {
        matches!(self, ChannelError::AlreadyClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChannelError::InvalidArgument("args keys must be strings".to_string());
        assert_eq!(err.to_string(), "invalid argument: args keys must be strings");

        assert_eq!(
            ChannelError::AlreadyClosed.to_string(),
            "channel already closed"
        );
    }

    #[test]
    fn test_all_error_variants_display() {
        let connect = ChannelError::ConnectFailed("TRANSIENT_FAILURE".to_string());
        assert!(connect.to_string().contains("failed to connect"));

        let address = ChannelError::InvalidAddress("bad uri".to_string());
        assert!(address.to_string().contains("invalid server address"));

        let conn = ChannelError::ConnectionFailed("refused".to_string());
        assert!(conn.to_string().contains("connection failed"));

        let internal = ChannelError::Internal("entry vanished".to_string());
        assert!(internal.to_string().contains("internal error"));
    }

    #[test]
    fn test_is_closed() {
        assert!(ChannelError::AlreadyClosed.is_closed());
        assert!(!ChannelError::Internal("x".to_string()).is_closed());
        assert!(!ChannelError::invalid("x").is_closed());
    }
}
