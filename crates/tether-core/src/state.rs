// ABOUTME: Connectivity states reported by an underlying channel.
// ABOUTME: Numbered like gRPC core so callers can exchange them as plain integers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// Connectivity state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectivityState {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

impl ConnectivityState {
    pub fn as_i32(self) -> i32 {
        match self {
            ConnectivityState::Idle => 0,
            ConnectivityState::Connecting => 1,
            ConnectivityState::Ready => 2,
            ConnectivityState::TransientFailure => 3,
            ConnectivityState::Shutdown => 4,
        }
    }

    /// Terminal states never change again.
    pub fn is_terminal(self) -> bool {
        self == ConnectivityState::Shutdown
    }
}

impl TryFrom<i32> for ConnectivityState {
    type Error = ChannelError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(ConnectivityState::Idle),
            1 => Ok(ConnectivityState::Connecting),
            2 => Ok(ConnectivityState::Ready),
            3 => Ok(ConnectivityState::TransientFailure),
            4 => Ok(ConnectivityState::Shutdown),
            other => Err(ChannelError::invalid(format!(
                "unknown connectivity state {other}"
            ))),
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectivityState::Idle => "IDLE",
            ConnectivityState::Connecting => "CONNECTING",
            ConnectivityState::Ready => "READY",
            ConnectivityState::TransientFailure => "TRANSIENT_FAILURE",
            ConnectivityState::Shutdown => "SHUTDOWN",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_grpc_core() {
        assert_eq!(ConnectivityState::Idle.as_i32(), 0);
        assert_eq!(ConnectivityState::Ready.as_i32(), 2);
        assert_eq!(ConnectivityState::Shutdown.as_i32(), 4);
        assert_eq!(
            ConnectivityState::try_from(3).unwrap(),
            ConnectivityState::TransientFailure
        );
    }

    #[test]
    fn test_unknown_code_rejected() {
        let err = ConnectivityState::try_from(9).unwrap_err();
        assert!(matches!(err, ChannelError::InvalidArgument(_)));
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectivityState::TransientFailure.to_string(), "TRANSIENT_FAILURE");
        assert!(ConnectivityState::Shutdown.is_terminal());
        assert!(!ConnectivityState::Ready.is_terminal());
    }
}
