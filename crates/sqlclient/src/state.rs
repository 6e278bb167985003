//! Connection lifecycle state.
//!
//! ## State Transitions
//!
//! ```text
//! Disconnected -> Connecting (connect)
//! Connecting -> Connected (LOGINACK received)
//! Connecting -> Disconnected (any login failure or timeout)
//! Connected -> Executing (execute)
//! Executing -> Connected (response fully processed, or a server error)
//! Executing -> Disconnected (timeout, framing fault, fatal server error)
//! any -> Disconnected (disconnect)
//! ```

use std::fmt;

/// Runtime state of a [`Connection`](crate::Connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport is open.
    #[default]
    Disconnected,
    /// Transport open, login in progress.
    Connecting,
    /// Logged in and idle.
    Connected,
    /// A command is in flight.
    Executing,
}

impl ConnectionState {
    /// Whether a command may be started.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether a command is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Executing)
    }

    /// Whether the transport is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Executing => "executing",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert!(!ConnectionState::default().is_open());
    }

    #[test]
    fn test_only_connected_is_usable() {
        assert!(ConnectionState::Connected.is_usable());
        assert!(!ConnectionState::Connecting.is_usable());
        assert!(!ConnectionState::Executing.is_usable());
        assert!(ConnectionState::Executing.is_busy());
        assert!(ConnectionState::Executing.is_open());
    }
}
