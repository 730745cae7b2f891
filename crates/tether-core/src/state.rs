//! Connection lifecycle state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of one logical connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Idle. Terminal until the next `start()`.
    #[default]
    Disconnected,
    /// Initial negotiation and transport selection in flight.
    Connecting,
    /// A transport is open.
    Connected,
    /// Caller-initiated shutdown in flight.
    Disconnecting,
    /// Recovering from an unexpected drop.
    Reconnecting,
}

impl ConnectionState {
    /// Lowercase name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
