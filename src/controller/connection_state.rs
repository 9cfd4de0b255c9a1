use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// The controller's view of its connection. Exactly one state is active at a time.
#[derive(Clone)]
pub enum ConnectionState {
    Disconnected,
    /// a connection attempt is in progress, i.e. the handshake did not complete yet
    Connecting,
    Connected,
    /// the last connection attempt or the connection itself failed. This is sticky until the next
    ///  `connect` or `disconnect`, except for a failed keep-alive ping: if data arrives after that,
    ///  the connection evidently works, and the state reverts to [ConnectionState::Connected].
    Error(Arc<anyhow::Error>),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ConnectionState::Error(_))
    }

    pub fn error(&self) -> Option<&anyhow::Error> {
        match self {
            ConnectionState::Error(e) => Some(e),
            _ => None,
        }
    }
}

impl Debug for ConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Error(e) => write!(f, "Error({:#})", e),
        }
    }
}

/// Error states are equal if they are both errors - the cause is informational
impl PartialEq for ConnectionState {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}
impl Eq for ConnectionState {}
