use std::time::Duration;

use crate::fault::Fault;

/// Errors that can occur in peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] cmdwire_frame::FrameError),

    /// Argument or result conversion error.
    #[error("value error: {0}")]
    Value(#[from] cmdwire_frame::ValueError),

    /// Socket-level error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A command with this name is already registered.
    #[error("command '{0}' is already registered")]
    DuplicateCommand(String),

    /// The command name cannot be registered or sent.
    #[error("invalid command name '{0}'")]
    InvalidCommand(String),

    /// The remote side answered a call with a fault.
    #[error("remote fault: {0}")]
    Fault(Fault),

    /// No response arrived within the call timeout.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The connection is gone.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// The outbound queue of the connection is full.
    #[error("outbound queue full ({capacity} frames)")]
    QueueFull { capacity: usize },

    /// Key exchange failed or was attempted out of order.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

pub type Result<T> = std::result::Result<T, PeerError>;
