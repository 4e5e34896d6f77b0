use std::fmt;
use std::io;

use cmdwire_frame::FrameError;
use cmdwire_peer::PeerError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const PROTOCOL_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::AddrInUse | io::ErrorKind::AddrNotAvailable => USAGE,
        io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } | FrameError::Value(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        FrameError::InvalidMagic
        | FrameError::UnsupportedFlags(_)
        | FrameError::Malformed(_)
        | FrameError::Truncated(_)
        | FrameError::Decrypt
        | FrameError::Downgrade
        | FrameError::CipherMissing => CliError::new(PROTOCOL_ERROR, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn peer_error(context: &str, err: PeerError) -> CliError {
    match err {
        PeerError::Io(err) => io_error(context, err),
        PeerError::Frame(err) => frame_error(context, err),
        PeerError::Value(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        PeerError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        PeerError::InvalidCommand(_) => CliError::new(USAGE, format!("{context}: {err}")),
        PeerError::Fault(_) | PeerError::Handshake(_) => {
            CliError::new(PROTOCOL_ERROR, format!("{context}: {err}"))
        }
        PeerError::Disconnected(_) | PeerError::QueueFull { .. } => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn maps_peer_errors_to_exit_codes() {
        assert_eq!(
            peer_error("call", PeerError::Timeout(Duration::from_secs(1))).code,
            TIMEOUT
        );
        assert_eq!(
            peer_error("send", PeerError::Disconnected("gone".to_string())).code,
            FAILURE
        );
        assert_eq!(
            peer_error("handshake", PeerError::Handshake("bad".to_string())).code,
            PROTOCOL_ERROR
        );
        assert_eq!(
            peer_error("register", PeerError::DuplicateCommand("X".to_string())).code,
            INTERNAL
        );
    }

    #[test]
    fn maps_io_kinds() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(peer_error("connect", PeerError::Io(refused)).code, FAILURE);

        let in_use = io::Error::from(io::ErrorKind::AddrInUse);
        let err = frame_error("bind", FrameError::Io(in_use));
        assert_eq!(err.code, USAGE);
        assert!(err.message.starts_with("bind: "));
    }
}
