use std::fmt;

use cmdwire_frame::{Frame, Value};

/// Fault code: no handler is registered under the command name.
pub const FAULT_COMMAND_NOT_FOUND: &str = "command_not_found";
/// Fault code: argument count or shapes do not match the handler.
pub const FAULT_ARGUMENT_SHAPE_MISMATCH: &str = "argument_shape_mismatch";
/// Fault code: the handler ran and reported an error.
pub const FAULT_HANDLER: &str = "handler_fault";
/// Fault code: the frame was refused before it reached the wire.
pub const FAULT_REJECTED: &str = "rejected";

/// Category of a [`Fault`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultKind {
    CommandNotFound,
    ArgumentShapeMismatch,
    Handler,
    Rejected,
    /// A code this side does not know, kept verbatim.
    Other(String),
}

impl FaultKind {
    pub fn code(&self) -> &str {
        match self {
            Self::CommandNotFound => FAULT_COMMAND_NOT_FOUND,
            Self::ArgumentShapeMismatch => FAULT_ARGUMENT_SHAPE_MISMATCH,
            Self::Handler => FAULT_HANDLER,
            Self::Rejected => FAULT_REJECTED,
            Self::Other(code) => code,
        }
    }

    pub fn from_code(code: &str) -> Self {
        match code {
            FAULT_COMMAND_NOT_FOUND => Self::CommandNotFound,
            FAULT_ARGUMENT_SHAPE_MISMATCH => Self::ArgumentShapeMismatch,
            FAULT_HANDLER => Self::Handler,
            FAULT_REJECTED => Self::Rejected,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Error outcome of a dispatched command, as carried in a fault frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn command_not_found(command: &str) -> Self {
        Self::new(
            FaultKind::CommandNotFound,
            format!("no handler registered for '{command}'"),
        )
    }

    pub fn argument_mismatch(message: impl fmt::Display) -> Self {
        Self::new(FaultKind::ArgumentShapeMismatch, message.to_string())
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Handler, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Rejected, message)
    }

    /// Build the fault frame answering request `correlation_id`.
    pub fn to_frame(&self, correlation_id: u64, command: &str) -> Frame {
        Frame::fault(
            correlation_id,
            command,
            self.kind.code(),
            self.message.clone(),
        )
    }

    /// Read a fault back from a fault frame payload (`[code, message]`).
    ///
    /// Peers that send fewer or differently typed values still produce a
    /// fault; missing parts become [`FaultKind::Other`] or an empty message.
    pub fn from_payload(payload: Vec<Value>) -> Self {
        let mut values = payload.into_iter();
        let kind = match values.next() {
            Some(Value::Str(code)) => FaultKind::from_code(&code),
            Some(other) => FaultKind::Other(format!("{other:?}")),
            None => FaultKind::Other(String::new()),
        };
        let message = match values.next() {
            Some(Value::Str(message)) => message,
            Some(other) => format!("{other:?}"),
            None => String::new(),
        };
        Self { kind, message }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip() {
        for kind in [
            FaultKind::CommandNotFound,
            FaultKind::ArgumentShapeMismatch,
            FaultKind::Handler,
            FaultKind::Rejected,
        ] {
            assert_eq!(FaultKind::from_code(kind.code()), kind);
        }
        assert_eq!(
            FaultKind::from_code("quota_exceeded"),
            FaultKind::Other("quota_exceeded".to_string())
        );
    }

    #[test]
    fn frame_payload_roundtrip() {
        let fault = Fault::command_not_found("Nope");
        let frame = fault.to_frame(12, "Nope");
        assert_eq!(frame.correlation_id(), Some(12));
        assert_eq!(Fault::from_payload(frame.into_payload()), fault);
    }

    #[test]
    fn odd_payload_still_yields_fault() {
        let fault = Fault::from_payload(vec![Value::Int(5)]);
        assert_eq!(fault.kind, FaultKind::Other("Int(5)".to_string()));
        assert!(fault.message.is_empty());
    }

    #[test]
    fn display_includes_code() {
        let fault = Fault::handler("boom");
        assert_eq!(fault.to_string(), "handler_fault: boom");
    }
}
