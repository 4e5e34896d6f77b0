use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::kind::FrameKind;
use crate::value::{decode_value, encode_value, Value};

const MAX_COMMAND_LEN: usize = u16::MAX as usize;
const MAX_VALUES: usize = u16::MAX as usize;

/// The unit on the wire: a named command, its kind, an optional correlation
/// id and an ordered list of values.
///
/// Frames are immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    command: String,
    correlation_id: Option<u64>,
    kind: FrameKind,
    payload: Vec<Value>,
}

impl Frame {
    /// A correlated request expecting a response or fault.
    pub fn request(correlation_id: u64, command: impl Into<String>, payload: Vec<Value>) -> Self {
        Self {
            command: command.into(),
            correlation_id: Some(correlation_id),
            kind: FrameKind::Request,
            payload,
        }
    }

    /// A fire-and-forget send.
    pub fn fire(command: impl Into<String>, payload: Vec<Value>) -> Self {
        Self {
            command: command.into(),
            correlation_id: None,
            kind: FrameKind::Fire,
            payload,
        }
    }

    /// A successful reply carrying one result value.
    pub fn response(correlation_id: u64, command: impl Into<String>, result: Value) -> Self {
        Self {
            command: command.into(),
            correlation_id: Some(correlation_id),
            kind: FrameKind::Response,
            payload: vec![result],
        }
    }

    /// An error reply: `[code, message]`.
    pub fn fault(
        correlation_id: u64,
        command: impl Into<String>,
        code: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            correlation_id: Some(correlation_id),
            kind: FrameKind::Fault,
            payload: vec![Value::Str(code.to_string()), Value::Str(message.into())],
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn correlation_id(&self) -> Option<u64> {
        self.correlation_id
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn payload(&self) -> &[Value] {
        &self.payload
    }

    /// Consume the frame and take its payload.
    pub fn into_payload(self) -> Vec<Value> {
        self.payload
    }

    /// Serialize the frame body (everything inside the packet header).
    ///
    /// Body layout:
    /// ```text
    /// ┌─────────┬──────────┬────────────────┬──────────────┬────────┬──────────────┬────────┐
    /// │ Kind 1B │ HasId 1B │ [Id u64 LE]    │ NameLen u16  │ Name   │ Count u16 LE │ Values │
    /// └─────────┴──────────┴────────────────┴──────────────┴────────┴──────────────┴────────┘
    /// ```
    pub fn encode_body(&self, dst: &mut BytesMut) -> Result<()> {
        self.validate()?;
        if self.command.len() > MAX_COMMAND_LEN {
            return Err(FrameError::Malformed(format!(
                "command name too long ({} bytes)",
                self.command.len()
            )));
        }
        if self.payload.len() > MAX_VALUES {
            return Err(FrameError::Malformed(format!(
                "too many values ({})",
                self.payload.len()
            )));
        }

        dst.put_u8(self.kind.code());
        match self.correlation_id {
            Some(id) => {
                dst.put_u8(1);
                dst.put_u64_le(id);
            }
            None => dst.put_u8(0),
        }
        dst.put_u16_le(self.command.len() as u16);
        dst.put_slice(self.command.as_bytes());
        dst.put_u16_le(self.payload.len() as u16);
        for value in &self.payload {
            encode_value(value, dst)?;
        }
        Ok(())
    }

    /// Parse a complete frame body. Trailing bytes are rejected.
    pub fn decode_body(mut body: Bytes) -> Result<Self> {
        if body.remaining() < 2 {
            return Err(FrameError::Truncated("frame kind"));
        }
        let kind = FrameKind::from_code(body.get_u8())?;
        let correlation_id = match body.get_u8() {
            0 => None,
            1 => {
                if body.remaining() < 8 {
                    return Err(FrameError::Truncated("correlation id"));
                }
                Some(body.get_u64_le())
            }
            other => {
                return Err(FrameError::Malformed(format!(
                    "invalid correlation flag {other}"
                )))
            }
        };

        if body.remaining() < 2 {
            return Err(FrameError::Truncated("command name"));
        }
        let name_len = body.get_u16_le() as usize;
        if body.remaining() < name_len {
            return Err(FrameError::Truncated("command name"));
        }
        let command = String::from_utf8(body.split_to(name_len).to_vec())
            .map_err(|_| FrameError::Malformed("command name is not UTF-8".to_string()))?;

        if body.remaining() < 2 {
            return Err(FrameError::Truncated("value count"));
        }
        let count = body.get_u16_le() as usize;
        let mut payload = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            payload.push(decode_value(&mut body)?);
        }

        if body.has_remaining() {
            return Err(FrameError::Malformed(format!(
                "{} trailing bytes after frame body",
                body.remaining()
            )));
        }

        let frame = Self {
            command,
            correlation_id,
            kind,
            payload,
        };
        frame.validate()?;
        Ok(frame)
    }

    fn validate(&self) -> Result<()> {
        if self.command.is_empty() {
            return Err(FrameError::Malformed("empty command name".to_string()));
        }
        match (self.kind.is_correlated(), self.correlation_id) {
            (true, None) => Err(FrameError::Malformed(format!(
                "{} frame without correlation id",
                self.kind
            ))),
            (false, Some(_)) => Err(FrameError::Malformed(format!(
                "{} frame must not carry a correlation id",
                self.kind
            ))),
            _ => Ok(()),
        }
    }
}
