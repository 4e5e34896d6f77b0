//! Frame kinds.
//!
//! The kind byte decides how the receiving side routes a frame: requests and
//! fire-and-forget sends go to the dispatcher, responses and faults go to the
//! caller waiting on the matching correlation id.

use crate::error::{FrameError, Result};

/// A correlated call expecting a response or fault.
pub const REQUEST: u8 = 0;

/// A fire-and-forget send; no reply is produced.
pub const FIRE: u8 = 1;

/// A successful reply to a request.
pub const RESPONSE: u8 = 2;

/// An error reply to a request.
pub const FAULT: u8 = 3;

/// What a frame is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Request,
    Fire,
    Response,
    Fault,
}

impl FrameKind {
    /// Wire code of this kind.
    pub fn code(self) -> u8 {
        match self {
            FrameKind::Request => REQUEST,
            FrameKind::Fire => FIRE,
            FrameKind::Response => RESPONSE,
            FrameKind::Fault => FAULT,
        }
    }

    /// Parse a wire code.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            REQUEST => Ok(FrameKind::Request),
            FIRE => Ok(FrameKind::Fire),
            RESPONSE => Ok(FrameKind::Response),
            FAULT => Ok(FrameKind::Fault),
            other => Err(FrameError::Malformed(format!("unknown frame kind {other}"))),
        }
    }

    /// Whether frames of this kind must carry a correlation id.
    pub fn is_correlated(self) -> bool {
        !matches!(self, FrameKind::Fire)
    }

    /// Whether frames of this kind answer an earlier request.
    pub fn is_reply(self) -> bool {
        matches!(self, FrameKind::Response | FrameKind::Fault)
    }

    /// Human-readable name, used in logs.
    pub fn name(self) -> &'static str {
        match self {
            FrameKind::Request => "REQUEST",
            FrameKind::Fire => "FIRE",
            FrameKind::Response => "RESPONSE",
            FrameKind::Fault => "FAULT",
        }
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
