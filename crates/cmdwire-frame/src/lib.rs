//! Length-prefixed command frames for cmdwire.
//!
//! Every packet on the stream is framed with:
//! - A 2-byte magic number ("CW") for stream synchronization
//! - A 4-byte little-endian body length
//! - A flags byte (bit 0: body encrypted) and a reserved byte
//!
//! The body is a [`Frame`]: command name, kind, optional correlation id and
//! an ordered list of [`Value`]s. Once a session cipher is installed the body
//! travels as AES-256-CBC ciphertext.

pub mod cipher;
pub mod codec;
pub mod error;
pub mod frame;
pub mod kind;
pub mod value;

pub use cipher::{CipherSlot, IvMode, SessionCipher, IV_LEN, KEY_LEN};
pub use codec::{
    decode_packet, encode_packet, FrameCodec, FrameConfig, Packet, DEFAULT_MAX_PAYLOAD,
    FLAG_ENCRYPTED, HEADER_SIZE,
};
pub use error::{FrameError, Result, ValueError};
pub use frame::Frame;
pub use kind::FrameKind;
pub use value::{decode_value, encode_value, FromValue, IntoArgs, IntoValue, Json, Shape, Value};
