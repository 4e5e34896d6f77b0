use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::cipher::{CipherSlot, SessionCipher};
use crate::error::{FrameError, Result};
use crate::frame::Frame;

/// Packet header: magic (2) + length (4) + flags (1) + reserved (1) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Magic bytes: "CW" (0x43 0x57).
pub const MAGIC: [u8; 2] = [0x43, 0x57];

/// Header flag: the body is ciphertext under the session cipher.
pub const FLAG_ENCRYPTED: u8 = 0x01;

const KNOWN_FLAGS: u8 = FLAG_ENCRYPTED;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// A length-delimited packet as it sits on the stream.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Header flags.
    pub flags: u8,
    /// The (possibly encrypted) frame body.
    pub body: Bytes,
}

impl Packet {
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    /// The total wire size of this packet (header + body).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }
}

/// Encode a packet into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬───────────┬──────────┬────────────┬─────────────────┐
/// │ Magic (2B)   │ Length    │ Flags    │ Reserved   │ Body            │
/// │ 0x43 0x57    │ (4B LE)   │ (1B)     │ (1B, 0)    │ (Length bytes)  │
/// │ "CW"         │           │          │            │                 │
/// └──────────────┴───────────┴──────────┴────────────┴─────────────────┘
/// ```
pub fn encode_packet(flags: u8, body: &[u8], dst: &mut BytesMut) -> Result<()> {
    if body.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: body.len(),
            max: u32::MAX as usize,
        });
    }
    if flags & !KNOWN_FLAGS != 0 {
        return Err(FrameError::UnsupportedFlags(flags));
    }
    dst.reserve(HEADER_SIZE + body.len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(body.len() as u32);
    dst.put_u8(flags);
    dst.put_u8(0);
    dst.put_slice(body);
    Ok(())
}

/// Decode a packet from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete packet yet.
/// On success, consumes the packet bytes from the buffer.
pub fn decode_packet(src: &mut BytesMut, max_payload: usize) -> Result<Option<Packet>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    // Check magic
    if src[0..2] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }

    let body_len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
    let flags = src[6];
    let reserved = src[7];

    if flags & !KNOWN_FLAGS != 0 {
        return Err(FrameError::UnsupportedFlags(flags));
    }
    if reserved != 0 {
        return Err(FrameError::Malformed(format!(
            "reserved header byte is 0x{reserved:02x}"
        )));
    }

    if body_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: body_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + body_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None); // Need more data
    }

    src.advance(HEADER_SIZE);
    let body = src.split_to(body_len).freeze();

    Ok(Some(Packet { flags, body }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum body size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Stream codec turning bytes into [`Frame`]s and back.
///
/// Decoding reads the inbound cipher from a shared [`CipherSlot`] before every
/// packet, so a cipher published while one frame is being dispatched applies
/// from the next packet on. Packets carry their own `ENCRYPTED` flag; once the
/// peer has sent one encrypted packet, cleartext from it is refused.
///
/// Encoding encrypts once [`FrameCodec::install_outbound`] has been called.
/// The writer owning the codec decides where in its queue that happens.
#[derive(Debug)]
pub struct FrameCodec {
    config: FrameConfig,
    inbound: Arc<CipherSlot>,
    outbound: Option<SessionCipher>,
    peer_encrypting: bool,
}

impl FrameCodec {
    /// Create a codec with default configuration and its own cipher slot.
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    /// Create a codec with explicit configuration and its own cipher slot.
    pub fn with_config(config: FrameConfig) -> Self {
        Self::with_inbound_slot(config, Arc::new(CipherSlot::new()))
    }

    /// Create a codec that decrypts with a slot shared with its connection.
    pub fn with_inbound_slot(config: FrameConfig, inbound: Arc<CipherSlot>) -> Self {
        Self {
            config,
            inbound,
            outbound: None,
            peer_encrypting: false,
        }
    }

    /// The shared inbound cipher slot.
    pub fn inbound_slot(&self) -> &Arc<CipherSlot> {
        &self.inbound
    }

    /// Encrypt every frame encoded from now on.
    pub fn install_outbound(&mut self, cipher: SessionCipher) -> Result<()> {
        if self.outbound.is_some() {
            return Err(FrameError::CipherAlreadyInstalled);
        }
        self.outbound = Some(cipher);
        Ok(())
    }

    pub fn is_outbound_encrypted(&self) -> bool {
        self.outbound.is_some()
    }

    /// Whether the peer has switched its side of the stream to encryption.
    pub fn is_peer_encrypting(&self) -> bool {
        self.peer_encrypting
    }

    /// Current codec configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    fn open(&mut self, packet: Packet) -> Result<Bytes> {
        if packet.is_encrypted() {
            let cipher = self.inbound.get().ok_or(FrameError::CipherMissing)?;
            let plaintext = cipher.decrypt(&packet.body)?;
            if !self.peer_encrypting {
                tracing::debug!("peer switched to encrypted frames");
                self.peer_encrypting = true;
            }
            Ok(Bytes::from(plaintext))
        } else if self.peer_encrypting {
            Err(FrameError::Downgrade)
        } else {
            Ok(packet.body)
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let Some(packet) = decode_packet(src, self.config.max_payload_size)? else {
            return Ok(None);
        };
        let body = self.open(packet)?;
        Frame::decode_body(body).map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        let mut body = BytesMut::new();
        frame.encode_body(&mut body)?;

        let (flags, body) = match &self.outbound {
            Some(cipher) => (FLAG_ENCRYPTED, Bytes::from(cipher.encrypt(&body))),
            None => (0, body.freeze()),
        };

        if body.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: body.len(),
                max: self.config.max_payload_size,
            });
        }

        encode_packet(flags, &body, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::cipher::{IvMode, KEY_LEN};
    use crate::value::Value;

    fn hello(n: i64) -> Frame {
        Frame::fire("Hello", vec![Value::Int(n)])
    }

    fn cipher() -> SessionCipher {
        SessionCipher::from_shared_key([0x11; KEY_LEN], IvMode::Zero)
    }

    #[test]
    fn test_packet_roundtrip() {
        let mut buf = BytesMut::new();
        let body = b"hello, cmdwire!";

        encode_packet(0, body, &mut buf).unwrap();

        assert_eq!(buf.len(), HEADER_SIZE + body.len());

        let packet = decode_packet(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();

        assert!(!packet.is_encrypted());
        assert_eq!(packet.body.as_ref(), body);
        assert_eq!(packet.wire_size(), HEADER_SIZE + body.len());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete_header() {
        let mut buf = BytesMut::from(&[0x43, 0x57, 0x00][..]);
        let result = decode_packet(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_decode_incomplete_body() {
        let mut buf = BytesMut::new();
        encode_packet(0, b"hello", &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 2); // Truncate body

        let result = decode_packet(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), HEADER_SIZE + 2, "partial data must be kept");
    }

    #[test]
    fn test_decode_invalid_magic() {
        let mut buf = BytesMut::from(&[0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00][..]);
        let result = decode_packet(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::InvalidMagic)));
    }

    #[test]
    fn test_decode_unknown_flags() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(0);
        buf.put_u8(0x80);
        buf.put_u8(0);
        let result = decode_packet(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::UnsupportedFlags(0x80))));
    }

    #[test]
    fn test_decode_payload_too_large() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(1024 * 1024 * 32); // 32 MiB
        buf.put_u8(0);
        buf.put_u8(0);

        let result = decode_packet(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn codec_frame_roundtrip() {
        let mut codec = FrameCodec::new();
        let mut wire = BytesMut::new();
        codec.encode(hello(1), &mut wire).unwrap();
        codec.encode(hello(2), &mut wire).unwrap();

        assert_eq!(codec.decode(&mut wire).unwrap(), Some(hello(1)));
        assert_eq!(codec.decode(&mut wire).unwrap(), Some(hello(2)));
        assert_eq!(codec.decode(&mut wire).unwrap(), None);
    }

    #[test]
    fn byte_by_byte_feed_resynchronises() {
        let mut codec = FrameCodec::new();
        let mut wire = BytesMut::new();
        codec.encode(hello(42), &mut wire).unwrap();

        let mut buf = BytesMut::new();
        let mut decoded = None;
        for (i, byte) in wire.iter().enumerate() {
            buf.put_u8(*byte);
            let result = codec.decode(&mut buf).unwrap();
            if i + 1 < wire.len() {
                assert!(result.is_none(), "frame complete too early at byte {i}");
            } else {
                decoded = result;
            }
        }
        assert_eq!(decoded, Some(hello(42)));
    }

    #[test]
    fn eof_mid_frame_is_connection_closed() {
        let mut codec = FrameCodec::new();
        let mut wire = BytesMut::new();
        codec.encode(hello(1), &mut wire).unwrap();
        wire.truncate(wire.len() - 1);

        assert!(matches!(
            codec.decode_eof(&mut wire),
            Err(FrameError::ConnectionClosed)
        ));
        assert!(codec.decode_eof(&mut BytesMut::new()).unwrap().is_none());
    }

    #[test]
    fn encrypted_frames_need_inbound_cipher() {
        let mut sender = FrameCodec::new();
        sender.install_outbound(cipher()).unwrap();
        let mut wire = BytesMut::new();
        sender.encode(hello(1), &mut wire).unwrap();
        assert_eq!(wire[6], FLAG_ENCRYPTED);

        let mut receiver = FrameCodec::new();
        let mut copy = wire.clone();
        assert!(matches!(
            receiver.decode(&mut copy),
            Err(FrameError::CipherMissing)
        ));

        let mut receiver = FrameCodec::new();
        receiver.inbound_slot().install(cipher()).unwrap();
        assert_eq!(receiver.decode(&mut wire).unwrap(), Some(hello(1)));
        assert!(receiver.is_peer_encrypting());
    }

    #[test]
    fn frames_before_swap_stay_cleartext() {
        // The sender queues A, switches, then B. The receiver publishes its
        // cipher after dispatching A but both packets are already buffered.
        let mut sender = FrameCodec::new();
        let mut wire = BytesMut::new();
        sender.encode(hello(1), &mut wire).unwrap();
        sender.install_outbound(cipher()).unwrap();
        sender.encode(hello(2), &mut wire).unwrap();

        let mut receiver = FrameCodec::new();
        assert_eq!(receiver.decode(&mut wire).unwrap(), Some(hello(1)));
        receiver.inbound_slot().install(cipher()).unwrap();
        assert_eq!(receiver.decode(&mut wire).unwrap(), Some(hello(2)));
    }

    #[test]
    fn cleartext_after_encryption_is_a_downgrade() {
        let mut encrypted = FrameCodec::new();
        encrypted.install_outbound(cipher()).unwrap();
        let mut plain = FrameCodec::new();

        let mut wire = BytesMut::new();
        encrypted.encode(hello(1), &mut wire).unwrap();
        plain.encode(hello(2), &mut wire).unwrap();

        let mut receiver = FrameCodec::new();
        receiver.inbound_slot().install(cipher()).unwrap();
        assert_eq!(receiver.decode(&mut wire).unwrap(), Some(hello(1)));
        assert!(matches!(
            receiver.decode(&mut wire),
            Err(FrameError::Downgrade)
        ));
    }

    #[test]
    fn outbound_installs_once() {
        let mut codec = FrameCodec::new();
        codec.install_outbound(cipher()).unwrap();
        assert!(codec.is_outbound_encrypted());
        assert!(matches!(
            codec.install_outbound(cipher()),
            Err(FrameError::CipherAlreadyInstalled)
        ));
    }

    #[test]
    fn oversized_frame_is_refused_on_encode() {
        let mut codec = FrameCodec::with_config(FrameConfig {
            max_payload_size: 16,
        });
        let frame = Frame::fire("Big", vec![Value::Str("x".repeat(64))]);
        let mut wire = BytesMut::new();
        assert!(matches!(
            codec.encode(frame, &mut wire),
            Err(FrameError::PayloadTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn framed_roundtrip_over_duplex() {
        let (left, right) = tokio::io::duplex(64);
        let mut writer = FramedWrite::new(left, FrameCodec::new());
        let mut reader = FramedRead::new(right, FrameCodec::new());

        let sender = tokio::spawn(async move {
            for n in 0..32 {
                writer.send(hello(n)).await.unwrap();
            }
        });

        for n in 0..32 {
            let frame = reader.next().await.unwrap().unwrap();
            assert_eq!(frame, hello(n));
        }
        sender.await.unwrap();
        assert!(reader.next().await.is_none());
    }
}
