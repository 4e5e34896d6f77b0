/// Errors that can occur while converting argument values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    /// The value does not have the shape the receiving slot expects.
    #[error("expected {expected}, got {actual}")]
    ShapeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// An integer does not fit the target type.
    #[error("integer {value} out of range for {target}")]
    OutOfRange { value: i64, target: &'static str },

    /// A finite float is too large for the target type.
    #[error("float {value} out of range for {target}")]
    FloatOutOfRange { value: f64, target: &'static str },

    /// An unsigned integer is too large for the wire's signed 64-bit slot.
    #[error("integer {0} does not fit in i64")]
    Overflow(u64),

    /// A fixed-size byte array received the wrong number of bytes.
    #[error("expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// A JSON value could not be converted to or from the target type.
    #[error("json conversion failed: {0}")]
    Json(String),
}

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The packet header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x4357 \"CW\")")]
    InvalidMagic,

    /// The packet header carries flag bits this implementation does not know.
    #[error("unsupported frame flags 0x{0:02x}")]
    UnsupportedFlags(u8),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The frame body ended before all declared fields were read.
    #[error("truncated frame body while reading {0}")]
    Truncated(&'static str),

    /// The frame body is structurally invalid.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// An encrypted packet arrived but no session cipher is installed.
    #[error("encrypted frame received before a session cipher was installed")]
    CipherMissing,

    /// A cleartext packet arrived after the peer switched to encryption.
    #[error("cleartext frame received after encryption was established")]
    Downgrade,

    /// The session cipher slot was already filled.
    #[error("session cipher already installed")]
    CipherAlreadyInstalled,

    /// Ciphertext could not be decrypted (bad length or padding).
    #[error("frame decryption failed")]
    Decrypt,

    /// A value inside the frame could not be converted.
    #[error("value error: {0}")]
    Value(#[from] ValueError),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
