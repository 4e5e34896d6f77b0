//! X25519 key exchange carried over ordinary commands, followed by the
//! switch to the session cipher.
//!
//! ```text
//! client                                   server
//!   | -- StartKeyExchange(client_pub) ---->  |  derive key, KeyExchanged
//!   | <--------- response(server_pub) -----  |
//!   |  derive key, install inbound cipher    |
//!   | -- CompleteKeyExchange() (clear) ---->  |  install cipher both ways
//!   |  install outbound cipher               |
//!   | ========= encrypted frames =========== |
//! ```
//!
//! Each side decrypts as soon as packets arrive flagged as encrypted, so no
//! frame is lost or misread across the switch.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use cmdwire_frame::{IvMode, SessionCipher, KEY_LEN};
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::connection::Connection;
use crate::error::{PeerError, Result};
use crate::handler::{CallContext, HandlerResult};
use crate::registry::CommandRegistry;

/// Command that carries the client public key and returns the server's.
pub const START_KEY_EXCHANGE: &str = "StartKeyExchange";
/// Command that tells the server to switch to the session cipher.
pub const COMPLETE_KEY_EXCHANGE: &str = "CompleteKeyExchange";

/// X25519 public key length in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// A local X25519 key pair.
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the OS random source.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.public.to_bytes()
    }

    /// SHA-256 of the X25519 shared secret with `peer_public`.
    ///
    /// Both sides derive the same key from each other's public key. Peer keys
    /// that force an all-zero shared secret are rejected.
    pub fn derive_secret(&self, peer_public: &[u8; PUBLIC_KEY_LEN]) -> Result<[u8; KEY_LEN]> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer_public));
        if !shared.was_contributory() {
            return Err(PeerError::Handshake(
                "peer public key is a low-order point".to_string(),
            ));
        }
        Ok(Sha256::digest(shared.as_bytes()).into())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public.as_bytes())
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Settings for the key exchange. Both ends must use the same IV mode.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Timeout for the `StartKeyExchange` call.
    pub timeout: Duration,
    pub iv_mode: IvMode,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            iv_mode: IvMode::Zero,
        }
    }
}

/// Per-connection key exchange state.
pub(crate) enum HandshakeState {
    NoHandshake,
    /// Shared key derived, cipher not yet in use.
    KeyExchanged { key: [u8; KEY_LEN] },
    CipherInstalled,
}

impl HandshakeState {
    pub(crate) fn phase(&self) -> HandshakePhase {
        match self {
            Self::NoHandshake => HandshakePhase::NoHandshake,
            Self::KeyExchanged { .. } => HandshakePhase::KeyExchanged,
            Self::CipherInstalled => HandshakePhase::CipherInstalled,
        }
    }
}

/// Observable handshake progress of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    NoHandshake,
    KeyExchanged,
    CipherInstalled,
}

fn record_exchanged_key(connection: &Connection, key: [u8; KEY_LEN]) -> Result<()> {
    let mut state = connection.handshake_state();
    match *state {
        HandshakeState::NoHandshake => {
            *state = HandshakeState::KeyExchanged { key };
            Ok(())
        }
        HandshakeState::KeyExchanged { .. } => Err(PeerError::Handshake(
            "key exchange already in progress".to_string(),
        )),
        HandshakeState::CipherInstalled => Err(PeerError::Handshake(
            "session cipher already installed".to_string(),
        )),
    }
}

fn take_exchanged_key(connection: &Connection) -> Result<[u8; KEY_LEN]> {
    let mut state = connection.handshake_state();
    match std::mem::replace(&mut *state, HandshakeState::CipherInstalled) {
        HandshakeState::KeyExchanged { key } => Ok(key),
        previous => {
            let phase = previous.phase();
            *state = previous;
            Err(PeerError::Handshake(format!(
                "no exchanged key to install (state: {phase:?})"
            )))
        }
    }
}

/// Register the server half of the key exchange.
///
/// `StartKeyExchange([u8; 32]) -> [u8; 32]` derives and stores the shared
/// key; `CompleteKeyExchange()` installs the cipher in both directions.
pub fn register_server_handshake(
    registry: &mut CommandRegistry,
    keys: Arc<KeyPair>,
    config: HandshakeConfig,
) -> Result<()> {
    registry.register(
        START_KEY_EXCHANGE,
        move |ctx: &CallContext,
              client_public: [u8; PUBLIC_KEY_LEN]|
              -> HandlerResult<[u8; PUBLIC_KEY_LEN]> {
            let key = keys.derive_secret(&client_public)?;
            record_exchanged_key(ctx.connection(), key)?;
            tracing::debug!(connection = %ctx.connection_id(), "shared key derived");
            Ok(keys.public_key())
        },
    )?;

    let iv_mode = config.iv_mode;
    registry.register(
        COMPLETE_KEY_EXCHANGE,
        move |ctx: &CallContext| -> HandlerResult<()> {
            let key = take_exchanged_key(ctx.connection())?;
            ctx.connection()
                .install_cipher(SessionCipher::from_shared_key(key, iv_mode))?;
            tracing::info!(
                connection = %ctx.connection_id(),
                endpoint = %ctx.endpoint(),
                "session cipher installed"
            );
            Ok(())
        },
    )?;
    Ok(())
}

/// Run the client half of the key exchange on `connection`.
///
/// On success both directions are encrypted: frames the server sent before
/// its switch are still read in clear, everything after is decrypted.
pub async fn client_handshake(
    connection: &Connection,
    keys: &KeyPair,
    config: &HandshakeConfig,
) -> Result<()> {
    if connection.handshake_phase() != HandshakePhase::NoHandshake {
        return Err(PeerError::Handshake(
            "handshake already performed on this connection".to_string(),
        ));
    }

    let server_public: [u8; PUBLIC_KEY_LEN] = connection
        .call_with_timeout(
            START_KEY_EXCHANGE,
            (keys.public_key(),),
            Some(config.timeout),
        )
        .await?;
    let key = keys.derive_secret(&server_public)?;
    record_exchanged_key(connection, key)?;
    let key = take_exchanged_key(connection)?;

    let cipher = SessionCipher::from_shared_key(key, config.iv_mode);
    connection.install_inbound_cipher(cipher.clone())?;
    connection.send(COMPLETE_KEY_EXCHANGE, ())?;
    connection.install_outbound_cipher(cipher)?;

    tracing::info!(
        connection = %connection.id(),
        endpoint = %connection.endpoint(),
        "session cipher installed"
    );
    Ok(())
}
