//! Session cipher applied to frame bodies after the key exchange.
//!
//! AES-256-CBC with PKCS#7 padding. Every frame body is encrypted on its own
//! with the same key and IV, so identical bodies produce identical
//! ciphertext. The default all-zero IV matches peers that never negotiate
//! one; [`IvMode::Derived`] takes the IV from the shared key instead.

use std::fmt;
use std::sync::OnceLock;

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha2::{Digest, Sha256};

use crate::error::{FrameError, Result};

/// Key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// IV length in bytes (one AES block).
pub const IV_LEN: usize = 16;

const IV_LABEL: &[u8] = b"cmdwire session iv";

/// How the IV is chosen once a shared key exists. Both ends must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IvMode {
    /// Fixed all-zero IV.
    #[default]
    Zero,
    /// First block of `SHA-256(label || key)`.
    Derived,
}

/// Symmetric cipher state for one direction of a connection.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCipher {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl SessionCipher {
    /// Create a cipher from explicit key material.
    pub fn new(key: [u8; KEY_LEN], iv: [u8; IV_LEN]) -> Self {
        Self { key, iv }
    }

    /// Create a cipher from a derived shared key and an IV policy.
    pub fn from_shared_key(key: [u8; KEY_LEN], mode: IvMode) -> Self {
        let iv = match mode {
            IvMode::Zero => [0u8; IV_LEN],
            IvMode::Derived => {
                let digest = Sha256::new()
                    .chain_update(IV_LABEL)
                    .chain_update(key)
                    .finalize();
                let mut iv = [0u8; IV_LEN];
                iv.copy_from_slice(&digest[..IV_LEN]);
                iv
            }
        };
        Self { key, iv }
    }

    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    /// Encrypt one frame body.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        cbc::Encryptor::<Aes256>::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    /// Decrypt one frame body.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.is_empty() || ciphertext.len() % IV_LEN != 0 {
            return Err(FrameError::Decrypt);
        }
        cbc::Decryptor::<Aes256>::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| FrameError::Decrypt)
    }
}

impl fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCipher")
            .field("key", &format_args!("<redacted:{} bytes>", KEY_LEN))
            .field("iv_zero", &self.iv.iter().all(|b| *b == 0))
            .finish()
    }
}

/// Publish-once slot holding the inbound cipher of a connection.
///
/// Shared between the connection (which installs) and its decoder (which
/// reads before every packet). There is exactly one successful install.
#[derive(Debug, Default)]
pub struct CipherSlot {
    cipher: OnceLock<SessionCipher>,
}

impl CipherSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the cipher. Fails if one is already installed.
    pub fn install(&self, cipher: SessionCipher) -> Result<()> {
        self.cipher
            .set(cipher)
            .map_err(|_| FrameError::CipherAlreadyInstalled)
    }

    pub fn get(&self) -> Option<&SessionCipher> {
        self.cipher.get()
    }

    pub fn is_installed(&self) -> bool {
        self.cipher.get().is_some()
    }
}
