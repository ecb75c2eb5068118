//! Envelope payload encryption.
//!
//! Two schemes behind one contract:
//! - `V2` (preferred): XChaCha20-Poly1305 with a random 192-bit nonce.
//! - `V1` (legacy): AES-256-CBC with an HMAC-SHA256 tag over `iv || ct`.
//!
//! The ciphertext framing is self-identifying: the base64 payload decodes
//! to a leading scheme byte (`0x02` or `0x01`) followed by the scheme's
//! material. On encrypt the preferred scheme is used when enabled,
//! otherwise the fallback; on decrypt the framing selects the scheme and
//! anything else fails closed.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::SchemePref;
use crate::error::CryptoError;
use crate::keyring::ConversationKeys;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Scheme marker byte for V2 payloads.
const V2_MARKER: u8 = 0x02;

/// Scheme marker byte for V1 payloads.
const V1_MARKER: u8 = 0x01;

/// XChaCha20-Poly1305 nonce size in bytes.
const NONCE_SIZE: usize = 24;

/// AES-CBC IV size in bytes.
const IV_SIZE: usize = 16;

/// HMAC-SHA256 tag size in bytes.
const MAC_SIZE: usize = 32;

/// Which scheme produced or consumed a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Modern AEAD scheme.
    V2,
    /// Legacy CBC+MAC scheme.
    V1,
}

impl Scheme {
    /// Short wire name, as reported by `get_info`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::V2 => "v2",
            Scheme::V1 => "v1",
        }
    }
}

/// Two-scheme envelope cipher with process-wide availability flags.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeCipher {
    prefer: Scheme,
    v1_enabled: bool,
}

impl EnvelopeCipher {
    /// Build the cipher from configuration.
    pub fn new(pref: SchemePref, v1_enabled: bool) -> Self {
        let prefer = match pref {
            SchemePref::V2 => Scheme::V2,
            SchemePref::V1 => Scheme::V1,
        };
        Self { prefer, v1_enabled }
    }

    /// Capability flags `(v2, v1)` for `get_info`.
    pub fn capabilities(&self) -> (bool, bool) {
        (true, self.v1_enabled)
    }

    /// Encrypt `plaintext` under the preferred available scheme.
    pub fn encrypt(
        &self,
        keys: &ConversationKeys,
        plaintext: &[u8],
    ) -> Result<(String, Scheme), CryptoError> {
        let scheme = match self.prefer {
            Scheme::V2 => Scheme::V2,
            Scheme::V1 if self.v1_enabled => Scheme::V1,
            Scheme::V1 => Scheme::V2,
        };
        let payload = match scheme {
            Scheme::V2 => encrypt_v2(keys, plaintext)?,
            Scheme::V1 => encrypt_v1(keys, plaintext)?,
        };
        Ok((BASE64.encode(payload), scheme))
    }

    /// Decrypt a payload; the framing selects the scheme.
    pub fn decrypt(
        &self,
        keys: &ConversationKeys,
        content: &str,
    ) -> Result<(Vec<u8>, Scheme), CryptoError> {
        let payload = BASE64.decode(content).map_err(|_| CryptoError::DecryptFailed)?;
        match payload.first() {
            Some(&V2_MARKER) => Ok((decrypt_v2(keys, &payload[1..])?, Scheme::V2)),
            Some(&V1_MARKER) if self.v1_enabled => {
                Ok((decrypt_v1(keys, &payload[1..])?, Scheme::V1))
            }
            _ => Err(CryptoError::DecryptFailed),
        }
    }
}

fn encrypt_v2(keys: &ConversationKeys, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut nonce = [0u8; NONCE_SIZE];
    getrandom::getrandom(&mut nonce).map_err(|e| CryptoError::EncryptFailed(e.to_string()))?;

    let cipher = XChaCha20Poly1305::new_from_slice(&keys.aead)
        .map_err(|e| CryptoError::EncryptFailed(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::EncryptFailed(e.to_string()))?;

    let mut payload = Vec::with_capacity(1 + NONCE_SIZE + ciphertext.len());
    payload.push(V2_MARKER);
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(&ciphertext);
    Ok(payload)
}

fn decrypt_v2(keys: &ConversationKeys, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if payload.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptFailed);
    }
    let (nonce, ciphertext) = payload.split_at(NONCE_SIZE);
    let cipher =
        XChaCha20Poly1305::new_from_slice(&keys.aead).map_err(|_| CryptoError::DecryptFailed)?;
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptFailed)
}

fn encrypt_v1(keys: &ConversationKeys, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut iv = [0u8; IV_SIZE];
    getrandom::getrandom(&mut iv).map_err(|e| CryptoError::EncryptFailed(e.to_string()))?;

    let ciphertext = Aes256CbcEnc::new_from_slices(&keys.legacy_enc, &iv)
        .map_err(|e| CryptoError::EncryptFailed(e.to_string()))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut mac = <HmacSha256 as Mac>::new_from_slice(&keys.legacy_mac)
        .map_err(|e| CryptoError::EncryptFailed(e.to_string()))?;
    mac.update(&iv);
    mac.update(&ciphertext);
    let tag = mac.finalize().into_bytes();

    let mut payload = Vec::with_capacity(1 + IV_SIZE + ciphertext.len() + MAC_SIZE);
    payload.push(V1_MARKER);
    payload.extend_from_slice(&iv);
    payload.extend_from_slice(&ciphertext);
    payload.extend_from_slice(&tag);
    Ok(payload)
}

fn decrypt_v1(keys: &ConversationKeys, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if payload.len() < IV_SIZE + MAC_SIZE {
        return Err(CryptoError::DecryptFailed);
    }
    let (iv, rest) = payload.split_at(IV_SIZE);
    let (ciphertext, tag) = rest.split_at(rest.len() - MAC_SIZE);

    // Authenticate before touching the ciphertext.
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(&keys.legacy_mac).map_err(|_| CryptoError::DecryptFailed)?;
    mac.update(iv);
    mac.update(ciphertext);
    mac.verify_slice(tag).map_err(|_| CryptoError::DecryptFailed)?;

    Aes256CbcDec::new_from_slices(&keys.legacy_enc, iv)
        .map_err(|_| CryptoError::DecryptFailed)?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::DecryptFailed)
}
