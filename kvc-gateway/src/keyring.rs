//! Server identity and conversation-key derivation.
//!
//! The keyring holds the gateway's long-term secp256k1 signing keypair. It
//! signs outbound events and derives per-peer conversation keys for
//! envelope encryption. The derivation is deterministic and identical on
//! both sides of a channel: ECDH yields the shared x coordinate, and
//! HKDF-SHA256 with per-scheme domain separation expands it into the
//! working keys (the same derivation the content layer uses elsewhere in
//! this family of protocols).

use hkdf::Hkdf;
use secp256k1::ecdh::shared_secret_point;
use secp256k1::{Keypair, Parity, PublicKey, SecretKey, XOnlyPublicKey, SECP256K1};
use sha2::Sha256;
use zeroize::Zeroize;

use kvc_types::{decode_nsec, Event, TypesError};

use crate::error::KeyringError;

/// HKDF salt for the modern AEAD scheme.
const V2_SALT: &[u8] = b"kvconnect-conversation-v2";

/// HKDF salt for the legacy CBC+MAC scheme.
const V1_SALT: &[u8] = b"kvconnect-conversation-v1";

/// Symmetric keys shared with one peer, identical in both directions.
#[derive(Clone, Zeroize)]
pub struct ConversationKeys {
    /// AEAD key for the modern scheme.
    pub aead: [u8; 32],
    /// Encryption key for the legacy CBC scheme.
    pub legacy_enc: [u8; 32],
    /// Authentication key for the legacy CBC scheme.
    pub legacy_mac: [u8; 32],
}

// Intentionally opaque debug to avoid logging key material
impl std::fmt::Debug for ConversationKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConversationKeys([REDACTED])")
    }
}

/// The server's long-term signing identity.
pub struct Keyring {
    keypair: Keypair,
    public_key_hex: String,
}

// Intentionally opaque debug to avoid logging the secret scalar
impl std::fmt::Debug for Keyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyring")
            .field("public_key", &self.public_key_hex)
            .finish_non_exhaustive()
    }
}

impl Keyring {
    /// Load the keyring from a bech32 `nsec` secret.
    ///
    /// A malformed secret is fatal at startup.
    pub fn from_bech32(nsec: &str) -> Result<Self, KeyringError> {
        let secret =
            decode_nsec(nsec).map_err(|e| KeyringError::MalformedSecret(e.to_string()))?;
        Self::from_secret_bytes(secret.as_bytes())
    }

    /// Load the keyring from raw secret bytes.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, KeyringError> {
        let sk = SecretKey::from_slice(bytes)
            .map_err(|e| KeyringError::InvalidScalar(e.to_string()))?;
        let keypair = Keypair::from_secret_key(SECP256K1, &sk);
        let public_key_hex = hex::encode(XOnlyPublicKey::from_keypair(&keypair).0.serialize());
        Ok(Self {
            keypair,
            public_key_hex,
        })
    }

    /// Generate a fresh random keyring.
    pub fn generate() -> Self {
        loop {
            let mut bytes = [0u8; 32];
            getrandom::getrandom(&mut bytes).expect("getrandom failed");
            if let Ok(keyring) = Self::from_secret_bytes(&bytes) {
                bytes.zeroize();
                return keyring;
            }
        }
    }

    /// The server's hex x-only public key.
    pub fn public_key_hex(&self) -> &str {
        &self.public_key_hex
    }

    /// The underlying keypair (for event construction).
    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// Build and sign an event addressed to `recipient`.
    pub fn sign_event(
        &self,
        kind: u16,
        recipient: &str,
        content: String,
        created_at: u64,
    ) -> Result<Event, TypesError> {
        Event::build(&self.keypair, kind, recipient, content, created_at)
    }

    /// Derive the conversation keys shared with `peer_pubkey_hex`.
    pub fn conversation_keys(&self, peer_pubkey_hex: &str) -> Result<ConversationKeys, KeyringError> {
        let peer_bytes = hex::decode(peer_pubkey_hex)
            .map_err(|e| KeyringError::InvalidPeerKey(format!("bad hex: {e}")))?;
        let peer_xonly = XOnlyPublicKey::from_slice(&peer_bytes)
            .map_err(|e| KeyringError::InvalidPeerKey(e.to_string()))?;
        // X-only keys lift to the even-parity point on both sides, so the
        // shared x coordinate is direction-independent.
        let peer_point = PublicKey::from_x_only_public_key(peer_xonly, Parity::Even);

        let mut shared = shared_secret_point(&peer_point, &self.keypair.secret_key());
        let mut x = [0u8; 32];
        x.copy_from_slice(&shared[..32]);
        shared.zeroize();

        let keys = ConversationKeys {
            aead: expand(&x, V2_SALT, b"conversation-key"),
            legacy_enc: expand(&x, V1_SALT, b"enc"),
            legacy_mac: expand(&x, V1_SALT, b"mac"),
        };
        x.zeroize();
        Ok(keys)
    }
}

/// HKDF-SHA256 expand with domain separation.
fn expand(ikm: &[u8; 32], salt: &[u8], info: &[u8]) -> [u8; 32] {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut out = [0u8; 32];
    hkdf.expand(info, &mut out)
        .expect("HKDF expand should not fail with valid lengths");
    out
}
