//! Signed relay events.
//!
//! An event is the outer, publicly-visible wrapper: it names a sender, a
//! single recipient (`p` tag), a kind, and carries the ciphertext of a
//! request or response in `content`. Events are signed with BIP-340 Schnorr
//! signatures over the secp256k1 curve; the event id is the SHA-256 of the
//! canonical serialization.

use secp256k1::schnorr::Signature;
use secp256k1::{Keypair, Message, XOnlyPublicKey, SECP256K1};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::TypesError;

/// Event kind for encrypted requests (client → gateway).
pub const KIND_REQUEST: u16 = 23194;

/// Event kind for encrypted responses (gateway → client).
pub const KIND_RESPONSE: u16 = 23195;

/// A signed, addressed relay event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Hex SHA-256 of the canonical serialization.
    pub id: String,
    /// Hex x-only public key of the author.
    pub pubkey: String,
    /// Unix timestamp (seconds) chosen by the author.
    pub created_at: u64,
    /// Event kind ([`KIND_REQUEST`] or [`KIND_RESPONSE`]).
    pub kind: u16,
    /// Tag list. Exactly one `["p", <counterparty>]` tag is expected.
    pub tags: Vec<Vec<String>>,
    /// Ciphertext payload.
    pub content: String,
    /// Hex BIP-340 Schnorr signature over the id.
    pub sig: String,
}

impl Event {
    /// Build and sign an event addressed to `recipient` (hex x-only pubkey).
    pub fn build(
        keypair: &Keypair,
        kind: u16,
        recipient: &str,
        content: String,
        created_at: u64,
    ) -> Result<Self, TypesError> {
        let pubkey = hex::encode(XOnlyPublicKey::from_keypair(keypair).0.serialize());
        let tags = vec![vec!["p".to_string(), recipient.to_string()]];

        let mut event = Self {
            id: String::new(),
            pubkey,
            created_at,
            kind,
            tags,
            content,
            sig: String::new(),
        };

        let id_bytes = event.compute_id()?;
        event.id = hex::encode(id_bytes);

        let msg = Message::from_digest(id_bytes);
        let sig = SECP256K1.sign_schnorr_no_aux_rand(&msg, keypair);
        event.sig = hex::encode(sig.serialize());

        Ok(event)
    }

    /// Compute the 32-byte event id from the canonical serialization
    /// `[0, pubkey, created_at, kind, tags, content]`.
    pub fn compute_id(&self) -> Result<[u8; 32], TypesError> {
        let canonical = serde_json::to_string(&(
            0u8,
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        ))?;

        let digest = Sha256::digest(canonical.as_bytes());
        Ok(digest.into())
    }

    /// Verify the event id and signature against `pubkey`.
    pub fn verify(&self) -> Result<(), TypesError> {
        let id_bytes = self.compute_id()?;
        if hex::encode(id_bytes) != self.id {
            return Err(TypesError::InvalidEvent("id mismatch".to_string()));
        }

        let pubkey_bytes = hex::decode(&self.pubkey)
            .map_err(|e| TypesError::InvalidEvent(format!("bad pubkey hex: {e}")))?;
        let pubkey = XOnlyPublicKey::from_slice(&pubkey_bytes)
            .map_err(|e| TypesError::InvalidEvent(format!("bad pubkey: {e}")))?;

        let sig_bytes = hex::decode(&self.sig)
            .map_err(|e| TypesError::Signature(format!("bad signature hex: {e}")))?;
        let sig = Signature::from_slice(&sig_bytes)
            .map_err(|e| TypesError::Signature(format!("bad signature: {e}")))?;

        let msg = Message::from_digest(id_bytes);
        SECP256K1
            .verify_schnorr(&sig, &msg, &pubkey)
            .map_err(|e| TypesError::Signature(e.to_string()))
    }

    /// The counterparty named by the first `p` tag, if any.
    pub fn recipient(&self) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.len() >= 2 && t[0] == "p")
            .map(|t| t[1].as_str())
    }
}
