//! # kvc-types
//!
//! Wire format types for the kvconnect key-value gateway protocol.
//!
//! This crate provides the foundational types shared by the gateway and its
//! clients:
//! - [`Event`] - Signed, addressed relay event carrying an encrypted payload
//! - [`Request`], [`Response`] - The JSON documents inside the ciphertext
//! - [`Method`] - The closed set of key-value operations
//! - [`ErrorCode`] - The closed set of protocol error codes
//! - [`PairingUri`] - The textual pairing credential

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod event;
mod method;
mod pairing;
mod request;

pub use error::TypesError;
pub use event::{Event, KIND_REQUEST, KIND_RESPONSE};
pub use method::Method;
pub use pairing::{
    decode_npub, decode_nsec, encode_npub, encode_nsec, ClientSecret, PairingLimits, PairingUri,
    URI_SCHEME,
};
pub use request::{ErrorBody, ErrorCode, Request, Response};
