//! # kvc-gateway
//!
//! A scoped, revocable gateway that exposes a Redis-compatible key-value
//! store to clients over encrypted direct messages on public relays.
//!
//! ## Architecture
//!
//! ```text
//! Client ──┐                          ┌──────────────────────────────┐
//!          │   wss (signed events)    │         kvc-gateway          │
//!          ├─────────► Relay ◄────────┤  decrypt → policy → dispatch │
//! Client ──┘                          │  ┌────────────────────────┐  │
//!                                     │  │  Redis-compatible KV   │  │
//!                                     │  └────────────────────────┘  │
//!                                     └──────────────────────────────┘
//! ```
//!
//! Every client holds a pairing credential binding it to this gateway's
//! identity, a key-prefix namespace, a method allowlist, and per-connection
//! quotas. The gateway authenticates requests by the client's signing
//! identity and enforces those bounds on every operation:
//!
//! - Envelope handling: signature check, freshness window, two-scheme
//!   decryption ([`envelope`])
//! - Policy: method allowlist, namespace isolation ([`guard`]), sliding
//!   request/byte budgets ([`budget`]), payload validation ([`validate`])
//! - Idempotent dispatch to eight key-value operations ([`router`],
//!   [`store`])
//! - Encrypted response emission ([`relay`], [`server`])
//! - Append-only audit capture ([`audit`])

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod audit;
pub mod budget;
pub mod config;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod guard;
pub mod http;
pub mod idempotency;
pub mod keyring;
pub mod registry;
pub mod relay;
pub mod router;
pub mod server;
pub mod store;
pub mod validate;
