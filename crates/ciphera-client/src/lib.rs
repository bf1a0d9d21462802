//! Ciphera client.
//!
//! Everything a user-facing front-end needs to run the protocol: encrypted
//! identity storage, pre-key and session stores, the HTTP relay client and
//! the [`Client`] service layer tying them together.
//!
//! # Crash consistency
//!
//! The ratchet state for a peer is persisted *before* an outbound envelope
//! reaches the transport and *before* an inbound envelope is acknowledged.
//! A crash therefore never re-uses a message key; at worst the peer sees a
//! duplicate and rejects it as a replay.
//!
//! # Concurrency
//!
//! One process, one home directory. Store mutations take a per-store lock,
//! so consuming a one-time pre-key is atomic, and conversations are only
//! touched by the send and receive paths for their peer.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod error;
pub mod relay;
pub mod store;

pub use client::{Client, ReceiveReport};
pub use error::ClientError;
pub use relay::{RelayClient, RelayError};
