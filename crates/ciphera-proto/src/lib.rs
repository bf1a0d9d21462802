//! Ciphera wire protocol types.
//!
//! Everything that crosses the relay is JSON with stable snake_case field
//! names; byte fields (keys, signatures, ciphertext) are standard base64
//! strings. The relay never sees anything else: it stores pre-key bundles
//! and opaque envelopes and learns nothing about message content.
//!
//! # Invariants
//!
//! - Field names are part of the protocol and never change.
//! - Every byte field round-trips exactly through JSON.
//! - Unknown fields are rejected, so a stale client fails loudly instead of
//!   silently dropping protocol data.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod bundle;
mod envelope;
mod ids;
pub mod limits;
mod relay;

pub use bundle::{OneTimePreKeyPublic, PreKeyBundle, PreKeyMessage};
pub use envelope::{DecryptedMessage, Envelope, RatchetHeader, HEADER_SIZE};
pub use ids::{OneTimePreKeyId, SignedPreKeyId, Username};
pub use relay::{AckRequest, CanaryReply, ErrorReply};
