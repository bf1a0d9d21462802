//! Request and reply bodies for the relay's non-envelope endpoints.

use serde::{Deserialize, Serialize};

/// Body of `POST /msg/{user}/ack`: drop the first `count` queued envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AckRequest {
    /// How many envelopes to drop, clamped to the queue length.
    pub count: usize,
}

/// Reply of `GET /account/{user}/canary`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanaryReply {
    /// The canary the account registered with.
    pub canary: String,
}

/// JSON error body returned alongside non-2xx statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    /// Short human-readable reason.
    pub error: String,
}
