//! Relay policy limits, shared by the server and its clients.

/// Cap on any request body, in bytes (1 MiB).
pub const MAX_BODY_BYTES: u64 = 1 << 20;

/// Cap on an envelope's ciphertext, in bytes (64 KiB).
pub const MAX_CIPHER_BYTES: usize = 64 << 10;

/// Cap on one-time pre-keys per registered bundle.
pub const MAX_ONE_TIME_KEYS: usize = 500;

/// Cap on queued envelopes per user; the oldest are dropped beyond this.
pub const MAX_QUEUE_LEN: usize = 1000;

/// How far into the future an envelope timestamp may point, in seconds.
pub const MAX_FUTURE_SKEW_SECS: i64 = 10 * 60;
