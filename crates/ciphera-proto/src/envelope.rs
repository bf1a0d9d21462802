//! Envelopes: the opaque unit the relay queues and forwards.

use ciphera_crypto::b64;
use serde::{Deserialize, Serialize};

use crate::{bundle::PreKeyMessage, ids::Username};

/// Serialized header length: 32-byte ratchet key plus two big-endian u32s.
pub const HEADER_SIZE: usize = 40;

/// Ratchet header carried with every ciphertext.
///
/// The header travels in the clear but is bound into the AEAD associated
/// data, so any tampering with it fails authentication. `dh_pub` is kept as
/// raw bytes rather than a key type: a malformed length must surface as a
/// protocol error on the receive path, not as a JSON decode failure that
/// would poison a whole fetch batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RatchetHeader {
    /// Sender's current ratchet public key (32 bytes when well-formed).
    #[serde(with = "b64")]
    pub dh_pub: Vec<u8>,
    /// Length of the sender's previous sending chain.
    pub previous_chain_length: u32,
    /// Index of this message within the current sending chain.
    pub message_index: u32,
}

impl RatchetHeader {
    /// The header's ratchet key as a fixed-size array, if well-formed.
    pub fn ratchet_key(&self) -> Option<[u8; 32]> {
        self.dh_pub.as_slice().try_into().ok()
    }

    /// Canonical byte serialization, appended to the caller's associated
    /// data before sealing: `dh_pub || previous_chain_length (u32 BE) ||
    /// message_index (u32 BE)`.
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE);
        bytes.extend_from_slice(&self.dh_pub);
        bytes.extend_from_slice(&self.previous_chain_length.to_be_bytes());
        bytes.extend_from_slice(&self.message_index.to_be_bytes());
        bytes
    }
}

/// The wire unit posted to and fetched from the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    /// Sender username.
    pub from: Username,
    /// Recipient username; must match the queue it is posted to.
    pub to: Username,
    /// Ratchet header, authenticated via the AEAD associated data.
    pub header: RatchetHeader,
    /// Sealed payload with trailing Poly1305 tag.
    #[serde(with = "b64")]
    pub cipher: Vec<u8>,
    /// X3DH parameters, present only on the first message of a conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_key: Option<PreKeyMessage>,
    /// Caller-supplied associated data, authenticated but not encrypted.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64::opt")]
    pub associated_data: Option<Vec<u8>>,
    /// Unix seconds; the relay fills this in when zero.
    pub timestamp: i64,
}

/// A successfully decrypted message, as returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecryptedMessage {
    /// Sender username.
    pub from: Username,
    /// Recipient username.
    pub to: Username,
    /// The recovered plaintext.
    #[serde(with = "b64")]
    pub plaintext: Vec<u8>,
    /// Envelope timestamp in Unix seconds.
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> RatchetHeader {
        RatchetHeader {
            dh_pub: vec![0xAA; 32],
            previous_chain_length: 3,
            message_index: 0x0102_0304,
        }
    }

    #[test]
    fn header_bytes_layout() {
        let bytes = sample_header().as_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[..32], &[0xAA; 32]);
        assert_eq!(&bytes[32..36], &3u32.to_be_bytes());
        assert_eq!(&bytes[36..40], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn ratchet_key_requires_32_bytes() {
        assert!(sample_header().ratchet_key().is_some());

        let short = RatchetHeader { dh_pub: vec![1; 16], ..sample_header() };
        assert!(short.ratchet_key().is_none());
    }

    #[test]
    fn envelope_json_field_names_are_stable() {
        let envelope = Envelope {
            from: "alice".into(),
            to: "bob".into(),
            header: sample_header(),
            cipher: vec![1, 2, 3],
            pre_key: None,
            associated_data: None,
            timestamp: 1_700_000_000,
        };
        let json = serde_json::to_value(&envelope).unwrap();
        let object = json.as_object().unwrap();
        for field in ["from", "to", "header", "cipher", "timestamp"] {
            assert!(object.contains_key(field), "missing field {field}");
        }
        let header = json["header"].as_object().unwrap();
        for field in ["dh_pub", "previous_chain_length", "message_index"] {
            assert!(header.contains_key(field), "missing header field {field}");
        }
        // Absent optionals stay off the wire.
        assert!(!object.contains_key("pre_key"));
        assert!(!object.contains_key("associated_data"));
    }

    #[test]
    fn envelope_json_roundtrip() {
        let envelope = Envelope {
            from: "alice".into(),
            to: "bob".into(),
            header: sample_header(),
            cipher: vec![0; 64],
            pre_key: None,
            associated_data: Some(vec![9, 9]),
            timestamp: 0,
        };
        let json = serde_json::to_string(&envelope).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, envelope);
    }
}
