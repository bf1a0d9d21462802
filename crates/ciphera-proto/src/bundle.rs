//! Pre-key bundles and the first-message handshake payload.

use ciphera_crypto::{Ed25519Public, Signature, X25519Public};
use serde::{Deserialize, Serialize};

use crate::ids::{OneTimePreKeyId, SignedPreKeyId, Username};

/// Public half of a one-time pre-key, as served in a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OneTimePreKeyPublic {
    /// Identifier the initiator echoes back in its [`PreKeyMessage`].
    pub one_time_pre_key_id: OneTimePreKeyId,
    /// The X25519 public key.
    pub one_time_pre_key: X25519Public,
}

/// The set of public keys an account registers with the relay.
///
/// The relay stores the latest bundle per username (last writer wins) and
/// serves it to anyone who asks; nothing in it is secret. The canary is an
/// opaque token the owner generated at registration: a client that later
/// sees a different canary knows the relay lost or replaced the account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreKeyBundle {
    /// Account name on the relay.
    pub username: Username,
    /// Opaque registration token, checked by the owner on later contact.
    pub canary: String,
    /// Long-term X25519 identity key.
    pub identity_key: X25519Public,
    /// Long-term Ed25519 signing key.
    pub signing_key: Ed25519Public,
    /// Identifier of the current signed pre-key.
    pub signed_pre_key_id: SignedPreKeyId,
    /// The signed pre-key itself.
    pub signed_pre_key: X25519Public,
    /// Ed25519 signature by `signing_key` over `signed_pre_key`.
    pub signed_pre_key_signature: Signature,
    /// One-time pre-keys, in the order the initiator should consume them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub one_time_pre_keys: Vec<OneTimePreKeyPublic>,
}

/// X3DH parameters attached to the first envelope of a conversation.
///
/// Tells the responder which of its pre-keys the initiator targeted and
/// carries the initiator's public keys, so the responder can derive the
/// same root key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreKeyMessage {
    /// The initiator's long-term X25519 identity key.
    pub initiator_identity_key: X25519Public,
    /// The initiator's ephemeral X25519 key for this handshake.
    pub ephemeral_key: X25519Public,
    /// Which signed pre-key of the responder was used.
    pub signed_pre_key_id: SignedPreKeyId,
    /// Which one-time pre-key was consumed, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_time_pre_key_id: Option<OneTimePreKeyId>,
}

#[cfg(test)]
mod tests {
    use ciphera_crypto::{generate_ed25519, generate_x25519, sign};

    use super::*;

    fn sample_bundle() -> PreKeyBundle {
        let (_, identity) = generate_x25519();
        let (ed_priv, ed_pub) = generate_ed25519();
        let (_, spk) = generate_x25519();
        let (_, opk) = generate_x25519();
        PreKeyBundle {
            username: "alice".into(),
            canary: "d00d".to_owned(),
            identity_key: identity,
            signing_key: ed_pub,
            signed_pre_key_id: "spk-1".into(),
            signed_pre_key: spk,
            signed_pre_key_signature: sign(&ed_priv, spk.as_bytes()).unwrap(),
            one_time_pre_keys: vec![OneTimePreKeyPublic {
                one_time_pre_key_id: "opk-1".into(),
                one_time_pre_key: opk,
            }],
        }
    }

    #[test]
    fn bundle_json_field_names_are_stable() {
        let json = serde_json::to_value(sample_bundle()).unwrap();
        let object = json.as_object().unwrap();
        for field in [
            "username",
            "canary",
            "identity_key",
            "signing_key",
            "signed_pre_key_id",
            "signed_pre_key",
            "signed_pre_key_signature",
            "one_time_pre_keys",
        ] {
            assert!(object.contains_key(field), "missing field {field}");
        }
        let entry = &json["one_time_pre_keys"][0];
        assert!(entry.get("one_time_pre_key_id").is_some());
        assert!(entry.get("one_time_pre_key").is_some());
    }

    #[test]
    fn bundle_json_roundtrip() {
        let bundle = sample_bundle();
        let json = serde_json::to_string(&bundle).unwrap();
        let back: PreKeyBundle = serde_json::from_str(&json).unwrap();
        assert_eq!(back.username, bundle.username);
        assert_eq!(back.identity_key, bundle.identity_key);
        assert_eq!(back.signed_pre_key, bundle.signed_pre_key);
        assert_eq!(back.one_time_pre_keys, bundle.one_time_pre_keys);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let mut json = serde_json::to_value(sample_bundle()).unwrap();
        json["surprise"] = serde_json::json!(1);
        assert!(serde_json::from_value::<PreKeyBundle>(json).is_err());
    }

    #[test]
    fn prekey_message_omits_absent_one_time_id() {
        let (_, identity) = generate_x25519();
        let (_, ephemeral) = generate_x25519();
        let message = PreKeyMessage {
            initiator_identity_key: identity,
            ephemeral_key: ephemeral,
            signed_pre_key_id: "spk-1".into(),
            one_time_pre_key_id: None,
        };
        let json = serde_json::to_string(&message).unwrap();
        assert!(!json.contains("one_time_pre_key_id"));
        let back: PreKeyMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);
    }
}
