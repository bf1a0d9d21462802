//! Property-based tests for the Double Ratchet and X3DH.
//!
//! These verify the protocol's contracts over generated inputs rather than
//! hand-picked examples: arbitrary delivery orders, arbitrary header and
//! ciphertext corruption, arbitrary message contents.

use ciphera_core::{ratchet::RatchetState, x3dh, RatchetError};
use ciphera_crypto::{generate_x25519, sign, Identity, SymmetricKey};
use ciphera_proto::{OneTimePreKeyPublic, PreKeyBundle, PreKeyMessage, RatchetHeader};
use proptest::prelude::*;

/// A connected initiator/responder pair sharing a fresh root.
fn fresh_pair() -> (RatchetState, RatchetState) {
    let root = SymmetricKey::from_bytes([7u8; 32]);
    let (responder_priv, responder_pub) = generate_x25519();
    let initiator = RatchetState::init_as_initiator(&root, &responder_pub).unwrap();
    let sender_ratchet = *initiator.ratchet_public();
    let responder =
        RatchetState::init_as_responder(&root, &responder_priv, &sender_ratchet).unwrap();
    (initiator, responder)
}

fn bundle_for(identity: &Identity, with_opk: bool) -> (PreKeyBundle, ciphera_crypto::X25519Secret, Option<ciphera_crypto::X25519Secret>) {
    let (spk_priv, spk_pub) = generate_x25519();
    let signature = sign(&identity.ed_priv, spk_pub.as_bytes()).unwrap();
    let (opk_priv, one_time_pre_keys) = if with_opk {
        let (opk_priv, opk_pub) = generate_x25519();
        (
            Some(opk_priv),
            vec![OneTimePreKeyPublic {
                one_time_pre_key_id: "opk-1".into(),
                one_time_pre_key: opk_pub,
            }],
        )
    } else {
        (None, Vec::new())
    };
    let bundle = PreKeyBundle {
        username: "bob".into(),
        canary: "c".to_owned(),
        identity_key: identity.x_pub,
        signing_key: identity.ed_pub,
        signed_pre_key_id: "spk-1".into(),
        signed_pre_key: spk_pub,
        signed_pre_key_signature: signature,
        one_time_pre_keys,
    };
    (bundle, spk_priv, opk_priv)
}

proptest! {
    /// Property 1: initiator and responder always derive identical roots,
    /// with and without a one-time pre-key.
    #[test]
    fn x3dh_agreement(with_opk in any::<bool>()) {
        let responder = Identity::generate();
        let initiator = Identity::generate();
        let (bundle, spk_priv, opk_priv) = bundle_for(&responder, with_opk);

        let handshake = x3dh::initiator_root(&initiator, &bundle).unwrap();
        let message = PreKeyMessage {
            initiator_identity_key: initiator.x_pub,
            ephemeral_key: handshake.ephemeral_public,
            signed_pre_key_id: handshake.signed_pre_key_id.clone(),
            one_time_pre_key_id: handshake.one_time_pre_key_id.clone(),
        };
        let responder_root =
            x3dh::responder_root(&responder, &spk_priv, opk_priv.as_ref(), &message).unwrap();

        prop_assert!(handshake.root_key.ct_eq(&responder_root));
    }

    /// Property 4: in-order delivery recovers every plaintext exactly.
    #[test]
    fn in_order_messages_roundtrip(
        messages in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..256), 1..20)
    ) {
        let (mut alice, mut bob) = fresh_pair();
        for plaintext in &messages {
            let (header, cipher) = alice.encrypt(b"", plaintext).unwrap();
            let got = bob.decrypt(b"", &header, &cipher).unwrap();
            prop_assert_eq!(&got, plaintext);
        }
    }

    /// Property 5: any permutation of a chain decrypts every message
    /// exactly once, and each replay attempt is rejected.
    #[test]
    fn any_permutation_decrypts_once(
        order in (2usize..12)
            .prop_flat_map(|n| Just((0..n).collect::<Vec<usize>>()).prop_shuffle())
    ) {
        let (mut alice, mut bob) = fresh_pair();

        let sent: Vec<(RatchetHeader, Vec<u8>, Vec<u8>)> = (0..order.len())
            .map(|i| {
                let plaintext = format!("msg-{i}").into_bytes();
                let (header, cipher) = alice.encrypt(b"", &plaintext).unwrap();
                (header, cipher, plaintext)
            })
            .collect();

        for &i in &order {
            let (header, cipher, plaintext) = &sent[i];
            let got = bob.decrypt(b"", header, cipher).unwrap();
            prop_assert_eq!(&got, plaintext);
        }

        // Everything already decrypted must now be rejected.
        for (header, cipher, _) in &sent {
            let err = bob.decrypt(b"", header, cipher).unwrap_err();
            let is_expected = matches!(
                err,
                RatchetError::OldOrReplay { .. } | RatchetError::DecryptFailed
            );
            prop_assert!(is_expected);
        }
        prop_assert_eq!(bob.skipped_key_count(), 0);
    }

    /// Property 7: flipping any single bit of the header or ciphertext
    /// makes authentication fail and leaves state untouched.
    #[test]
    fn any_bit_flip_is_rejected(byte_index in 0usize..48, bit in 0u8..8) {
        let (mut alice, mut bob) = fresh_pair();
        let (header, cipher) = alice.encrypt(b"ad", b"integrity").unwrap();

        let mut header_bytes = header.as_bytes();
        let mut cipher = cipher;
        if byte_index < 40 {
            header_bytes[byte_index] ^= 1 << bit;
        } else {
            let i = (byte_index - 40) % cipher.len();
            cipher[i] ^= 1 << bit;
        }

        let tampered = RatchetHeader {
            dh_pub: header_bytes[..32].to_vec(),
            previous_chain_length: u32::from_be_bytes(header_bytes[32..36].try_into().unwrap()),
            message_index: u32::from_be_bytes(header_bytes[36..40].try_into().unwrap()),
        };

        let err = bob.decrypt(b"ad", &tampered, &cipher).unwrap_err();
        let is_expected = matches!(
            err,
            RatchetError::DecryptFailed
                | RatchetError::GapTooLarge { .. }
                | RatchetError::Crypto(_)
        );
        prop_assert!(is_expected);
        prop_assert_eq!(bob.recv_index(), 0);
        prop_assert_eq!(bob.skipped_key_count(), 0);
    }

    /// Tampered associated data is rejected just like a tampered header.
    #[test]
    fn associated_data_is_bound(ad in prop::collection::vec(any::<u8>(), 1..64)) {
        let (mut alice, mut bob) = fresh_pair();
        let (header, cipher) = alice.encrypt(&ad, b"payload").unwrap();

        let mut wrong = ad.clone();
        wrong[0] ^= 0xFF;
        prop_assert_eq!(
            bob.decrypt(&wrong, &header, &cipher).unwrap_err(),
            RatchetError::DecryptFailed
        );
        prop_assert_eq!(bob.decrypt(&ad, &header, &cipher).unwrap(), b"payload");
    }
}

/// An AEAD failure while consuming a skipped key keeps the key, so the
/// genuine late message still decrypts afterwards.
#[test]
fn skipped_key_survives_tampered_delivery() {
    let (mut alice, mut bob) = fresh_pair();

    let (h0, c0) = alice.encrypt(b"", b"late").unwrap();
    let (h1, c1) = alice.encrypt(b"", b"early").unwrap();
    bob.decrypt(b"", &h1, &c1).unwrap();
    assert_eq!(bob.skipped_key_count(), 1);

    let mut tampered = c0.clone();
    tampered[0] ^= 0x01;
    assert_eq!(bob.decrypt(b"", &h0, &tampered).unwrap_err(), RatchetError::DecryptFailed);
    assert_eq!(bob.skipped_key_count(), 1);

    assert_eq!(bob.decrypt(b"", &h0, &c0).unwrap(), b"late");
    assert_eq!(bob.skipped_key_count(), 0);
}

/// Crash consistency: persisting after every operation and reloading at an
/// arbitrary point continues the stream correctly (property 10).
#[test]
fn persisted_state_resumes_across_restart() {
    let (mut alice, mut bob) = fresh_pair();

    let mut stored = serde_json::to_string(&bob).unwrap();
    for i in 0..10u32 {
        // Simulated process restart before every receive.
        let mut revived: RatchetState = serde_json::from_str(&stored).unwrap();
        let plaintext = format!("msg-{i}");
        let (header, cipher) = alice.encrypt(b"", plaintext.as_bytes()).unwrap();
        assert_eq!(revived.decrypt(b"", &header, &cipher).unwrap(), plaintext.as_bytes());
        stored = serde_json::to_string(&revived).unwrap();
    }
}
