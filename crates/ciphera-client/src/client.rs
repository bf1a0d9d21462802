//! The client service layer.
//!
//! [`Client`] wires the local stores and the relay client together and
//! implements the user-level operations: identity creation, registration,
//! session establishment, sending and receiving.
//!
//! # Ordering guarantees
//!
//! - Send: the updated conversation is persisted *before* the envelope is
//!   handed to the transport. A crash after persistence but before dispatch
//!   costs one message, never a reused message key.
//! - Receive: each conversation is persisted after its successful decrypt
//!   and before the batch acknowledgement, so an envelope is only ever
//!   dropped from the relay once its index advance is durable.

use std::{
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use ciphera_core::{ratchet::RatchetState, x3dh, Conversation, RatchetError, Session};
use ciphera_crypto::{generate_x25519, sign, Identity, X25519Public};
use ciphera_proto::{
    limits, DecryptedMessage, Envelope, PreKeyBundle, PreKeyMessage, SignedPreKeyId, Username,
};
use rand::{rngs::OsRng, RngCore};

use crate::{
    error::ClientError,
    relay::RelayClient,
    store::{
        AccountProfile, AccountStore, IdentityStore, OneTimePreKeyPair, PreKeyStore, RatchetStore,
        SessionStore,
    },
};

/// One-time pre-keys generated per registration.
const ONE_TIME_KEYS_PER_REGISTRATION: usize = 10;

/// Outcome of a receive batch.
///
/// Messages decrypted before a mid-batch failure are already persisted and
/// acknowledged, so they are returned even when `failure` is set.
#[derive(Debug)]
pub struct ReceiveReport {
    /// Successfully decrypted messages, in arrival order.
    pub messages: Vec<DecryptedMessage>,
    /// What stopped the batch early, if anything.
    pub failure: Option<ClientError>,
}

/// High-level Ciphera client over a home directory and an optional relay.
pub struct Client {
    identity_store: IdentityStore,
    prekey_store: PreKeyStore,
    session_store: SessionStore,
    ratchet_store: RatchetStore,
    account_store: AccountStore,
    relay: Option<RelayClient>,
}

impl Client {
    /// Open a client over `home`, talking to `relay_url` when given.
    ///
    /// # Errors
    ///
    /// [`ClientError::Relay`] when the relay URL does not parse.
    pub fn open(home: &Path, relay_url: Option<&str>) -> Result<Self, ClientError> {
        let relay = relay_url.map(RelayClient::new).transpose()?;
        Ok(Self {
            identity_store: IdentityStore::new(home),
            prekey_store: PreKeyStore::new(home),
            session_store: SessionStore::new(home),
            ratchet_store: RatchetStore::new(home),
            account_store: AccountStore::new(home),
            relay,
        })
    }

    /// The pre-key store, exposed for inspection in tests and tooling.
    pub fn prekey_store(&self) -> &PreKeyStore {
        &self.prekey_store
    }

    fn relay(&self) -> Result<&RelayClient, ClientError> {
        self.relay.as_ref().ok_or(ClientError::RelayNotConfigured)
    }

    /// Create (or with `force`, rotate) the local identity.
    ///
    /// Returns the fingerprint of the new X25519 public key.
    pub fn init_identity(&self, passphrase: &str, force: bool) -> Result<String, ClientError> {
        let identity = Identity::generate();
        self.identity_store.save(&identity, passphrase, force)?;
        Ok(identity.fingerprint())
    }

    /// Fingerprint of the stored identity.
    pub fn fingerprint(&self, passphrase: &str) -> Result<String, ClientError> {
        Ok(self.identity_store.load(passphrase)?.fingerprint())
    }

    /// Generate pre-keys and publish the bundle under `username`.
    ///
    /// Mints a fresh signed pre-key (signed by the Ed25519 identity key),
    /// a batch of one-time pre-keys, persists their private halves, and
    /// registers the public bundle with the relay. The account canary is
    /// minted on first registration and reused afterwards.
    pub async fn register(
        &self,
        passphrase: &str,
        username: &Username,
    ) -> Result<(), ClientError> {
        let relay = self.relay()?;
        let identity = self.identity_store.load(passphrase)?;

        // Signed pre-key: generate, sign with the identity key, persist,
        // mark current.
        let (spk_priv, spk_pub) = generate_x25519();
        let spk_id = SignedPreKeyId(format!("spk-{}", random_suffix()));
        let signature = sign(&identity.ed_priv, spk_pub.as_bytes())?;
        self.prekey_store.save_signed_pre_key(&spk_id, &spk_priv, &spk_pub, &signature)?;
        self.prekey_store.set_current_signed_pre_key_id(&spk_id)?;

        // One-time pre-keys.
        let batch: Vec<OneTimePreKeyPair> = (0..ONE_TIME_KEYS_PER_REGISTRATION)
            .map(|_| {
                let (private, public) = generate_x25519();
                OneTimePreKeyPair {
                    id: format!("opk-{}", random_suffix()).as_str().into(),
                    private,
                    public,
                }
            })
            .collect();
        self.prekey_store.save_one_time_pre_keys(&batch)?;

        let server_url = relay.base_url().to_owned();
        let canary = match self.account_store.load(&server_url, username)? {
            Some(profile) => profile.canary,
            None => random_suffix(),
        };

        let bundle = PreKeyBundle {
            username: username.clone(),
            canary: canary.clone(),
            identity_key: identity.x_pub,
            signing_key: identity.ed_pub,
            signed_pre_key_id: spk_id,
            signed_pre_key: spk_pub,
            signed_pre_key_signature: signature,
            one_time_pre_keys: self.prekey_store.list_one_time_pre_key_publics()?,
        };
        debug_assert!(bundle.one_time_pre_keys.len() <= limits::MAX_ONE_TIME_KEYS);
        relay.register_bundle(&bundle).await?;

        self.account_store.save(&AccountProfile {
            server_url,
            username: username.clone(),
            canary,
        })?;
        tracing::info!(user = %username, "registered pre-key bundle");
        Ok(())
    }

    /// Run X3DH against `peer`'s published bundle and persist the session.
    pub async fn start_session(
        &self,
        passphrase: &str,
        peer: &Username,
    ) -> Result<Session, ClientError> {
        let relay = self.relay()?;
        let identity = self.identity_store.load(passphrase)?;
        let bundle = relay.fetch_bundle(peer).await?;

        let handshake = x3dh::initiator_root(&identity, &bundle)?;
        let session = Session {
            peer: peer.clone(),
            root_key: handshake.root_key,
            peer_signed_pre_key: bundle.signed_pre_key,
            peer_identity_key: bundle.identity_key,
            created_utc: unix_now(),
            signed_pre_key_id: handshake.signed_pre_key_id,
            one_time_pre_key_id: handshake.one_time_pre_key_id,
            initiator_ephemeral_key: handshake.ephemeral_public,
        };
        self.session_store.save(&session)?;
        tracing::info!(peer = %peer, "session established");
        Ok(session)
    }

    /// Encrypt `plaintext` for `to` and post it via the relay.
    ///
    /// The first message of a conversation initialises the ratchet from the
    /// stored session and attaches a [`PreKeyMessage`] so the peer can
    /// bootstrap. The updated conversation is persisted before the envelope
    /// leaves the process.
    pub async fn send_message(
        &self,
        passphrase: &str,
        from: &Username,
        to: &Username,
        plaintext: &[u8],
    ) -> Result<(), ClientError> {
        let relay = self.relay()?;
        self.verify_canary(relay, from).await?;

        let session = self
            .session_store
            .load(to)?
            .ok_or_else(|| ClientError::NoSession(to.clone()))?;

        let (mut conversation, pre_key) = match self.ratchet_store.load(to)? {
            Some(conversation) => (conversation, None),
            None => {
                // First message: we are the initiator. Derive the ratchet
                // from the session root and tell the peer which pre-keys we
                // handshook against.
                let identity = self.identity_store.load(passphrase)?;
                let state = RatchetState::init_as_initiator(
                    &session.root_key,
                    &session.peer_identity_key,
                )?;
                let pre_key = PreKeyMessage {
                    initiator_identity_key: identity.x_pub,
                    ephemeral_key: session.initiator_ephemeral_key,
                    signed_pre_key_id: session.signed_pre_key_id.clone(),
                    one_time_pre_key_id: session.one_time_pre_key_id.clone(),
                };
                (Conversation { peer: to.clone(), state }, Some(pre_key))
            },
        };

        let (header, cipher) = conversation.state.encrypt(&[], plaintext)?;

        // Write-ahead of send: losing this envelope is recoverable, sealing
        // two messages under one key is not.
        self.ratchet_store.save(&conversation)?;

        let envelope = Envelope {
            from: from.clone(),
            to: to.clone(),
            header,
            cipher,
            pre_key,
            associated_data: None,
            timestamp: unix_now(),
        };
        relay.send_message(&envelope).await?;
        tracing::debug!(peer = %to, index = envelope.header.message_index, "message sent");
        Ok(())
    }

    /// Fetch up to `limit` envelopes (zero for all), decrypt them in
    /// arrival order and acknowledge exactly the processed prefix.
    ///
    /// Processing stops at the first fatal error, leaving the remainder
    /// queued. Replays are skipped and acknowledged: they are what the
    /// relay re-serves after a lost acknowledgement, and the ratchet has
    /// already rejected them, so draining them is the only way forward.
    pub async fn receive_messages(
        &self,
        passphrase: &str,
        me: &Username,
        limit: usize,
    ) -> Result<ReceiveReport, ClientError> {
        let relay = self.relay()?;
        let envelopes = relay.fetch_messages(me, limit).await?;

        let mut messages = Vec::new();
        let mut processed = 0usize;
        let mut failure = None;
        let mut identity: Option<Identity> = None;

        for envelope in &envelopes {
            let peer = envelope.from.clone();

            let mut conversation = match self.ratchet_store.load(&peer)? {
                Some(conversation) => {
                    if envelope.pre_key.is_some() {
                        failure = Some(ClientError::UnexpectedPreKeyMessage(peer));
                        break;
                    }
                    conversation
                },
                None => {
                    if identity.is_none() {
                        identity = Some(self.identity_store.load(passphrase)?);
                    }
                    let identity = identity.as_ref().expect("invariant: loaded just above");
                    match self.bootstrap_conversation(identity, &peer, envelope) {
                        Ok(conversation) => conversation,
                        Err(err) => {
                            // Leave this envelope and everything behind it
                            // queued; only the processed prefix gets acked.
                            failure = Some(err);
                            break;
                        },
                    }
                },
            };

            let user_ad = envelope.associated_data.as_deref().unwrap_or(&[]);
            match conversation.state.decrypt(user_ad, &envelope.header, &envelope.cipher) {
                Ok(plaintext) => {
                    // Persist before counting this envelope as processed so
                    // the acknowledgement can never outrun durability.
                    self.ratchet_store.save(&conversation)?;
                    messages.push(DecryptedMessage {
                        from: envelope.from.clone(),
                        to: envelope.to.clone(),
                        plaintext,
                        timestamp: envelope.timestamp,
                    });
                    processed += 1;
                },
                Err(RatchetError::OldOrReplay { index, expected }) => {
                    tracing::warn!(
                        peer = %peer,
                        index,
                        expected,
                        "dropping replayed envelope"
                    );
                    processed += 1;
                },
                Err(err) => {
                    failure = Some(err.into());
                    break;
                },
            }
        }

        if processed > 0 {
            if let Err(err) = relay.ack_messages(me, processed).await {
                // The decrypted messages are durable; the un-acked envelopes
                // will be re-served and rejected as replays next time.
                tracing::warn!(count = processed, error = %err, "acknowledgement failed");
                if failure.is_none() {
                    failure = Some(err.into());
                }
            }
        }
        Ok(ReceiveReport { messages, failure })
    }

    /// Establish a responder-side conversation from a first envelope.
    fn bootstrap_conversation(
        &self,
        identity: &Identity,
        peer: &Username,
        envelope: &Envelope,
    ) -> Result<Conversation, ClientError> {
        let (Some(pre_key), Some(sender_ratchet)) =
            (envelope.pre_key.as_ref(), envelope.header.ratchet_key())
        else {
            return Err(ClientError::MissingPreKeyMessage(peer.clone()));
        };
        if envelope.header.message_index != 0 {
            return Err(ClientError::InvalidFirstMessage {
                peer: peer.clone(),
                index: envelope.header.message_index,
            });
        }

        let (spk_priv, _, _) = self
            .prekey_store
            .load_signed_pre_key(&pre_key.signed_pre_key_id)?
            .ok_or_else(|| {
                ClientError::UnknownSignedPreKey(pre_key.signed_pre_key_id.clone())
            })?;

        let one_time_priv = match &pre_key.one_time_pre_key_id {
            Some(id) => {
                let consumed = self.prekey_store.consume_one_time_pre_key(id)?;
                if consumed.is_none() {
                    tracing::warn!(peer = %peer, id = %id, "one-time pre-key already consumed");
                }
                consumed.map(|(private, _)| private)
            },
            None => None,
        };

        let root =
            x3dh::responder_root(identity, &spk_priv, one_time_priv.as_ref(), pre_key)?;
        let state = RatchetState::init_as_responder(
            &root,
            &identity.x_priv,
            &X25519Public::from_bytes(sender_ratchet),
        )?;
        tracing::info!(peer = %peer, "conversation bootstrapped as responder");
        Ok(Conversation { peer: peer.clone(), state })
    }

    /// Check the relay still holds the canary we registered with.
    async fn verify_canary(
        &self,
        relay: &RelayClient,
        username: &Username,
    ) -> Result<(), ClientError> {
        let server_url = relay.base_url().to_owned();
        let profile = self.account_store.load(&server_url, username)?.ok_or_else(|| {
            ClientError::NoAccount { username: username.clone(), server_url }
        })?;

        let canary = relay.fetch_canary(username).await?;
        if canary != profile.canary {
            return Err(ClientError::CanaryMismatch { username: username.clone() });
        }
        Ok(())
    }
}

/// Eight random bytes as hex, for key identifiers and canaries.
fn random_suffix() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
