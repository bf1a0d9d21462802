//! Per-peer X3DH session storage.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use ciphera_core::Session;
use ciphera_proto::Username;

use super::{read_json, write_json, StoreError};

const SESSIONS_FILE: &str = "sessions.json";

/// Loads and saves [`Session`] records by peer.
pub struct SessionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SessionStore {
    /// Store rooted at `home`.
    pub fn new(home: &Path) -> Self {
        Self { path: home.join(SESSIONS_FILE), lock: Mutex::new(()) }
    }

    /// Persist a session, replacing any previous one for the peer.
    pub fn save(&self, session: &Session) -> Result<(), StoreError> {
        let _guard = self.lock.lock().expect("session store lock poisoned");
        let mut sessions: BTreeMap<Username, Session> =
            read_json(&self.path)?.unwrap_or_default();
        sessions.insert(session.peer.clone(), session.clone());
        write_json(&self.path, &sessions)
    }

    /// The stored session for `peer`, if any.
    pub fn load(&self, peer: &Username) -> Result<Option<Session>, StoreError> {
        let _guard = self.lock.lock().expect("session store lock poisoned");
        let sessions: BTreeMap<Username, Session> = read_json(&self.path)?.unwrap_or_default();
        Ok(sessions.get(peer).cloned())
    }
}

#[cfg(test)]
mod tests {
    use ciphera_crypto::{generate_x25519, SymmetricKey};

    use super::*;

    #[test]
    fn save_load_roundtrip() {
        let home = tempfile::tempdir().unwrap();
        let store = SessionStore::new(home.path());

        let (_, spk) = generate_x25519();
        let (_, identity) = generate_x25519();
        let (_, ephemeral) = generate_x25519();
        let session = Session {
            peer: "bob".into(),
            root_key: SymmetricKey::from_bytes([9u8; 32]),
            peer_signed_pre_key: spk,
            peer_identity_key: identity,
            created_utc: 1_700_000_000,
            signed_pre_key_id: "spk-1".into(),
            one_time_pre_key_id: Some("opk-1".into()),
            initiator_ephemeral_key: ephemeral,
        };
        store.save(&session).unwrap();

        let loaded = store.load(&"bob".into()).unwrap().unwrap();
        assert!(loaded.root_key.ct_eq(&session.root_key));
        assert_eq!(loaded.signed_pre_key_id, session.signed_pre_key_id);
        assert_eq!(loaded.one_time_pre_key_id, session.one_time_pre_key_id);

        assert!(store.load(&"carol".into()).unwrap().is_none());
    }
}
