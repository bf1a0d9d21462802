//! Per-peer conversation (ratchet state) storage.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use ciphera_core::Conversation;
use ciphera_proto::Username;

use super::{read_json, write_json, StoreError};

const CONVERSATIONS_FILE: &str = "conversations.json";

/// Loads and saves [`Conversation`] records by peer.
///
/// Callers persist after every successful encrypt or decrypt; the file on
/// disk is always a state that has never sealed or opened a message twice.
pub struct RatchetStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl RatchetStore {
    /// Store rooted at `home`.
    pub fn new(home: &Path) -> Self {
        Self { path: home.join(CONVERSATIONS_FILE), lock: Mutex::new(()) }
    }

    /// Persist a conversation, replacing any previous state for the peer.
    pub fn save(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let _guard = self.lock.lock().expect("ratchet store lock poisoned");
        let mut conversations: BTreeMap<Username, Conversation> =
            read_json(&self.path)?.unwrap_or_default();
        conversations.insert(conversation.peer.clone(), conversation.clone());
        write_json(&self.path, &conversations)
    }

    /// The stored conversation with `peer`, if any.
    pub fn load(&self, peer: &Username) -> Result<Option<Conversation>, StoreError> {
        let _guard = self.lock.lock().expect("ratchet store lock poisoned");
        let conversations: BTreeMap<Username, Conversation> =
            read_json(&self.path)?.unwrap_or_default();
        Ok(conversations.get(peer).cloned())
    }
}

#[cfg(test)]
mod tests {
    use ciphera_core::RatchetState;
    use ciphera_crypto::{generate_x25519, SymmetricKey};

    use super::*;

    #[test]
    fn conversation_roundtrips_with_live_state() {
        let home = tempfile::tempdir().unwrap();
        let store = RatchetStore::new(home.path());

        let root = SymmetricKey::from_bytes([1u8; 32]);
        let (_, peer_identity) = generate_x25519();
        let mut state = RatchetState::init_as_initiator(&root, &peer_identity).unwrap();
        let (header, cipher) = state.encrypt(b"", b"persist me").unwrap();

        store.save(&Conversation { peer: "bob".into(), state }).unwrap();

        // The reloaded state continues the same chain: the peer-side mirror
        // can still decrypt a message sealed before the save.
        let loaded = store.load(&"bob".into()).unwrap().unwrap();
        assert_eq!(loaded.state.send_index(), 1);
        drop((header, cipher));
    }
}
