//! Signed and one-time pre-key storage.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use ciphera_crypto::{Signature, X25519Public, X25519Secret};
use ciphera_proto::{OneTimePreKeyId, OneTimePreKeyPublic, SignedPreKeyId};
use serde::{Deserialize, Serialize};

use super::{read_json, write_json, StoreError};

const SPK_FILE: &str = "spk_pairs.json";
const OPK_FILE: &str = "opk_pairs.json";
const META_FILE: &str = "prekey_meta.json";

/// A one-time pre-key pair held locally until a peer consumes it.
#[derive(Clone, Serialize, Deserialize)]
pub struct OneTimePreKeyPair {
    /// Identifier published in the bundle.
    pub id: OneTimePreKeyId,
    /// Private half, used once in an X3DH response.
    pub private: X25519Secret,
    /// Public half, served to initiators.
    pub public: X25519Public,
}

#[derive(Serialize, Deserialize)]
struct SignedPreKeyRecord {
    private: X25519Secret,
    public: X25519Public,
    signature: Signature,
}

#[derive(Serialize, Deserialize)]
struct OneTimeRecord {
    private: X25519Secret,
    public: X25519Public,
}

#[derive(Default, Serialize, Deserialize)]
struct PreKeyMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_spk_id: Option<SignedPreKeyId>,
}

/// Pre-key persistence with consume-once one-time keys.
///
/// All operations take the store lock, so no two callers can ever receive
/// the same one-time pre-key: [`consume_one_time_pre_key`] removes the
/// entry and rewrites the file before returning it.
///
/// [`consume_one_time_pre_key`]: PreKeyStore::consume_one_time_pre_key
pub struct PreKeyStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl PreKeyStore {
    /// Store rooted at `home`.
    pub fn new(home: &Path) -> Self {
        Self { dir: home.to_path_buf(), lock: Mutex::new(()) }
    }

    /// Persist a signed pre-key pair under its id.
    pub fn save_signed_pre_key(
        &self,
        id: &SignedPreKeyId,
        private: &X25519Secret,
        public: &X25519Public,
        signature: &Signature,
    ) -> Result<(), StoreError> {
        let _guard = self.lock.lock().expect("pre-key store lock poisoned");
        let path = self.dir.join(SPK_FILE);
        let mut records: BTreeMap<SignedPreKeyId, SignedPreKeyRecord> =
            read_json(&path)?.unwrap_or_default();
        records.insert(
            id.clone(),
            SignedPreKeyRecord {
                private: private.clone(),
                public: *public,
                signature: *signature,
            },
        );
        write_json(&path, &records)
    }

    /// Look up a signed pre-key pair by id.
    pub fn load_signed_pre_key(
        &self,
        id: &SignedPreKeyId,
    ) -> Result<Option<(X25519Secret, X25519Public, Signature)>, StoreError> {
        let _guard = self.lock.lock().expect("pre-key store lock poisoned");
        let records: BTreeMap<SignedPreKeyId, SignedPreKeyRecord> =
            read_json(&self.dir.join(SPK_FILE))?.unwrap_or_default();
        Ok(records.get(id).map(|r| (r.private.clone(), r.public, r.signature)))
    }

    /// Merge a batch of freshly generated one-time pre-keys into the store.
    pub fn save_one_time_pre_keys(&self, pairs: &[OneTimePreKeyPair]) -> Result<(), StoreError> {
        let _guard = self.lock.lock().expect("pre-key store lock poisoned");
        let path = self.dir.join(OPK_FILE);
        let mut records: BTreeMap<OneTimePreKeyId, OneTimeRecord> =
            read_json(&path)?.unwrap_or_default();
        for pair in pairs {
            records.insert(
                pair.id.clone(),
                OneTimeRecord { private: pair.private.clone(), public: pair.public },
            );
        }
        write_json(&path, &records)
    }

    /// Atomically remove and return a one-time pre-key.
    ///
    /// Returns `None` when the id is unknown or was already consumed; a
    /// given id yields `Some` at most once for the lifetime of the store.
    pub fn consume_one_time_pre_key(
        &self,
        id: &OneTimePreKeyId,
    ) -> Result<Option<(X25519Secret, X25519Public)>, StoreError> {
        let _guard = self.lock.lock().expect("pre-key store lock poisoned");
        let path = self.dir.join(OPK_FILE);
        let mut records: BTreeMap<OneTimePreKeyId, OneTimeRecord> =
            read_json(&path)?.unwrap_or_default();
        let Some(record) = records.remove(id) else {
            return Ok(None);
        };
        // The entry must be gone from disk before the key is handed out.
        write_json(&path, &records)?;
        Ok(Some((record.private, record.public)))
    }

    /// Public halves of every unconsumed one-time pre-key, ordered by id.
    pub fn list_one_time_pre_key_publics(
        &self,
    ) -> Result<Vec<OneTimePreKeyPublic>, StoreError> {
        let _guard = self.lock.lock().expect("pre-key store lock poisoned");
        let records: BTreeMap<OneTimePreKeyId, OneTimeRecord> =
            read_json(&self.dir.join(OPK_FILE))?.unwrap_or_default();
        Ok(records
            .into_iter()
            .map(|(id, record)| OneTimePreKeyPublic {
                one_time_pre_key_id: id,
                one_time_pre_key: record.public,
            })
            .collect())
    }

    /// Record which signed pre-key id is the active one.
    pub fn set_current_signed_pre_key_id(&self, id: &SignedPreKeyId) -> Result<(), StoreError> {
        let _guard = self.lock.lock().expect("pre-key store lock poisoned");
        write_json(
            &self.dir.join(META_FILE),
            &PreKeyMeta { current_spk_id: Some(id.clone()) },
        )
    }

    /// The active signed pre-key id, if one was recorded.
    pub fn current_signed_pre_key_id(&self) -> Result<Option<SignedPreKeyId>, StoreError> {
        let _guard = self.lock.lock().expect("pre-key store lock poisoned");
        let meta: PreKeyMeta = read_json(&self.dir.join(META_FILE))?.unwrap_or_default();
        Ok(meta.current_spk_id)
    }
}

#[cfg(test)]
mod tests {
    use ciphera_crypto::{generate_ed25519, generate_x25519, sign};

    use super::*;

    fn store() -> (tempfile::TempDir, PreKeyStore) {
        let home = tempfile::tempdir().unwrap();
        let store = PreKeyStore::new(home.path());
        (home, store)
    }

    fn one_time_pair(id: &str) -> OneTimePreKeyPair {
        let (private, public) = generate_x25519();
        OneTimePreKeyPair { id: id.into(), private, public }
    }

    #[test]
    fn signed_pre_key_roundtrip() {
        let (_home, store) = store();
        let (private, public) = generate_x25519();
        let (ed_priv, _) = generate_ed25519();
        let signature = sign(&ed_priv, public.as_bytes()).unwrap();

        let id: SignedPreKeyId = "spk-1".into();
        store.save_signed_pre_key(&id, &private, &public, &signature).unwrap();

        let (got_priv, got_pub, got_sig) = store.load_signed_pre_key(&id).unwrap().unwrap();
        assert_eq!(got_priv.as_bytes(), private.as_bytes());
        assert_eq!(got_pub, public);
        assert_eq!(got_sig.as_bytes(), signature.as_bytes());

        assert!(store.load_signed_pre_key(&"spk-2".into()).unwrap().is_none());
    }

    #[test]
    fn one_time_pre_key_is_consumed_exactly_once() {
        let (_home, store) = store();
        store.save_one_time_pre_keys(&[one_time_pair("opk-1"), one_time_pair("opk-2")]).unwrap();

        let id: OneTimePreKeyId = "opk-1".into();
        assert!(store.consume_one_time_pre_key(&id).unwrap().is_some());
        assert!(store.consume_one_time_pre_key(&id).unwrap().is_none());

        // The consumed key no longer appears in listings either.
        let remaining = store.list_one_time_pre_key_publics().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].one_time_pre_key_id, "opk-2".into());
    }

    #[test]
    fn consumption_survives_reopening_the_store() {
        let home = tempfile::tempdir().unwrap();
        {
            let store = PreKeyStore::new(home.path());
            store.save_one_time_pre_keys(&[one_time_pair("opk-1")]).unwrap();
            assert!(store.consume_one_time_pre_key(&"opk-1".into()).unwrap().is_some());
        }
        let reopened = PreKeyStore::new(home.path());
        assert!(reopened.consume_one_time_pre_key(&"opk-1".into()).unwrap().is_none());
    }

    #[test]
    fn current_signed_pre_key_id_roundtrip() {
        let (_home, store) = store();
        assert!(store.current_signed_pre_key_id().unwrap().is_none());

        store.set_current_signed_pre_key_id(&"spk-7".into()).unwrap();
        assert_eq!(store.current_signed_pre_key_id().unwrap(), Some("spk-7".into()));
    }
}
