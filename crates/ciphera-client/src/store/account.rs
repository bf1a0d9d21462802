//! Relay account profiles.
//!
//! One profile per (relay URL, username) pair, recording the canary minted
//! at registration. A later canary mismatch means the relay lost or
//! replaced the account.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use ciphera_proto::Username;
use serde::{Deserialize, Serialize};

use super::{read_json, write_json, StoreError};

const ACCOUNTS_FILE: &str = "accounts.json";

/// A registered account on one relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProfile {
    /// Relay base URL the account lives on.
    pub server_url: String,
    /// Registered username.
    pub username: Username,
    /// Random token sent with the bundle at registration.
    pub canary: String,
}

/// Loads and saves [`AccountProfile`] records.
pub struct AccountStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AccountStore {
    /// Store rooted at `home`.
    pub fn new(home: &Path) -> Self {
        Self { path: home.join(ACCOUNTS_FILE), lock: Mutex::new(()) }
    }

    fn key(server_url: &str, username: &Username) -> String {
        format!("{server_url}|{username}")
    }

    /// Persist a profile, replacing any previous one for the same account.
    pub fn save(&self, profile: &AccountProfile) -> Result<(), StoreError> {
        let _guard = self.lock.lock().expect("account store lock poisoned");
        let mut profiles: BTreeMap<String, AccountProfile> =
            read_json(&self.path)?.unwrap_or_default();
        profiles.insert(Self::key(&profile.server_url, &profile.username), profile.clone());
        write_json(&self.path, &profiles)
    }

    /// The stored profile for an account, if any.
    pub fn load(
        &self,
        server_url: &str,
        username: &Username,
    ) -> Result<Option<AccountProfile>, StoreError> {
        let _guard = self.lock.lock().expect("account store lock poisoned");
        let profiles: BTreeMap<String, AccountProfile> =
            read_json(&self.path)?.unwrap_or_default();
        Ok(profiles.get(&Self::key(server_url, username)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_are_keyed_by_server_and_user() {
        let home = tempfile::tempdir().unwrap();
        let store = AccountStore::new(home.path());

        let profile = AccountProfile {
            server_url: "http://relay-a".to_owned(),
            username: "alice".into(),
            canary: "abc".to_owned(),
        };
        store.save(&profile).unwrap();

        assert_eq!(store.load("http://relay-a", &"alice".into()).unwrap(), Some(profile));
        assert_eq!(store.load("http://relay-b", &"alice".into()).unwrap(), None);
        assert_eq!(store.load("http://relay-a", &"bob".into()).unwrap(), None);
    }
}
