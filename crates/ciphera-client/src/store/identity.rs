//! Encrypted identity storage.
//!
//! The identity file keeps both public keys in the clear and seals each
//! private key separately under a passphrase-derived key (Argon2id KEK,
//! ChaCha20-Poly1305). One salt covers both seals; each gets its own nonce.

use std::path::{Path, PathBuf};

use ciphera_crypto::{
    b64,
    passphrase::{self, SALT_SIZE},
    Ed25519Public, Ed25519Secret, Identity, X25519Public, X25519Secret,
};
use serde::{Deserialize, Serialize};

use super::{read_json, write_json, StoreError};

const IDENTITY_FILE: &str = "identity.json";

/// On-disk identity format, version 2.
///
/// Version 1 stored a single combined blob; version 2 splits the two
/// private keys so either can be re-wrapped independently.
#[derive(Serialize, Deserialize)]
struct IdentityOnDisk {
    version: u32,
    x_pub: X25519Public,
    #[serde(with = "b64")]
    salt: Vec<u8>,
    #[serde(with = "b64")]
    nonce_x: Vec<u8>,
    #[serde(with = "b64")]
    enc_x_priv: Vec<u8>,
    ed_pub: Ed25519Public,
    #[serde(with = "b64")]
    nonce_ed: Vec<u8>,
    #[serde(with = "b64")]
    enc_ed_priv: Vec<u8>,
}

const IDENTITY_VERSION: u32 = 2;

/// Loads and saves the local [`Identity`] under a passphrase.
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    /// Store rooted at `home`.
    pub fn new(home: &Path) -> Self {
        Self { path: home.join(IDENTITY_FILE) }
    }

    /// Whether an identity file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Encrypt and write `identity`.
    ///
    /// # Errors
    ///
    /// [`StoreError::IdentityExists`] when a file is present and `force` is
    /// not set; rotation must be an explicit decision.
    pub fn save(
        &self,
        identity: &Identity,
        passphrase: &str,
        force: bool,
    ) -> Result<(), StoreError> {
        if self.exists() && !force {
            return Err(StoreError::IdentityExists);
        }

        let salt = passphrase::generate_salt();
        let (nonce_x, enc_x_priv) =
            passphrase::seal_secret(passphrase, &salt, identity.x_priv.as_bytes());
        let (nonce_ed, enc_ed_priv) =
            passphrase::seal_secret(passphrase, &salt, identity.ed_priv.as_bytes());

        write_json(
            &self.path,
            &IdentityOnDisk {
                version: IDENTITY_VERSION,
                x_pub: identity.x_pub,
                salt: salt.to_vec(),
                nonce_x: nonce_x.to_vec(),
                enc_x_priv,
                ed_pub: identity.ed_pub,
                nonce_ed: nonce_ed.to_vec(),
                enc_ed_priv,
            },
        )
    }

    /// Read and decrypt the identity.
    ///
    /// # Errors
    ///
    /// [`StoreError::IdentityMissing`] when no file exists,
    /// [`StoreError::IdentityLocked`] when the passphrase does not unlock
    /// it, [`StoreError::UnsupportedVersion`] for a foreign format.
    pub fn load(&self, passphrase: &str) -> Result<Identity, StoreError> {
        let disk: IdentityOnDisk =
            read_json(&self.path)?.ok_or(StoreError::IdentityMissing)?;
        if disk.version != IDENTITY_VERSION {
            return Err(StoreError::UnsupportedVersion(disk.version));
        }

        let salt: [u8; SALT_SIZE] =
            disk.salt.as_slice().try_into().map_err(|_| StoreError::IdentityLocked)?;
        let nonce_x: [u8; 12] =
            disk.nonce_x.as_slice().try_into().map_err(|_| StoreError::IdentityLocked)?;
        let nonce_ed: [u8; 12] =
            disk.nonce_ed.as_slice().try_into().map_err(|_| StoreError::IdentityLocked)?;

        let x_priv = passphrase::open_secret(passphrase, &salt, &nonce_x, &disk.enc_x_priv)
            .map_err(|_| StoreError::IdentityLocked)?;
        let ed_priv = passphrase::open_secret(passphrase, &salt, &nonce_ed, &disk.enc_ed_priv)
            .map_err(|_| StoreError::IdentityLocked)?;

        let x_priv: [u8; 32] =
            x_priv.as_slice().try_into().map_err(|_| StoreError::IdentityLocked)?;
        let ed_priv: [u8; 64] =
            ed_priv.as_slice().try_into().map_err(|_| StoreError::IdentityLocked)?;

        Ok(Identity {
            x_priv: X25519Secret::from_bytes(x_priv),
            x_pub: disk.x_pub,
            ed_priv: Ed25519Secret::from_bytes(ed_priv),
            ed_pub: disk.ed_pub,
        })
    }
}
