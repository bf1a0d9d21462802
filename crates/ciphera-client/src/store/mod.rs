//! File-backed stores under the client home directory.
//!
//! Layout:
//!
//! ```text
//! <home>/identity.json        encrypted identity (see [`IdentityStore`])
//! <home>/spk_pairs.json       signed pre-key pairs by id
//! <home>/opk_pairs.json       one-time pre-key pairs by id
//! <home>/prekey_meta.json     which signed pre-key is current
//! <home>/sessions.json        X3DH sessions by peer
//! <home>/conversations.json   ratchet state by peer
//! <home>/accounts.json        relay account profiles
//! ```
//!
//! Every store serialises access through its own mutex and rewrites its file
//! whole on mutation, so read-modify-write cycles (consuming a one-time
//! pre-key in particular) are atomic within the process. Files holding key
//! material are created with owner-only permissions.

mod account;
mod identity;
mod prekey;
mod ratchet;
mod session;

use std::{fs, io, path::Path};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub use account::{AccountProfile, AccountStore};
pub use identity::IdentityStore;
pub use prekey::{OneTimePreKeyPair, PreKeyStore};
pub use ratchet::RatchetStore;
pub use session::SessionStore;

/// Errors from local storage.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("storage I/O: {0}")]
    Io(#[from] io::Error),

    /// A store file did not parse.
    #[error("storage encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    /// An identity file already exists and overwrite was not requested.
    #[error("identity already exists; re-run with --force to rotate it")]
    IdentityExists,

    /// No identity file yet; `init` has not been run.
    #[error("no identity found; run init first")]
    IdentityMissing,

    /// The identity could not be unlocked: wrong passphrase or a corrupted
    /// file, indistinguishable on purpose.
    #[error("wrong passphrase or corrupted identity")]
    IdentityLocked,

    /// A store file was written by an unknown format version.
    #[error("unsupported store format version {0}")]
    UnsupportedVersion(u32),
}

/// Read and parse a JSON file, or `None` when it does not exist yet.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(Some(serde_json::from_slice(&data)?))
}

/// Serialise a value to pretty JSON and write it with owner-only
/// permissions.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_vec_pretty(value)?;
    fs::write(path, data)?;
    restrict_permissions(path)?;
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}
