//! User/contact directory: the external persistence collaborator the
//! dispatch loop calls into.
//!
//! The core only needs the narrow [`Directory`] interface:
//! registration, activity flags, and the contact relation.
//! [`JsonDirectory`] is the bundled implementation: account records
//! with PBKDF2 password hashes, a many-to-many contact relation with
//! an active flag per edge, and a login history of source addresses,
//! persisted as one JSON document with the same atomic-write
//! discipline as the pending queue.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sha2::Sha256;

use jimchat_types::{JimError, Result};

// ---------------------------------------------------------------------------
// Password hashing
// ---------------------------------------------------------------------------

/// PBKDF2 iteration count, matching the reference implementation.
const PBKDF2_ROUNDS: u32 = 10_000;

/// Derives the stored password hash: PBKDF2-HMAC-SHA256 with the
/// username as salt, hex-encoded.
pub fn hash_password(username: &str, password: &str) -> String {
    let mut digest = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        username.as_bytes(),
        PBKDF2_ROUNDS,
        &mut digest,
    );
    hex::encode(digest)
}

// ---------------------------------------------------------------------------
// Directory trait
// ---------------------------------------------------------------------------

/// The collaborator interface the dispatch loop routes through.
pub trait Directory: Send {
    /// Creates the account if it does not exist; the password (hashed)
    /// and status are recorded only at creation. A login-history entry
    /// is appended whenever a source address is supplied.
    fn register_user(
        &self,
        username: &str,
        password: Option<&str>,
        status: Option<&str>,
        source_ip: Option<IpAddr>,
    ) -> Result<()>;

    /// True if the account exists.
    fn is_registered(&self, username: &str) -> Result<bool>;

    /// Flags the account as active/inactive.
    fn set_active(&self, username: &str, active: bool) -> Result<()>;

    /// Clears the active flag of every account. Run at server startup,
    /// since no session survives a restart.
    fn set_all_inactive(&self) -> Result<()>;

    /// Usernames on the active side of `username`'s contact edges.
    fn list_contacts(&self, username: &str) -> Result<Vec<String>>;

    /// Activates (or creates) the `username -> contact` edge, creating
    /// missing accounts on either side.
    fn add_contact(&self, username: &str, contact: &str) -> Result<()>;

    /// Deactivates the `username -> contact` edge. Removing an edge
    /// that does not exist is a no-op.
    fn remove_contact(&self, username: &str, contact: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One entry in an account's login history.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct LoginRecord {
    ip: String,
    at: String,
}

/// A stored account.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct UserRecord {
    password_hash: Option<String>,
    status: Option<String>,
    active: bool,
    /// Contact edges: target username -> edge active flag.
    contacts: BTreeMap<String, bool>,
    logins: Vec<LoginRecord>,
}

/// The directory document as it lives on disk.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct DirectoryData {
    users: BTreeMap<String, UserRecord>,
}

// ---------------------------------------------------------------------------
// JsonDirectory
// ---------------------------------------------------------------------------

/// JSON-file-backed [`Directory`] implementation.
///
/// Every mutation persists the updated document before returning.
pub struct JsonDirectory {
    inner: Mutex<DirectoryData>,
    file_path: PathBuf,
}

impl JsonDirectory {
    /// Opens or creates a directory backed by the document at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let data = if path.exists() {
            let raw = fs::read(path).map_err(|e| JimError::StorageError {
                reason: format!("failed to read directory file: {e}"),
            })?;
            if raw.is_empty() {
                DirectoryData::default()
            } else {
                serde_json::from_slice(&raw).map_err(|e| JimError::StorageError {
                    reason: format!("failed to parse directory file: {e}"),
                })?
            }
        } else {
            DirectoryData::default()
        };

        Ok(Self {
            inner: Mutex::new(data),
            file_path: path.to_path_buf(),
        })
    }

    fn lock_data(&self) -> Result<std::sync::MutexGuard<'_, DirectoryData>> {
        self.inner.lock().map_err(|e| JimError::StorageError {
            reason: format!("directory lock poisoned: {e}"),
        })
    }

    /// Persists the current document atomically (tmp → fsync → rename).
    fn persist(&self, data: &DirectoryData) -> Result<()> {
        let raw = serde_json::to_vec_pretty(data).map_err(|e| JimError::StorageError {
            reason: format!("failed to serialize directory: {e}"),
        })?;

        let parent = self
            .file_path
            .parent()
            .ok_or_else(|| JimError::StorageError {
                reason: "directory file path has no parent".into(),
            })?;
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| JimError::StorageError {
                reason: format!("failed to create directory path: {e}"),
            })?;
        }

        let file_name = self
            .file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("directory.json");
        let tmp_path = parent.join(format!(".{}.tmp", file_name));

        {
            let mut file = fs::File::create(&tmp_path).map_err(|e| JimError::StorageError {
                reason: format!("failed to create temp directory file: {e}"),
            })?;
            file.write_all(&raw).map_err(|e| JimError::StorageError {
                reason: format!("failed to write temp directory file: {e}"),
            })?;
            file.sync_all().map_err(|e| JimError::StorageError {
                reason: format!("failed to fsync temp directory file: {e}"),
            })?;
        }

        fs::rename(&tmp_path, &self.file_path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            JimError::StorageError {
                reason: format!("failed to rename temp directory file: {e}"),
            }
        })?;

        Ok(())
    }
}

impl Directory for JsonDirectory {
    fn register_user(
        &self,
        username: &str,
        password: Option<&str>,
        status: Option<&str>,
        source_ip: Option<IpAddr>,
    ) -> Result<()> {
        let mut data = self.lock_data()?;

        let record = data.users.entry(username.to_string()).or_insert_with(|| {
            UserRecord {
                password_hash: password.map(|pw| hash_password(username, pw)),
                status: status.map(str::to_string),
                ..UserRecord::default()
            }
        });

        if let Some(ip) = source_ip {
            record.logins.push(LoginRecord {
                ip: ip.to_string(),
                at: chrono::Utc::now().to_rfc3339(),
            });
        }

        self.persist(&data)
    }

    fn is_registered(&self, username: &str) -> Result<bool> {
        let data = self.lock_data()?;
        Ok(data.users.contains_key(username))
    }

    fn set_active(&self, username: &str, active: bool) -> Result<()> {
        let mut data = self.lock_data()?;
        match data.users.get_mut(username) {
            Some(record) => record.active = active,
            None => {
                return Err(JimError::StorageError {
                    reason: format!("unknown user '{username}'"),
                })
            }
        }
        self.persist(&data)
    }

    fn set_all_inactive(&self) -> Result<()> {
        let mut data = self.lock_data()?;
        for record in data.users.values_mut() {
            record.active = false;
        }
        self.persist(&data)
    }

    fn list_contacts(&self, username: &str) -> Result<Vec<String>> {
        let data = self.lock_data()?;
        Ok(data
            .users
            .get(username)
            .map(|record| {
                record
                    .contacts
                    .iter()
                    .filter(|(_, active)| **active)
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn add_contact(&self, username: &str, contact: &str) -> Result<()> {
        let mut data = self.lock_data()?;

        data.users.entry(contact.to_string()).or_default();
        let record = data.users.entry(username.to_string()).or_default();
        record.contacts.insert(contact.to_string(), true);

        self.persist(&data)
    }

    fn remove_contact(&self, username: &str, contact: &str) -> Result<()> {
        let mut data = self.lock_data()?;

        if let Some(record) = data.users.get_mut(username) {
            if let Some(active) = record.contacts.get_mut(contact) {
                *active = false;
            }
        }

        self.persist(&data)
    }
}
