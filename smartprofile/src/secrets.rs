//! Secure key-value storage seam for tokens and key-share blobs.
//!
//! On device this is backed by the platform keychain; here there are two
//! implementations: [`MemorySecretStore`] for tests and [`FileSecretStore`]
//! for the CLI.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::debug;

use crate::error::SecretStoreError;

pub const ACCESS_TOKEN_KEY: &str = "auth.access_token";
pub const REFRESH_TOKEN_KEY: &str = "auth.refresh_token";

/// Key under which a profile's MPC key-share record is stored.
pub fn key_share_key(profile_id: &str) -> String {
    format!("mpc.keyshare.{profile_id}")
}

/// Reads may run concurrently; writers are sequenced by the coordinator that
/// owns the logical operation.
pub trait SecretStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SecretStoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SecretStoreError>;
    fn delete(&self, key: &str) -> Result<(), SecretStoreError>;
    /// Remove every entry in one step.
    fn clear_all(&self) -> Result<(), SecretStoreError>;
}

#[derive(Debug, Default)]
pub struct MemorySecretStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, key: &str) -> Result<Option<String>, SecretStoreError> {
        let entries = self.entries.read().map_err(|_| SecretStoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SecretStoreError> {
        let mut entries = self.entries.write().map_err(|_| SecretStoreError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), SecretStoreError> {
        let mut entries = self.entries.write().map_err(|_| SecretStoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }

    fn clear_all(&self) -> Result<(), SecretStoreError> {
        let mut entries = self.entries.write().map_err(|_| SecretStoreError::Poisoned)?;
        entries.clear();
        Ok(())
    }
}

/// JSON file store. Every write rewrites the file through a temp file and a
/// rename, so a crash never leaves a half-written store.
#[derive(Debug)]
pub struct FileSecretStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
}

impl FileSecretStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SecretStoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => HashMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), entries = entries.len(), "secret store opened");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<(), SecretStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        let mut file = open_private(&tmp)?;
        file.write_all(&serde_json::to_vec_pretty(entries)?)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Persist `f` applied to a copy of the entries, then swap the copy in.
    /// A failed write leaves memory matching the file.
    fn write_with(
        &self,
        f: impl FnOnce(&mut HashMap<String, String>) -> bool,
    ) -> Result<(), SecretStoreError> {
        let mut entries = self.entries.write().map_err(|_| SecretStoreError::Poisoned)?;
        let mut next = entries.clone();
        if !f(&mut next) {
            return Ok(());
        }
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }
}

/// Create or truncate `path`, readable by the owner only.
#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    use std::fs::Permissions;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies to newly created files.
    file.set_permissions(Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::File::create(path)
}

impl SecretStore for FileSecretStore {
    fn get(&self, key: &str) -> Result<Option<String>, SecretStoreError> {
        let entries = self.entries.read().map_err(|_| SecretStoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SecretStoreError> {
        self.write_with(|entries| {
            entries.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn delete(&self, key: &str) -> Result<(), SecretStoreError> {
        self.write_with(|entries| entries.remove(key).is_some())
    }

    fn clear_all(&self) -> Result<(), SecretStoreError> {
        self.write_with(|entries| {
            entries.clear();
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_clear_all() {
        let store = MemorySecretStore::new();
        store.set(ACCESS_TOKEN_KEY, "a").unwrap();
        store.set(&key_share_key("p1"), "{}").unwrap();
        assert_eq!(store.len(), 2);
        store.clear_all().unwrap();
        assert!(store.is_empty());
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("secrets.json");

        let store = FileSecretStore::open(&path).unwrap();
        store.set(ACCESS_TOKEN_KEY, "token-1").unwrap();
        store.set(REFRESH_TOKEN_KEY, "refresh-1").unwrap();
        store.delete(REFRESH_TOKEN_KEY).unwrap();
        drop(store);

        let reopened = FileSecretStore::open(&path).unwrap();
        assert_eq!(
            reopened.get(ACCESS_TOKEN_KEY).unwrap().as_deref(),
            Some("token-1")
        );
        assert_eq!(reopened.get(REFRESH_TOKEN_KEY).unwrap(), None);

        reopened.clear_all().unwrap();
        let emptied = FileSecretStore::open(&path).unwrap();
        assert_eq!(emptied.get(ACCESS_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_file_store_keeps_memory_when_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");
        let store = FileSecretStore::open(&path).unwrap();
        store.set(ACCESS_TOKEN_KEY, "token-1").unwrap();

        // A directory where the temp file should go makes the next write fail.
        std::fs::create_dir(path.with_extension("tmp")).unwrap();

        assert!(store.set(ACCESS_TOKEN_KEY, "token-2").is_err());
        assert!(store.clear_all().is_err());
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("token-1"));
        let on_disk = FileSecretStore::open(&path).unwrap();
        assert_eq!(on_disk.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("token-1"));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");
        let store = FileSecretStore::open(&path).unwrap();
        store.set(ACCESS_TOKEN_KEY, "token-1").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
