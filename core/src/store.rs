//! Durable storage for the composed `Authorization` header.
//!
//! `KeyringCredentialStore` keeps it in the OS credential store and is the
//! default for interactive hosts. `FileCredentialStore` is the explicit
//! fallback; on unix the file is readable by its owner only.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::ApiError;

pub const KEYRING_SERVICE: &str = "splist";

pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<String>, ApiError>;
    fn save(&self, header: &str) -> Result<(), ApiError>;
    fn clear(&self) -> Result<(), ApiError>;
}

/// Keeps the header value in a single file.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<String>, ApiError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => {
                let header = raw.trim();
                Ok((!header.is_empty()).then(|| header.to_string()))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ApiError::Storage(format!("{}: {err}", self.path.display()))),
        }
    }

    fn save(&self, header: &str) -> Result<(), ApiError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ApiError::Storage(format!("{}: {e}", parent.display())))?;
        }
        let storage = |e: std::io::Error| ApiError::Storage(format!("{}: {e}", self.path.display()));
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
            options.mode(0o600);
            // `mode` only applies when the file is created.
            if self.path.exists() {
                fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600)).map_err(storage)?;
            }
        }
        let mut file = options.open(&self.path).map_err(storage)?;
        file.write_all(header.as_bytes()).map_err(storage)
    }

    fn clear(&self) -> Result<(), ApiError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ApiError::Storage(format!("{}: {err}", self.path.display()))),
        }
    }
}

/// Keeps the header value in the platform keychain, one entry per site.
pub struct KeyringCredentialStore {
    entry: keyring::Entry,
}

fn keyring_error(err: keyring::Error) -> ApiError {
    ApiError::Storage(format!("keyring: {err}"))
}

impl KeyringCredentialStore {
    pub fn new(account: &str) -> Result<Self, ApiError> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, account).map_err(keyring_error)?;
        Ok(Self { entry })
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn load(&self) -> Result<Option<String>, ApiError> {
        match self.entry.get_password() {
            Ok(header) => {
                let header = header.trim();
                Ok((!header.is_empty()).then(|| header.to_string()))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(keyring_error(err)),
        }
    }

    fn save(&self, header: &str) -> Result<(), ApiError> {
        self.entry.set_password(header).map_err(keyring_error)
    }

    fn clear(&self) -> Result<(), ApiError> {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(keyring_error(err)),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    header: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(header: &str) -> Self {
        Self {
            header: Mutex::new(Some(header.to_string())),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<String>, ApiError> {
        Ok(self.header.lock().clone())
    }

    fn save(&self, header: &str) -> Result<(), ApiError> {
        *self.header.lock() = Some(header.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), ApiError> {
        *self.header.lock() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_roundtrip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested").join("authorization"));
        assert_eq!(store.load().unwrap(), None);

        store.save("Bearer abc").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("Bearer abc"));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
        store.clear().unwrap();
    }

    #[test]
    fn blank_file_counts_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authorization");
        std::fs::write(&path, "  \n").unwrap();
        assert_eq!(FileCredentialStore::new(path).load().unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authorization");
        let store = FileCredentialStore::new(&path);
        store.save("Bearer secret").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        // An existing world-readable file is tightened on the next save.
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        store.save("Bearer rotated").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(store.load().unwrap().as_deref(), Some("Bearer rotated"));
    }

    #[test]
    fn keyring_store_roundtrip_and_clear() {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
        let store = KeyringCredentialStore::new("https://contoso.sharepoint.com/sites/pm").unwrap();
        assert_eq!(store.load().unwrap(), None);

        store.save("Bearer abc").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("Bearer abc"));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
        store.clear().unwrap();
    }

    #[test]
    fn memory_store() {
        let store = MemoryCredentialStore::with("Bearer x");
        assert_eq!(store.load().unwrap().as_deref(), Some("Bearer x"));
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }
}
