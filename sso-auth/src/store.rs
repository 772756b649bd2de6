//! Token store adapter
//!
//! The authenticator persists client registrations and access tokens through
//! [`SecureStore`], keyed by an opaque per-instance string. A missing entry is
//! `Ok(None)`, never an error.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use sso_common::{AccessToken, ClientRegistration};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Key/value persistence for authentication state
pub trait SecureStore: Send + Sync {
    /// Save the client registration for `key`
    fn save_client_registration(
        &self,
        key: &str,
        registration: &ClientRegistration,
    ) -> Result<(), StoreError>;

    /// Load the client registration for `key`
    fn get_client_registration(&self, key: &str)
        -> Result<Option<ClientRegistration>, StoreError>;

    /// Forget the client registration for `key`
    fn delete_client_registration(&self, key: &str) -> Result<(), StoreError>;

    /// Save the access token for `key`
    fn save_token(&self, key: &str, token: &AccessToken) -> Result<(), StoreError>;

    /// Load the access token for `key`
    fn get_token(&self, key: &str) -> Result<Option<AccessToken>, StoreError>;

    /// Forget the access token for `key`
    fn delete_token(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreContents {
    #[serde(default)]
    client_registrations: BTreeMap<String, ClientRegistration>,
    #[serde(default)]
    tokens: BTreeMap<String, AccessToken>,
}

fn lock(contents: &Mutex<StoreContents>) -> Result<MutexGuard<'_, StoreContents>, StoreError> {
    contents
        .lock()
        .map_err(|_| StoreError::Backend("store lock poisoned".to_string()))
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryStore {
    contents: Mutex<StoreContents>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecureStore for MemoryStore {
    fn save_client_registration(
        &self,
        key: &str,
        registration: &ClientRegistration,
    ) -> Result<(), StoreError> {
        lock(&self.contents)?
            .client_registrations
            .insert(key.to_string(), registration.clone());
        Ok(())
    }

    fn get_client_registration(
        &self,
        key: &str,
    ) -> Result<Option<ClientRegistration>, StoreError> {
        Ok(lock(&self.contents)?.client_registrations.get(key).cloned())
    }

    fn delete_client_registration(&self, key: &str) -> Result<(), StoreError> {
        lock(&self.contents)?.client_registrations.remove(key);
        Ok(())
    }

    fn save_token(&self, key: &str, token: &AccessToken) -> Result<(), StoreError> {
        lock(&self.contents)?
            .tokens
            .insert(key.to_string(), token.clone());
        Ok(())
    }

    fn get_token(&self, key: &str) -> Result<Option<AccessToken>, StoreError> {
        Ok(lock(&self.contents)?.tokens.get(key).cloned())
    }

    fn delete_token(&self, key: &str) -> Result<(), StoreError> {
        lock(&self.contents)?.tokens.remove(key);
        Ok(())
    }
}

/// Single JSON document on disk, readable only by the owner
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    contents: Mutex<StoreContents>,
}

impl JsonFileStore {
    /// Open `path`, starting empty when the file does not exist yet
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let contents = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => StoreContents::default(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreContents::default(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "opened json store");
        Ok(Self {
            path,
            contents: Mutex::new(contents),
        })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update<F>(&self, mutate: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut StoreContents),
    {
        let mut contents = lock(&self.contents)?;
        mutate(&mut contents);
        self.write(&contents)
    }

    fn write(&self, contents: &StoreContents) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(contents)?;
        std::fs::write(&self.path, json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

impl SecureStore for JsonFileStore {
    fn save_client_registration(
        &self,
        key: &str,
        registration: &ClientRegistration,
    ) -> Result<(), StoreError> {
        self.update(|c| {
            c.client_registrations
                .insert(key.to_string(), registration.clone());
        })
    }

    fn get_client_registration(
        &self,
        key: &str,
    ) -> Result<Option<ClientRegistration>, StoreError> {
        Ok(lock(&self.contents)?.client_registrations.get(key).cloned())
    }

    fn delete_client_registration(&self, key: &str) -> Result<(), StoreError> {
        self.update(|c| {
            c.client_registrations.remove(key);
        })
    }

    fn save_token(&self, key: &str, token: &AccessToken) -> Result<(), StoreError> {
        self.update(|c| {
            c.tokens.insert(key.to_string(), token.clone());
        })
    }

    fn get_token(&self, key: &str) -> Result<Option<AccessToken>, StoreError> {
        Ok(lock(&self.contents)?.tokens.get(key).cloned())
    }

    fn delete_token(&self, key: &str) -> Result<(), StoreError> {
        self.update(|c| {
            c.tokens.remove(key);
        })
    }
}
