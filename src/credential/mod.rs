//! Bearer credential holder, local persistence, and validation lifecycle.

pub mod sqlite;

use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use tokio::sync::Mutex;

use crate::remote::{EventDirectory, RemoteError};

/// Storage key under which the credential is persisted.
pub const CREDENTIAL_KEY: &str = "inbox_api_key";

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credential storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("credential rejected: {0}")]
    Validation(RemoteError),
    #[error("credential is empty")]
    Empty,
    #[error("credential task failed: {0}")]
    Join(String),
}

pub type CredentialResult<T> = Result<T, CredentialError>;

/// A bearer token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> CredentialResult<Self> {
        let key = key.into().trim().to_string();
        if key.is_empty() {
            return Err(CredentialError::Empty);
        }
        Ok(Self(key))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// The single mutable credential, consulted on every request.
///
/// Cloning shares the same slot, so transports never need rebuilding when the
/// key changes.
#[derive(Debug, Clone, Default)]
pub struct CredentialHolder {
    slot: Arc<RwLock<Option<ApiKey>>>,
}

impl CredentialHolder {
    pub fn new(initial: Option<ApiKey>) -> Self {
        Self {
            slot: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn get(&self) -> Option<ApiKey> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, key: ApiKey) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(key);
    }

    pub fn clear(&self) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn is_set(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Client-local persistent storage for the credential.
pub trait CredentialStore: Send {
    fn load(&self) -> CredentialResult<Option<String>>;
    fn save(&mut self, key: &str) -> CredentialResult<()>;
    fn clear(&mut self) -> CredentialResult<()>;
}

/// Volatile store, for tests and one-shot sessions.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    value: Option<String>,
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> CredentialResult<Option<String>> {
        Ok(self.value.clone())
    }

    fn save(&mut self, key: &str) -> CredentialResult<()> {
        self.value = Some(key.to_string());
        Ok(())
    }

    fn clear(&mut self) -> CredentialResult<()> {
        self.value = None;
        Ok(())
    }
}

/// Ties the holder to its store: restore at startup, login, logout.
pub struct CredentialManager {
    holder: CredentialHolder,
    store: Arc<Mutex<Box<dyn CredentialStore>>>,
}

impl CredentialManager {
    pub fn new(holder: CredentialHolder, store: Box<dyn CredentialStore>) -> Self {
        Self {
            holder,
            store: Arc::new(Mutex::new(store)),
        }
    }

    pub fn holder(&self) -> &CredentialHolder {
        &self.holder
    }

    /// Loads the stored credential, falling back to `fallback` (usually the
    /// configured env key). Returns whether a credential is now held.
    pub async fn bootstrap(&self, fallback: Option<&str>) -> CredentialResult<bool> {
        let stored = self.with_store(|store| store.load()).await?;
        let candidate = stored.as_deref().or(fallback).map(ApiKey::new).transpose();
        match candidate {
            Ok(Some(key)) => {
                tracing::debug!(from_store = stored.is_some(), "credential loaded");
                self.holder.set(key);
                Ok(true)
            }
            Ok(None) | Err(CredentialError::Empty) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// [`CredentialManager::bootstrap`], then probes `/health` with whatever
    /// was loaded. A credential that fails the probe is cleared from both the
    /// holder and the store.
    pub async fn restore(
        &self,
        directory: &dyn EventDirectory,
        fallback: Option<&str>,
    ) -> CredentialResult<bool> {
        if !self.bootstrap(fallback).await? {
            return Ok(false);
        }
        self.validate(directory).await?;
        Ok(true)
    }

    /// Installs `key`, probes `/health`, and persists on success. On failure
    /// the holder and the store are both cleared.
    pub async fn login(&self, directory: &dyn EventDirectory, key: &str) -> CredentialResult<()> {
        let key = ApiKey::new(key)?;
        self.holder.set(key.clone());
        self.validate(directory).await?;

        let raw = key.expose().to_string();
        self.with_store(move |store| store.save(&raw)).await
    }

    async fn validate(&self, directory: &dyn EventDirectory) -> CredentialResult<()> {
        match directory.health().await {
            Ok(health) => {
                tracing::info!(version = %health.version, "credential validated");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "credential validation failed");
                self.logout().await?;
                Err(CredentialError::Validation(err))
            }
        }
    }

    pub async fn logout(&self) -> CredentialResult<()> {
        self.holder.clear();
        self.with_store(|store| store.clear()).await
    }

    async fn with_store<T, F>(&self, f: F) -> CredentialResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Box<dyn CredentialStore>) -> CredentialResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let mut store = store.blocking_lock();
            f(&mut *store)
        })
        .await
        .map_err(|e| CredentialError::Join(format!("join error: {e}")))?
    }
}
