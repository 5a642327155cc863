//! 凭据存储 — 每个 provider 一个密钥，保存在操作系统的安全存储中
//!
//! Credential storage: one secret per provider identity.
//!
//! The production implementation is [`KeyringCredentialStore`], which delegates to the
//! host OS credential facility (Keychain, Secret Service, Windows Credential Manager).
//! [`MemoryCredentialStore`] exists so gateways can be exercised with fake keys.
//!
//! Stores are passed to the gateway explicitly; there is no process-wide instance.

mod keyring_store;

pub use keyring_store::KeyringCredentialStore;

use crate::registry::ProviderId;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::RwLock;

/// Credential store errors. Messages never include secret material.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("no credential stored for provider '{provider}'")]
    NotFound { provider: String },

    #[error("credential storage failed for provider '{provider}': {reason}")]
    Storage { provider: String, reason: String },
}

impl CredentialError {
    pub fn not_found(provider: ProviderId) -> Self {
        CredentialError::NotFound {
            provider: provider.as_str().to_string(),
        }
    }

    pub fn storage(provider: ProviderId, reason: impl Into<String>) -> Self {
        CredentialError::Storage {
            provider: provider.as_str().to_string(),
            reason: reason.into(),
        }
    }
}

/// A secret bound to the provider it authenticates.
///
/// `Debug` output never shows the secret.
#[derive(Debug)]
pub struct ProviderCredential {
    pub provider_id: ProviderId,
    pub secret: SecretString,
}

impl ProviderCredential {
    pub fn new(provider_id: ProviderId, secret: impl Into<String>) -> Self {
        Self {
            provider_id,
            secret: SecretString::from(secret.into()),
        }
    }

    pub fn expose(&self) -> &str {
        self.secret.expose_secret()
    }
}

/// Lookup/save/delete of one secret per provider.
///
/// Reads must be safe to run concurrently; implementations serialize writes.
pub trait CredentialStore: Send + Sync {
    fn save(&self, provider: ProviderId, secret: &str) -> Result<(), CredentialError>;

    fn lookup(&self, provider: ProviderId) -> Result<ProviderCredential, CredentialError>;

    /// Fails with `Storage` if nothing is stored for `provider`.
    fn delete(&self, provider: ProviderId) -> Result<(), CredentialError>;

    fn contains(&self, provider: ProviderId) -> bool {
        self.lookup(provider).is_ok()
    }
}

/// In-process store for tests and embedding scenarios that manage secrets elsewhere.
#[derive(Default)]
pub struct MemoryCredentialStore {
    secrets: RwLock<HashMap<ProviderId, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor for tests: `MemoryCredentialStore::with(&[(ProviderId::OpenAi, "sk-test")])`.
    pub fn with(entries: &[(ProviderId, &str)]) -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.secrets.write() {
            for (id, secret) in entries {
                map.insert(*id, (*secret).to_string());
            }
        }
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn save(&self, provider: ProviderId, secret: &str) -> Result<(), CredentialError> {
        let mut map = self
            .secrets
            .write()
            .map_err(|_| CredentialError::storage(provider, "store lock poisoned"))?;
        map.insert(provider, secret.to_string());
        Ok(())
    }

    fn lookup(&self, provider: ProviderId) -> Result<ProviderCredential, CredentialError> {
        let map = self
            .secrets
            .read()
            .map_err(|_| CredentialError::storage(provider, "store lock poisoned"))?;
        map.get(&provider)
            .map(|s| ProviderCredential::new(provider, s.clone()))
            .ok_or_else(|| CredentialError::not_found(provider))
    }

    fn delete(&self, provider: ProviderId) -> Result<(), CredentialError> {
        let mut map = self
            .secrets
            .write()
            .map_err(|_| CredentialError::storage(provider, "store lock poisoned"))?;
        map.remove(&provider)
            .map(|_| ())
            .ok_or_else(|| CredentialError::storage(provider, "no credential to delete"))
    }
}
