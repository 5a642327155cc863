use super::{CredentialError, CredentialStore, ProviderCredential};
use crate::config::DEFAULT_KEYRING_SERVICE;
use crate::registry::ProviderId;
use keyring::Entry;
use std::sync::Mutex;
use tracing::debug;

/// OS keyring backed store. The service name groups all gateway secrets; the
/// provider id is the account name.
pub struct KeyringCredentialStore {
    service: String,
    write_lock: Mutex<()>,
}

impl KeyringCredentialStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self, provider: ProviderId) -> Result<Entry, CredentialError> {
        Entry::new(&self.service, provider.as_str())
            .map_err(|e| CredentialError::storage(provider, e.to_string()))
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new(DEFAULT_KEYRING_SERVICE)
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn save(&self, provider: ProviderId, secret: &str) -> Result<(), CredentialError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| CredentialError::storage(provider, "write lock poisoned"))?;
        self.entry(provider)?
            .set_password(secret)
            .map_err(|e| CredentialError::storage(provider, e.to_string()))?;
        debug!(provider = provider.as_str(), service = self.service.as_str(), "credential saved");
        Ok(())
    }

    fn lookup(&self, provider: ProviderId) -> Result<ProviderCredential, CredentialError> {
        match self.entry(provider)?.get_password() {
            Ok(secret) => Ok(ProviderCredential::new(provider, secret)),
            Err(keyring::Error::NoEntry) => Err(CredentialError::not_found(provider)),
            Err(e) => Err(CredentialError::storage(provider, e.to_string())),
        }
    }

    fn delete(&self, provider: ProviderId) -> Result<(), CredentialError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| CredentialError::storage(provider, "write lock poisoned"))?;
        match self.entry(provider)?.delete_password() {
            Ok(()) => {
                debug!(provider = provider.as_str(), "credential deleted");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Err(CredentialError::storage(
                provider,
                "no credential to delete",
            )),
            Err(e) => Err(CredentialError::storage(provider, e.to_string())),
        }
    }
}
