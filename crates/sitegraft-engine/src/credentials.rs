//! Encrypted credential persistence.
//!
//! The connection descriptor is one of only two durable records the
//! engine owns (the other is the run counter). It is stored as a single
//! vault blob in the host's key-value persistence and decrypted into
//! memory only for the duration of a connection attempt.

use std::sync::Arc;

use sitegraft_core::{Error, KeyValueStore, Result};
use sitegraft_crypto::{CredentialRecord, Vault};

/// Key under which the encrypted blob persists.
pub const CREDENTIALS_KEY: &str = "sitegraft:credentials";

/// Loads and saves the credential record through the vault.
pub struct CredentialStore {
    kv: Arc<dyn KeyValueStore>,
    vault: Vault,
}

impl CredentialStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, vault: Vault) -> Self {
        Self { kv, vault }
    }

    /// Load the stored record. An absent blob yields the defaults (the
    /// caller's validation rejects them before any I/O); a blob that
    /// fails authentication is a configuration error, never silently
    /// replaced.
    pub async fn load(&self) -> Result<CredentialRecord> {
        match self.kv.get_raw(CREDENTIALS_KEY).await? {
            None => Ok(CredentialRecord::default()),
            Some(blob) => self
                .vault
                .decrypt(&blob)
                .map_err(|e| Error::Config(format!("stored credentials unreadable: {e}"))),
        }
    }

    /// Encrypt and persist the record.
    pub async fn save(&self, record: &CredentialRecord) -> Result<()> {
        let blob = self
            .vault
            .encrypt(record)
            .map_err(|e| Error::Config(e.to_string()))?;
        self.kv.put_raw(CREDENTIALS_KEY, &blob).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryKv;

    fn store() -> (Arc<MemoryKv>, CredentialStore) {
        let kv = Arc::new(MemoryKv::new());
        let vault = Vault::new(b"install-secret-material", "example.org").unwrap();
        (kv.clone(), CredentialStore::new(kv, vault))
    }

    #[tokio::test]
    async fn test_absent_blob_yields_defaults() {
        let (_, creds) = store();
        let record = creds.load().await.unwrap();
        assert_eq!(record, CredentialRecord::default());
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let (_, creds) = store();
        let record = CredentialRecord {
            host: "db.example:3307".to_string(),
            database: "legacy".to_string(),
            user: "reader".to_string(),
            secret: "hunter2".to_string(),
            multi_tenant: true,
            ..Default::default()
        };

        creds.save(&record).await.unwrap();
        assert_eq!(creds.load().await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_blob_is_not_plaintext() {
        let (kv, creds) = store();
        let record = CredentialRecord {
            database: "legacy".to_string(),
            user: "reader".to_string(),
            secret: "hunter2".to_string(),
            ..Default::default()
        };
        creds.save(&record).await.unwrap();

        let blob = kv.get_raw(CREDENTIALS_KEY).await.unwrap().unwrap();
        assert!(!blob.contains("hunter2"));
        assert!(!blob.contains("legacy"));
    }

    #[tokio::test]
    async fn test_tampered_blob_is_config_error() {
        let (kv, creds) = store();
        creds.save(&CredentialRecord::default()).await.unwrap();

        kv.put_raw(CREDENTIALS_KEY, "bm90IGEgdmF1bHQgYmxvYg==")
            .await
            .unwrap();
        assert!(matches!(creds.load().await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_wrong_key_is_config_error() {
        let (kv, creds) = store();
        creds
            .save(&CredentialRecord {
                database: "legacy".to_string(),
                user: "reader".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let other = CredentialStore::new(
            kv,
            Vault::new(b"different-material", "example.org").unwrap(),
        );
        assert!(matches!(other.load().await, Err(Error::Config(_))));
    }
}
