//! Versioned vault blob format and the credential vault itself.
//!
//! Blob layout: `base64( "v2:aesgcm:" || nonce(12) || ciphertext+tag )`.
//! The version header stays inside the encoded payload so a stored blob is
//! a single opaque string in the host's key-value persistence.

use base64::Engine;

use crate::cipher::{aes_gcm_decrypt, aes_gcm_encrypt, generate_nonce, NONCE_LEN, TAG_LEN};
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{derive_key, DerivedKey};
use crate::record::CredentialRecord;

/// Format header for AES-256-GCM vault blobs.
const HEADER: &[u8] = b"v2:aesgcm:";

/// Encrypts/decrypts the remote connection descriptor at rest.
pub struct Vault {
    key: DerivedKey,
}

impl Vault {
    /// Build a vault from host-supplied secret material and a context
    /// string (typically the local site host).
    pub fn new(material: &[u8], context: &str) -> CryptoResult<Self> {
        Ok(Self {
            key: derive_key(material, context)?,
        })
    }

    /// Build a vault from an already-derived key.
    pub fn from_key(key: DerivedKey) -> Self {
        Self { key }
    }

    /// Encrypt raw bytes into a vault blob.
    pub fn seal_bytes(&self, plaintext: &[u8]) -> CryptoResult<String> {
        let nonce = generate_nonce();
        let ciphertext = aes_gcm_encrypt(self.key.as_bytes(), &nonce, plaintext)?;

        let mut raw = Vec::with_capacity(HEADER.len() + NONCE_LEN + ciphertext.len());
        raw.extend_from_slice(HEADER);
        raw.extend_from_slice(&nonce);
        raw.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(raw))
    }

    /// Decrypt a vault blob back into raw bytes.
    pub fn open_bytes(&self, blob: &str) -> CryptoResult<Vec<u8>> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(blob.trim())
            .map_err(|e| CryptoError::Format(e.to_string()))?;

        let payload = raw
            .strip_prefix(HEADER)
            .ok_or_else(|| CryptoError::Format("unknown blob header".to_string()))?;

        if payload.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Format("blob too short".to_string()));
        }

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&payload[..NONCE_LEN]);

        aes_gcm_decrypt(self.key.as_bytes(), &nonce, &payload[NONCE_LEN..])
    }

    /// Encrypt a credential record (as JSON) into a vault blob.
    pub fn encrypt(&self, record: &CredentialRecord) -> CryptoResult<String> {
        let json = serde_json::to_vec(record)?;
        self.seal_bytes(&json)
    }

    /// Decrypt a vault blob into a credential record.
    ///
    /// Unknown fields in the stored JSON are ignored and missing fields
    /// fill from defaults, so older blobs keep decrypting across record
    /// shape changes.
    pub fn decrypt(&self, blob: &str) -> CryptoResult<CredentialRecord> {
        let plaintext = self.open_bytes(blob)?;
        let record = serde_json::from_slice(&plaintext)?;
        Ok(record)
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault() -> Vault {
        Vault::new(b"install-secret-material", "example.org").unwrap()
    }

    #[test]
    fn test_round_trip_record() {
        let vault = test_vault();
        let record = CredentialRecord {
            host: "db.example:3307".to_string(),
            database: "legacy".to_string(),
            user: "reader".to_string(),
            secret: "hunter2".to_string(),
            multi_tenant: true,
            ..Default::default()
        };

        let blob = vault.encrypt(&record).unwrap();
        let back = vault.decrypt(&blob).unwrap();

        assert_eq!(record, back);
    }

    #[test]
    fn test_round_trip_arbitrary_bytes() {
        let vault = test_vault();

        for size in [0usize, 1, 64, 4096] {
            let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let blob = vault.seal_bytes(&payload).unwrap();
            assert_eq!(vault.open_bytes(&blob).unwrap(), payload);
        }
    }

    #[test]
    fn test_blob_is_base64_with_header() {
        let vault = test_vault();
        let blob = vault.seal_bytes(b"x").unwrap();

        let raw = base64::engine::general_purpose::STANDARD
            .decode(&blob)
            .unwrap();
        assert!(raw.starts_with(b"v2:aesgcm:"));
    }

    #[test]
    fn test_tampered_blob_fails_closed() {
        let vault = test_vault();
        let blob = vault.seal_bytes(b"sensitive").unwrap();

        let mut raw = base64::engine::general_purpose::STANDARD
            .decode(&blob)
            .unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = base64::engine::general_purpose::STANDARD.encode(raw);

        assert!(matches!(
            vault.open_bytes(&tampered),
            Err(CryptoError::Decryption(_))
        ));
    }

    #[test]
    fn test_wrong_key_fails_closed() {
        let vault = test_vault();
        let other = Vault::new(b"different-material", "example.org").unwrap();

        let blob = vault.seal_bytes(b"sensitive").unwrap();
        assert!(matches!(
            other.open_bytes(&blob),
            Err(CryptoError::Decryption(_))
        ));
    }

    #[test]
    fn test_unknown_header_is_format_error() {
        let vault = test_vault();
        let bogus = base64::engine::general_purpose::STANDARD.encode(b"v1:legacy:abcdef");

        assert!(matches!(
            vault.open_bytes(&bogus),
            Err(CryptoError::Format(_))
        ));
    }

    #[test]
    fn test_not_base64_is_format_error() {
        let vault = test_vault();
        assert!(matches!(
            vault.open_bytes("!!not base64!!"),
            Err(CryptoError::Format(_))
        ));
    }

    #[test]
    fn test_truncated_blob_is_format_error() {
        let vault = test_vault();
        let short = base64::engine::general_purpose::STANDARD.encode(b"v2:aesgcm:short");

        assert!(matches!(
            vault.open_bytes(&short),
            Err(CryptoError::Format(_))
        ));
    }

    #[test]
    fn test_nonces_differ_across_seals() {
        let vault = test_vault();
        let blob1 = vault.seal_bytes(b"same payload").unwrap();
        let blob2 = vault.seal_bytes(b"same payload").unwrap();
        assert_ne!(blob1, blob2);
    }
}
