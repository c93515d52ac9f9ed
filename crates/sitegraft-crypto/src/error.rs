//! Error types for vault operations.

use thiserror::Error;

/// Result type alias for crypto operations.
pub type CryptoResult<T> = std::result::Result<T, CryptoError>;

/// Errors from credential encryption, decryption, and validation.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Encryption failed.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Decryption or authentication failed. Tampered ciphertext lands
    /// here — never as garbage plaintext.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Key derivation failed.
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// Blob is not in a recognized vault format.
    #[error("Unrecognized vault format: {0}")]
    Format(String),

    /// Credential record is missing required fields.
    #[error("Invalid credentials: {0}")]
    InvalidRecord(String),

    /// Serialization of the credential record failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CryptoError {
    fn from(e: serde_json::Error) -> Self {
        CryptoError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CryptoError::Decryption("bad tag".to_string());
        assert_eq!(err.to_string(), "Decryption failed: bad tag");

        let err = CryptoError::Format("v1:unknown".to_string());
        assert_eq!(err.to_string(), "Unrecognized vault format: v1:unknown");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("x").unwrap_err();
        let err: CryptoError = json_err.into();
        assert!(matches!(err, CryptoError::Serialization(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<CryptoError>();
        assert_sync::<CryptoError>();
    }
}
