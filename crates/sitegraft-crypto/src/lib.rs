//! # sitegraft-crypto
//!
//! Credential vault for the sitegraft migration engine: authenticated
//! symmetric encryption (AES-256-GCM) of the remote connection descriptor,
//! keyed from host installation secrets via HKDF-SHA256.

pub mod cipher;
pub mod error;
pub mod kdf;
pub mod record;
pub mod vault;

pub use cipher::{aes_gcm_decrypt, aes_gcm_encrypt, generate_nonce};
pub use error::{CryptoError, CryptoResult};
pub use kdf::{derive_key, DerivedKey};
pub use record::{CredentialRecord, HostSpec, DEFAULT_PORT};
pub use vault::Vault;
