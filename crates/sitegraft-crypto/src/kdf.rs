//! Key derivation from host installation secrets.
//!
//! The vault key is derived with HKDF-SHA256 from opaque secret material
//! supplied by the host installation, bound to a context string (the local
//! site host) so the same material yields different keys per installation.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};

/// Domain-separation prefix for the HKDF info parameter.
const INFO_PREFIX: &str = "sitegraft";

/// Key wrapper with automatic zeroization on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    key: [u8; 32],
}

impl DerivedKey {
    /// Create a derived key from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { key: bytes }
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Derive a 256-bit vault key from installation secret material.
///
/// `context` is typically the local site host; it is folded into the HKDF
/// info string as `"sitegraft|<context>"`.
pub fn derive_key(material: &[u8], context: &str) -> CryptoResult<DerivedKey> {
    if material.is_empty() {
        return Err(CryptoError::KeyDerivation(
            "empty secret material".to_string(),
        ));
    }

    let info = format!("{INFO_PREFIX}|{context}");
    let hk = Hkdf::<Sha256>::new(None, material);

    let mut key = [0u8; 32];
    hk.expand(info.as_bytes(), &mut key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    Ok(DerivedKey { key })
}
