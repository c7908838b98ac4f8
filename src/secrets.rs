//! Signing and verification key material.
//!
//! Loaded once at startup and immutable afterwards, so no locking is
//! needed on the verification path. Secrets below the entropy floor are
//! rejected at load time; there is no fallback or hardcoded key.

use crate::error::TokenError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::HashMap;
use std::env;
use std::fmt;
use zeroize::Zeroizing;

/// Minimum signing secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Minimum number of distinct byte values in the signing secret. Rejects
/// degenerate keys (repeated characters, zero-filled buffers) that pass
/// the length check.
const MIN_DISTINCT_BYTES: usize = 8;

/// Process-wide key material: the token signing secret plus the public
/// keys of trusted assertion issuers.
pub struct SecretStore {
    signing_secret: Zeroizing<Vec<u8>>,
    trusted_issuers: HashMap<String, Vec<u8>>,
}

impl SecretStore {
    /// Build a store around a signing secret.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the secret is shorter than
    /// [`MIN_SECRET_LEN`] bytes or fails the distinct-byte floor.
    pub fn new(signing_secret: Vec<u8>) -> Result<Self, TokenError> {
        let signing_secret = Zeroizing::new(signing_secret);

        if signing_secret.len() < MIN_SECRET_LEN {
            return Err(TokenError::config(format!(
                "Signing secret must be at least {MIN_SECRET_LEN} bytes, got {}",
                signing_secret.len()
            )));
        }

        let mut seen = [false; 256];
        for &b in signing_secret.iter() {
            seen[b as usize] = true;
        }
        let distinct = seen.iter().filter(|s| **s).count();
        if distinct < MIN_DISTINCT_BYTES {
            return Err(TokenError::config(
                "Signing secret entropy below minimum floor".to_string(),
            ));
        }

        Ok(Self {
            signing_secret,
            trusted_issuers: HashMap::new(),
        })
    }

    /// Load key material from the environment.
    ///
    /// `SIGNING_SECRET` must hold a base64 secret meeting the entropy
    /// floor; absence is a hard failure. `TRUSTED_ISSUERS` optionally
    /// holds comma-separated `name=base64key` pairs.
    ///
    /// # Errors
    ///
    /// Returns a configuration error on missing or malformed material.
    pub fn from_env() -> Result<Self, TokenError> {
        dotenvy::dotenv().ok();

        let encoded = env::var("SIGNING_SECRET")
            .map_err(|_| TokenError::config("SIGNING_SECRET is not set"))?;
        let secret = STANDARD
            .decode(encoded.trim())
            .map_err(|e| TokenError::config(format!("Invalid SIGNING_SECRET: {e}")))?;

        let mut store = Self::new(secret)?;

        if let Ok(issuers) = env::var("TRUSTED_ISSUERS") {
            for pair in issuers.split(',').filter(|p| !p.trim().is_empty()) {
                let (name, key) = pair.split_once('=').ok_or_else(|| {
                    TokenError::config("TRUSTED_ISSUERS entries must be name=base64key")
                })?;
                let key = STANDARD.decode(key.trim()).map_err(|e| {
                    TokenError::config(format!("Invalid key for issuer {}: {e}", name.trim()))
                })?;
                store = store.with_trusted_issuer(name.trim(), key);
            }
        }

        Ok(store)
    }

    /// Register the verification public key for an assertion issuer.
    #[must_use]
    pub fn with_trusted_issuer(mut self, issuer: impl Into<String>, public_key: Vec<u8>) -> Self {
        self.trusted_issuers.insert(issuer.into(), public_key);
        self
    }

    pub(crate) fn signing_secret(&self) -> &[u8] {
        &self.signing_secret
    }

    /// Verification key for a trusted assertion issuer, if registered.
    #[must_use]
    pub fn issuer_key(&self, issuer: &str) -> Option<&[u8]> {
        self.trusted_issuers.get(issuer).map(Vec::as_slice)
    }
}

// Secret bytes must never end up in logs or panic output.
impl fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretStore")
            .field("signing_secret", &"<redacted>")
            .field(
                "trusted_issuers",
                &self.trusted_issuers.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strong_secret() -> Vec<u8> {
        b"0123456789abcdef0123456789abcdef".to_vec()
    }

    #[test]
    fn test_accepts_strong_secret() {
        assert!(SecretStore::new(strong_secret()).is_ok());
    }

    #[test]
    fn test_rejects_short_secret() {
        let result = SecretStore::new(b"too-short".to_vec());
        assert!(matches!(result, Err(TokenError::Config(_))));
    }

    #[test]
    fn test_rejects_degenerate_secret() {
        // Long enough but a single repeated byte.
        let result = SecretStore::new(vec![b'a'; 64]);
        assert!(matches!(result, Err(TokenError::Config(_))));
    }

    #[test]
    fn test_trusted_issuer_lookup() {
        let store = SecretStore::new(strong_secret())
            .unwrap()
            .with_trusted_issuer("https://idp.example.com", vec![1, 2, 3]);

        assert_eq!(
            store.issuer_key("https://idp.example.com"),
            Some(&[1u8, 2, 3][..])
        );
        assert!(store.issuer_key("https://other.example.com").is_none());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let store = SecretStore::new(strong_secret()).unwrap();
        let rendered = format!("{store:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("0123456789abcdef"));
    }
}
