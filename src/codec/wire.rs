//! Signed token wire format.
//!
//! Wire form: `base64url(claims-json) "." base64url(mac)`. The MAC is
//! computed over the ASCII bytes of the first part with the configured
//! HMAC algorithm. The algorithm is pinned by configuration; the `alg`
//! field inside the claims is checked against it and never honored on
//! its own.

use crate::codec::claims::TokenClaims;
use crate::config::TokenAlgorithm;
use crate::error::TokenError;
use crate::secrets::SecretStore;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ring::hmac;
use subtle::ConstantTimeEq;

/// Stateless encoder/decoder for the signed token wire format.
#[derive(Debug, Clone, Copy)]
pub struct TokenCodec {
    algorithm: TokenAlgorithm,
}

impl TokenCodec {
    /// Create a codec pinned to the given algorithm.
    #[must_use]
    pub fn new(algorithm: TokenAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Serialize and sign a claim set.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` if the claims cannot be serialized.
    pub fn encode(&self, claims: &TokenClaims, secrets: &SecretStore) -> Result<String, TokenError> {
        let payload = serde_json::to_vec(claims).map_err(|_| TokenError::Malformed)?;
        let encoded = URL_SAFE_NO_PAD.encode(payload);

        let key = hmac::Key::new(self.algorithm.hmac_algorithm(), secrets.signing_secret());
        let tag = hmac::sign(&key, encoded.as_bytes());

        Ok(format!("{encoded}.{}", URL_SAFE_NO_PAD.encode(tag.as_ref())))
    }

    /// Verify and deserialize a wire token.
    ///
    /// The signature is recomputed with the locally configured algorithm
    /// and compared in constant time before any claim bytes are parsed;
    /// unsigned input is never deserialized.
    ///
    /// # Errors
    ///
    /// `Malformed` for wire-structure or claim-shape violations,
    /// `InvalidSignature` on a MAC mismatch, `AlgorithmMismatch` when
    /// the claimed algorithm disagrees with configuration.
    pub fn decode(&self, wire: &str, secrets: &SecretStore) -> Result<TokenClaims, TokenError> {
        let (payload, signature) = wire.rsplit_once('.').ok_or(TokenError::Malformed)?;
        if payload.is_empty() || signature.is_empty() {
            return Err(TokenError::Malformed);
        }

        let presented = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let key = hmac::Key::new(self.algorithm.hmac_algorithm(), secrets.signing_secret());
        let expected = hmac::sign(&key, payload.as_bytes());

        // Length check first (leaks only the length, which is public anyway)
        if expected.as_ref().len() != presented.len()
            || !bool::from(expected.as_ref().ct_eq(&presented))
        {
            return Err(TokenError::InvalidSignature);
        }

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Malformed)?;
        let claims: TokenClaims =
            serde_json::from_slice(&json).map_err(|_| TokenError::Malformed)?;

        if claims.alg != self.algorithm.as_str() {
            return Err(TokenError::AlgorithmMismatch);
        }

        Ok(claims)
    }
}
