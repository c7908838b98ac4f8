use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Generates collision-resistant token identifiers and stable hashes.
pub struct TokenIdGenerator;

impl TokenIdGenerator {
    /// 256-bit identifier from the thread-local CSPRNG, base64url.
    #[must_use]
    pub fn generate() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Stable SHA-256 hash of a value, base64url. Used to bind CSRF
    /// tokens to a session without carrying the raw session id.
    #[must_use]
    pub fn hash(value: &str) -> String {
        let digest = Sha256::digest(value.as_bytes());
        URL_SAFE_NO_PAD.encode(digest)
    }
}
