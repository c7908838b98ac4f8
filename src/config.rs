//! Centralized configuration for the lifecycle engine.
//!
//! All values are supplied by the hosting process, either programmatically
//! or from environment variables validated at startup. Signing algorithms
//! are pinned here and never taken from a presented token or assertion.

use crate::error::TokenError;
use std::env;
use std::time::Duration;

/// Token signing algorithm (HMAC family).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAlgorithm {
    /// HMAC with SHA-256
    HS256,
    /// HMAC with SHA-384
    HS384,
    /// HMAC with SHA-512
    HS512,
}

impl TokenAlgorithm {
    /// Parse algorithm from string.
    pub fn from_str(s: &str) -> Result<Self, TokenError> {
        match s.to_uppercase().as_str() {
            "HS256" => Ok(Self::HS256),
            "HS384" => Ok(Self::HS384),
            "HS512" => Ok(Self::HS512),
            _ => Err(TokenError::config(format!("Invalid token algorithm: {s}"))),
        }
    }

    /// Algorithm name carried in the claims `alg` field.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::HS384 => "HS384",
            Self::HS512 => "HS512",
        }
    }

    pub(crate) fn hmac_algorithm(&self) -> ring::hmac::Algorithm {
        match self {
            Self::HS256 => ring::hmac::HMAC_SHA256,
            Self::HS384 => ring::hmac::HMAC_SHA384,
            Self::HS512 => ring::hmac::HMAC_SHA512,
        }
    }
}

/// Assertion signature verification algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionAlgorithm {
    /// EdDSA over Curve25519
    Ed25519,
    /// RSA PKCS#1 v1.5 with SHA-256
    RsaSha256,
}

impl AssertionAlgorithm {
    /// Parse algorithm from string.
    pub fn from_str(s: &str) -> Result<Self, TokenError> {
        match s.to_uppercase().as_str() {
            "ED25519" => Ok(Self::Ed25519),
            "RS256" => Ok(Self::RsaSha256),
            _ => Err(TokenError::config(format!(
                "Invalid assertion algorithm: {s}"
            ))),
        }
    }

    /// Get algorithm name for configuration display.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ed25519 => "ED25519",
            Self::RsaSha256 => "RS256",
        }
    }

    /// XML `SignatureMethod` identifier this algorithm corresponds to.
    pub(crate) const fn method_uri(&self) -> &'static str {
        match self {
            Self::Ed25519 => "http://www.w3.org/2021/04/xmldsig-more#eddsa-ed25519",
            Self::RsaSha256 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
        }
    }

    pub(crate) fn verification(&self) -> &'static dyn ring::signature::VerificationAlgorithm {
        match self {
            Self::Ed25519 => &ring::signature::ED25519,
            Self::RsaSha256 => &ring::signature::RSA_PKCS1_2048_8192_SHA256,
        }
    }
}

/// Lifecycle engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Issuer recorded on tokens minted by this engine.
    pub issuer: String,
    /// Token signing algorithm; never read from the token itself.
    pub algorithm: TokenAlgorithm,
    /// Assertion verification algorithm; never read from the document.
    pub assertion_algorithm: AssertionAlgorithm,
    /// Password-reset token TTL.
    pub reset_token_ttl: Duration,
    /// CSRF token TTL.
    pub csrf_token_ttl: Duration,
    /// Bearer token TTL.
    pub bearer_token_ttl: Duration,
    /// Tolerated clock skew for assertion validity windows.
    pub assertion_clock_skew: Duration,
    /// Maximum number of live store entries.
    pub store_capacity: usize,
    /// Track assertion ids to block replay.
    pub replay_tracking: bool,
    /// Enable the bearer-token revocation list.
    pub bearer_revocation: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            issuer: "token-lifecycle".to_string(),
            algorithm: TokenAlgorithm::HS256,
            assertion_algorithm: AssertionAlgorithm::Ed25519,
            reset_token_ttl: Duration::from_secs(900),
            csrf_token_ttl: Duration::from_secs(3600),
            bearer_token_ttl: Duration::from_secs(900),
            assertion_clock_skew: Duration::from_secs(0),
            store_capacity: 100_000,
            replay_tracking: true,
            bearer_revocation: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any variable is present but invalid.
    pub fn from_env() -> Result<Self, TokenError> {
        dotenvy::dotenv().ok();

        let issuer = env::var("TOKEN_ISSUER").unwrap_or_else(|_| "token-lifecycle".to_string());
        let algorithm = TokenAlgorithm::from_str(
            &env::var("TOKEN_ALGORITHM").unwrap_or_else(|_| "HS256".to_string()),
        )?;
        let assertion_algorithm = AssertionAlgorithm::from_str(
            &env::var("ASSERTION_ALGORITHM").unwrap_or_else(|_| "ED25519".to_string()),
        )?;
        let reset_token_ttl = Duration::from_secs(parse_env("RESET_TOKEN_TTL", 900)?);
        let csrf_token_ttl = Duration::from_secs(parse_env("CSRF_TOKEN_TTL", 3600)?);
        let bearer_token_ttl = Duration::from_secs(parse_env("BEARER_TOKEN_TTL", 900)?);
        let assertion_clock_skew = Duration::from_secs(parse_env("ASSERTION_CLOCK_SKEW", 0)?);
        let store_capacity = parse_env("STORE_CAPACITY", 100_000)?;
        let replay_tracking = parse_env("REPLAY_TRACKING_ENABLED", true)?;
        let bearer_revocation = parse_env("BEARER_REVOCATION_ENABLED", false)?;

        Ok(Self {
            issuer,
            algorithm,
            assertion_algorithm,
            reset_token_ttl,
            csrf_token_ttl,
            bearer_token_ttl,
            assertion_clock_skew,
            store_capacity,
            replay_tracking,
            bearer_revocation,
        })
    }

    /// Set the issuer recorded on minted tokens.
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    /// Pin the token signing algorithm.
    #[must_use]
    pub fn with_algorithm(mut self, algorithm: TokenAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Set the password-reset token TTL.
    #[must_use]
    pub fn with_reset_token_ttl(mut self, ttl: Duration) -> Self {
        self.reset_token_ttl = ttl;
        self
    }

    /// Set the CSRF token TTL.
    #[must_use]
    pub fn with_csrf_token_ttl(mut self, ttl: Duration) -> Self {
        self.csrf_token_ttl = ttl;
        self
    }

    /// Set the bearer token TTL.
    #[must_use]
    pub fn with_bearer_token_ttl(mut self, ttl: Duration) -> Self {
        self.bearer_token_ttl = ttl;
        self
    }

    /// Bound the number of live store entries.
    #[must_use]
    pub fn with_store_capacity(mut self, capacity: usize) -> Self {
        self.store_capacity = capacity;
        self
    }

    /// Enable or disable assertion replay tracking.
    #[must_use]
    pub fn with_replay_tracking(mut self, enabled: bool) -> Self {
        self.replay_tracking = enabled;
        self
    }

    /// Enable or disable the bearer revocation list.
    #[must_use]
    pub fn with_bearer_revocation(mut self, enabled: bool) -> Self {
        self.bearer_revocation = enabled;
        self
    }
}

/// Parse environment variable with default value.
fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, TokenError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val
            .parse()
            .map_err(|e| TokenError::config(format!("Invalid {name}: {e}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_algorithm_parsing() {
        assert_eq!(
            TokenAlgorithm::from_str("HS256").unwrap(),
            TokenAlgorithm::HS256
        );
        assert_eq!(
            TokenAlgorithm::from_str("hs384").unwrap(),
            TokenAlgorithm::HS384
        );
        assert_eq!(
            TokenAlgorithm::from_str("HS512").unwrap(),
            TokenAlgorithm::HS512
        );
        assert!(TokenAlgorithm::from_str("none").is_err());
        assert!(TokenAlgorithm::from_str("RS256").is_err());
    }

    #[test]
    fn test_assertion_algorithm_parsing() {
        assert_eq!(
            AssertionAlgorithm::from_str("ed25519").unwrap(),
            AssertionAlgorithm::Ed25519
        );
        assert_eq!(
            AssertionAlgorithm::from_str("RS256").unwrap(),
            AssertionAlgorithm::RsaSha256
        );
        assert!(AssertionAlgorithm::from_str("dsa").is_err());
    }

    #[test]
    fn test_algorithm_as_str() {
        assert_eq!(TokenAlgorithm::HS256.as_str(), "HS256");
        assert_eq!(TokenAlgorithm::HS384.as_str(), "HS384");
        assert_eq!(TokenAlgorithm::HS512.as_str(), "HS512");
        assert_eq!(AssertionAlgorithm::Ed25519.as_str(), "ED25519");
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.issuer, "token-lifecycle");
        assert_eq!(config.algorithm, TokenAlgorithm::HS256);
        assert_eq!(config.reset_token_ttl, Duration::from_secs(900));
        assert_eq!(config.csrf_token_ttl, Duration::from_secs(3600));
        assert!(config.replay_tracking);
        assert!(!config.bearer_revocation);
    }

    #[test]
    fn test_builder_methods() {
        let config = Config::default()
            .with_issuer("login-service")
            .with_algorithm(TokenAlgorithm::HS512)
            .with_reset_token_ttl(Duration::from_secs(60))
            .with_store_capacity(16)
            .with_bearer_revocation(true);

        assert_eq!(config.issuer, "login-service");
        assert_eq!(config.algorithm, TokenAlgorithm::HS512);
        assert_eq!(config.reset_token_ttl, Duration::from_secs(60));
        assert_eq!(config.store_capacity, 16);
        assert!(config.bearer_revocation);
    }
}
