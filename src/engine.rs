//! Lifecycle engine: the single entry point collaborators call.
//!
//! Composes the codec, assertion parser, store and clock. Nothing
//! outside this module mints or verifies credentials directly.

use crate::assertion::{AssertionEnvelope, AssertionParser};
use crate::clock::{Clock, SystemClock};
use crate::codec::{TokenClaims, TokenCodec, TokenPurpose};
use crate::config::Config;
use crate::error::{AssertionError, TokenError};
use crate::secrets::SecretStore;
use crate::store::{InMemoryTokenStore, TokenIdGenerator};
use crate::subject::SubjectClaim;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

/// Issues and verifies purpose-scoped tokens and identity assertions.
pub struct LifecycleEngine {
    config: Config,
    secrets: SecretStore,
    codec: TokenCodec,
    parser: AssertionParser,
    store: InMemoryTokenStore,
    clock: Arc<dyn Clock>,
}

impl LifecycleEngine {
    /// Create an engine on the system clock.
    #[must_use]
    pub fn new(config: Config, secrets: SecretStore) -> Self {
        Self::with_clock(config, secrets, Arc::new(SystemClock))
    }

    /// Create an engine with an injected clock.
    #[must_use]
    pub fn with_clock(config: Config, secrets: SecretStore, clock: Arc<dyn Clock>) -> Self {
        let codec = TokenCodec::new(config.algorithm);
        let parser = AssertionParser::new(config.assertion_algorithm, config.assertion_clock_skew);
        let store = InMemoryTokenStore::new(config.store_capacity);
        Self {
            config,
            secrets,
            codec,
            parser,
            store,
            clock,
        }
    }

    /// Issue a single-use password-reset token for `subject`.
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` when the store bound is hit.
    pub fn issue_reset_token(&self, subject: &str) -> Result<String, TokenError> {
        let now = self.clock.now();
        let record = self.store.issue(
            TokenPurpose::PasswordReset,
            subject,
            self.config.reset_token_ttl,
            now,
        )?;

        let claims = TokenClaims::new(
            self.config.algorithm,
            subject,
            TokenPurpose::PasswordReset,
            record.id.clone(),
            now.timestamp(),
            self.config.reset_token_ttl.as_secs() as i64,
        );
        let token = self.codec.encode(&claims, &self.secrets)?;

        info!(jti = %record.id, "Issued password reset token");
        Ok(token)
    }

    /// Issue a CSRF token bound to `session_id`.
    ///
    /// The claims carry a hash of the session id, never the raw value;
    /// verification must present the same session.
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` when the store bound is hit.
    pub fn issue_csrf_token(&self, session_id: &str) -> Result<String, TokenError> {
        let now = self.clock.now();
        let sid = TokenIdGenerator::hash(session_id);
        let record =
            self.store
                .issue(TokenPurpose::Csrf, &sid, self.config.csrf_token_ttl, now)?;

        let claims = TokenClaims::new(
            self.config.algorithm,
            sid.clone(),
            TokenPurpose::Csrf,
            record.id.clone(),
            now.timestamp(),
            self.config.csrf_token_ttl.as_secs() as i64,
        )
        .with_sid(sid);
        let token = self.codec.encode(&claims, &self.secrets)?;

        info!(jti = %record.id, "Issued CSRF token");
        Ok(token)
    }

    /// Issue a stateless signed bearer token for `subject`.
    ///
    /// # Errors
    ///
    /// `Malformed` if the claims cannot be serialized.
    pub fn issue_bearer_token(
        &self,
        subject: &str,
        attributes: BTreeMap<String, String>,
    ) -> Result<String, TokenError> {
        let now = self.clock.now();
        let jti = TokenIdGenerator::generate();

        let claims = TokenClaims::new(
            self.config.algorithm,
            subject,
            TokenPurpose::SessionBearer,
            jti.clone(),
            now.timestamp(),
            self.config.bearer_token_ttl.as_secs() as i64,
        )
        .with_attrs(attributes);
        let token = self.codec.encode(&claims, &self.secrets)?;

        info!(jti = %jti, "Issued bearer token");
        Ok(token)
    }

    /// Verify and consume a password-reset token. Single use: the first
    /// successful call consumes it, every later call fails.
    ///
    /// # Errors
    ///
    /// `InvalidSignature`, `AlgorithmMismatch`, `PurposeMismatch`,
    /// `Expired`, `NotFound` or `AlreadyConsumed`.
    pub fn verify_reset_token(&self, token: &str) -> Result<SubjectClaim, TokenError> {
        let now = self.clock.now();
        let claims = self.decode_for(token, TokenPurpose::PasswordReset, now)?;

        let record = self.store.consume(&claims.jti, now)?;
        Ok(SubjectClaim {
            subject: record.subject,
            attributes: BTreeMap::new(),
            issuer: self.config.issuer.clone(),
            verified_at: now,
        })
    }

    /// Verify a CSRF token against the session presenting it. Does not
    /// consume: a token may be checked several times within its TTL.
    ///
    /// # Errors
    ///
    /// `SessionMismatch` when the token was issued for another session,
    /// plus the usual decode and store failures.
    pub fn verify_csrf_token(&self, token: &str, session_id: &str) -> Result<(), TokenError> {
        let now = self.clock.now();
        let claims = self.decode_for(token, TokenPurpose::Csrf, now)?;

        let expected = TokenIdGenerator::hash(session_id);
        let presented = claims.sid.as_deref().ok_or(TokenError::SessionMismatch)?;
        if presented.len() != expected.len()
            || !bool::from(presented.as_bytes().ct_eq(expected.as_bytes()))
        {
            warn!(jti = %claims.jti, "CSRF token presented by a different session");
            return Err(TokenError::SessionMismatch);
        }

        self.store.check(&claims.jti, now)
    }

    /// Verify a bearer token. Stateless signature check; when the
    /// revocation list is enabled, revoked jtis are rejected as well.
    ///
    /// # Errors
    ///
    /// `InvalidSignature`, `AlgorithmMismatch`, `PurposeMismatch`,
    /// `Expired`, or `AlreadyConsumed` for revoked tokens.
    pub fn verify_bearer_token(&self, token: &str) -> Result<SubjectClaim, TokenError> {
        let now = self.clock.now();
        let claims = self.decode_for(token, TokenPurpose::SessionBearer, now)?;

        if self.config.bearer_revocation && self.store.is_revoked(&claims.jti, now) {
            return Err(TokenError::AlreadyConsumed);
        }

        Ok(SubjectClaim {
            subject: claims.sub,
            attributes: claims.attrs,
            issuer: self.config.issuer.clone(),
            verified_at: now,
        })
    }

    /// Verify an externally issued identity assertion, blocking replay
    /// of its id when replay tracking is enabled.
    ///
    /// # Errors
    ///
    /// Any [`AssertionError`]; `ReplayDetected` when the assertion id
    /// was already presented.
    pub fn verify_assertion(
        &self,
        envelope: &AssertionEnvelope,
    ) -> Result<SubjectClaim, AssertionError> {
        let now = self.clock.now();
        let parsed = self.parser.parse(envelope, &self.secrets, now)?;

        if self.config.replay_tracking {
            let retain_until = parsed
                .not_on_or_after
                .unwrap_or_else(|| now + chrono::Duration::hours(24));
            match self.store.claim_once(&parsed.id, retain_until, now) {
                Ok(()) => {}
                Err(TokenError::AlreadyConsumed) => {
                    warn!(assertion_id = %parsed.id, "Assertion replay detected");
                    return Err(AssertionError::ReplayDetected);
                }
                Err(_) => return Err(AssertionError::CapacityExceeded),
            }
        }

        Ok(SubjectClaim {
            subject: parsed.subject,
            attributes: parsed.attributes,
            issuer: parsed.issuer,
            verified_at: now,
        })
    }

    /// Force-revoke a previously issued token. Idempotent. The token's
    /// signature must verify; store-tracked tokens are marked revoked,
    /// bearer jtis go on the revocation list until their expiry.
    ///
    /// # Errors
    ///
    /// Decode failures, or `CapacityExceeded` for the revocation list.
    pub fn revoke_token(&self, token: &str) -> Result<(), TokenError> {
        let now = self.clock.now();
        let claims = self.codec.decode(token, &self.secrets)?;

        match claims.purpose {
            TokenPurpose::SessionBearer => {
                let expires_at = DateTime::from_timestamp(claims.exp, 0).unwrap_or(now);
                self.store
                    .add_to_revocation_list(&claims.jti, expires_at, now)
            }
            _ => {
                self.store.revoke(&claims.jti, now);
                Ok(())
            }
        }
    }

    /// Drop expired store entries. Intended to be driven periodically by
    /// the hosting process; safe to run concurrently with everything
    /// else.
    pub fn sweep_expired(&self) -> usize {
        self.store.sweep_expired(self.clock.now())
    }

    /// Number of live store entries (tracked tokens, revocations and
    /// replay marks).
    #[must_use]
    pub fn store_len(&self) -> usize {
        self.store.len()
    }

    /// Decode a wire token and run the purpose and expiry gates shared
    /// by every verification path.
    fn decode_for(
        &self,
        token: &str,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, TokenError> {
        let claims = self.codec.decode(token, &self.secrets)?;
        if claims.purpose != purpose {
            return Err(TokenError::PurposeMismatch);
        }
        if claims.is_expired_at(now.timestamp()) {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn test_secrets() -> SecretStore {
        SecretStore::new(b"0123456789abcdef0123456789abcdef".to_vec()).unwrap()
    }

    fn engine_at(ts: i64) -> (LifecycleEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(ts));
        let engine = LifecycleEngine::with_clock(Config::default(), test_secrets(), clock.clone());
        (engine, clock)
    }

    #[test]
    fn test_reset_token_round_trip() {
        let (engine, _) = engine_at(1_700_000_000);

        let token = engine.issue_reset_token("alice@example.com").unwrap();
        let claim = engine.verify_reset_token(&token).unwrap();

        assert_eq!(claim.subject, "alice@example.com");
        assert_eq!(claim.issuer, "token-lifecycle");
    }

    #[test]
    fn test_wrong_purpose_rejected() {
        let (engine, _) = engine_at(1_700_000_000);

        let csrf = engine.issue_csrf_token("session-1").unwrap();
        assert_eq!(
            engine.verify_reset_token(&csrf),
            Err(TokenError::PurposeMismatch)
        );

        let reset = engine.issue_reset_token("alice@example.com").unwrap();
        assert_eq!(
            engine.verify_csrf_token(&reset, "session-1"),
            Err(TokenError::PurposeMismatch)
        );
    }

    #[test]
    fn test_csrf_token_not_consumed_by_verification() {
        let (engine, _) = engine_at(1_700_000_000);

        let token = engine.issue_csrf_token("session-1").unwrap();
        engine.verify_csrf_token(&token, "session-1").unwrap();
        engine.verify_csrf_token(&token, "session-1").unwrap();
    }

    #[test]
    fn test_csrf_token_never_carries_raw_session_id() {
        let (engine, _) = engine_at(1_700_000_000);
        let token = engine.issue_csrf_token("session-secret-1").unwrap();
        assert!(!token.contains("session-secret-1"));
    }

    #[test]
    fn test_bearer_revocation_disabled_by_default() {
        let (engine, _) = engine_at(1_700_000_000);

        let token = engine
            .issue_bearer_token("alice@example.com", BTreeMap::new())
            .unwrap();
        engine.revoke_token(&token).unwrap();

        // Revocation list is not consulted unless enabled
        assert!(engine.verify_bearer_token(&token).is_ok());
    }

    #[test]
    fn test_bearer_revocation_when_enabled() {
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let engine = LifecycleEngine::with_clock(
            Config::default().with_bearer_revocation(true),
            test_secrets(),
            clock,
        );

        let token = engine
            .issue_bearer_token("alice@example.com", BTreeMap::new())
            .unwrap();
        assert!(engine.verify_bearer_token(&token).is_ok());

        engine.revoke_token(&token).unwrap();
        assert_eq!(
            engine.verify_bearer_token(&token),
            Err(TokenError::AlreadyConsumed)
        );
    }

    #[test]
    fn test_sweep_after_expiry() {
        let (engine, clock) = engine_at(1_700_000_000);

        engine.issue_reset_token("alice@example.com").unwrap();
        assert_eq!(engine.store_len(), 1);

        clock.advance(10_000);
        assert_eq!(engine.sweep_expired(), 1);
        assert_eq!(engine.store_len(), 0);
    }
}
