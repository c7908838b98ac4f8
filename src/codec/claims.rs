use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What a token is allowed to be used for.
///
/// Verification checks the purpose before anything else touches the
/// store, so a token minted for one flow can never be replayed into
/// another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    /// Single-use password reset credential.
    PasswordReset,
    /// Session-bound cross-site request forgery token.
    Csrf,
    /// Signed bearer credential presented on each request.
    SessionBearer,
}

impl TokenPurpose {
    /// Wire name of the purpose.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PasswordReset => "password_reset",
            Self::Csrf => "csrf",
            Self::SessionBearer => "session_bearer",
        }
    }

    /// Single-use purposes are consumed in the store on first successful
    /// verification.
    #[must_use]
    pub const fn is_single_use(&self) -> bool {
        matches!(self, Self::PasswordReset)
    }
}

/// Signed claim set carried by every wire token.
///
/// The shape is fixed and unknown fields are rejected at decode time, so
/// a presented token can never smuggle structure the engine does not
/// know about. Attributes use a `BTreeMap` so the canonical encoding has
/// stable ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenClaims {
    /// Algorithm the issuer claims to have signed with. Checked against
    /// pinned configuration after signature verification; never honored
    /// on its own.
    pub alg: String,
    /// Subject the token was minted for.
    pub sub: String,
    /// Purpose the token is scoped to.
    pub purpose: TokenPurpose,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds; `iat + ttl` at mint time.
    pub exp: i64,
    /// Unique token id; store key for single-use tracking.
    pub jti: String,
    /// Hash of the bound session id, CSRF tokens only. Never the raw
    /// session id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// Subject attributes, bearer tokens only.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
}

impl TokenClaims {
    /// Build a claim set expiring `ttl_seconds` after `issued_at`.
    pub fn new(
        algorithm: crate::config::TokenAlgorithm,
        subject: impl Into<String>,
        purpose: TokenPurpose,
        jti: impl Into<String>,
        issued_at: i64,
        ttl_seconds: i64,
    ) -> Self {
        Self {
            alg: algorithm.as_str().to_string(),
            sub: subject.into(),
            purpose,
            iat: issued_at,
            exp: issued_at + ttl_seconds,
            jti: jti.into(),
            sid: None,
            attrs: BTreeMap::new(),
        }
    }

    /// Bind the token to a session id hash.
    #[must_use]
    pub fn with_sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    /// Attach subject attributes.
    #[must_use]
    pub fn with_attrs(mut self, attrs: BTreeMap<String, String>) -> Self {
        self.attrs = attrs;
        self
    }

    /// Whether the token is expired at `timestamp` (unix seconds).
    #[must_use]
    pub fn is_expired_at(&self, timestamp: i64) -> bool {
        timestamp >= self.exp
    }
}
