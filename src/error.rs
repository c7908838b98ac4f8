use thiserror::Error;

/// Errors returned by token issuance, verification and consumption.
///
/// Variants are deliberately terse: no message carries key material,
/// decoded claims or store internals.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token not found")]
    NotFound,

    #[error("Token expired")]
    Expired,

    #[error("Token already consumed")]
    AlreadyConsumed,

    #[error("Token signature invalid")]
    InvalidSignature,

    #[error("Token algorithm does not match configuration")]
    AlgorithmMismatch,

    #[error("Token not bound to this session")]
    SessionMismatch,

    #[error("Token presented for the wrong purpose")]
    PurposeMismatch,

    #[error("Token store capacity exceeded")]
    CapacityExceeded,

    #[error("Token malformed")]
    Malformed,

    #[error("Token store unavailable")]
    StoreUnavailable,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TokenError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        TokenError::Config(msg.into())
    }
}

/// Errors returned by assertion parsing and verification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssertionError {
    #[error("Assertion document malformed")]
    MalformedDocument,

    #[error("Assertion not covered by a signature")]
    UnsignedAssertion,

    #[error("Assertion signature invalid")]
    SignatureInvalid,

    #[error("Assertion outside its validity window")]
    Expired,

    #[error("Assertion already presented")]
    ReplayDetected,

    #[error("Assertion issuer not trusted")]
    IssuerUntrusted,

    #[error("Replay tracking capacity exceeded")]
    CapacityExceeded,
}
