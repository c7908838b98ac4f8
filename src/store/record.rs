use crate::codec::claims::TokenPurpose;
use chrono::{DateTime, Utc};

/// States a tracked token moves through. Every transition out of
/// `Issued` is terminal; there is no way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// Live and not yet used.
    Issued,
    /// Used exactly once; permanently invalid.
    Consumed,
    /// Forcibly invalidated; permanently invalid.
    Revoked,
}

/// Authoritative record of a store-tracked token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    /// Unique token id (the wire `jti`).
    pub id: String,
    /// Purpose the token was minted for.
    pub purpose: TokenPurpose,
    /// Subject the token belongs to.
    pub subject: String,
    /// Mint time.
    pub issued_at: DateTime<Utc>,
    /// Expiry; always `issued_at + ttl`.
    pub expires_at: DateTime<Utc>,
    /// Current lifecycle state.
    pub state: TokenState,
    /// When the token left the `Issued` state, if it has.
    pub consumed_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    /// Create a live record.
    pub fn new(
        id: String,
        purpose: TokenPurpose,
        subject: String,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            purpose,
            subject,
            issued_at,
            expires_at,
            state: TokenState::Issued,
            consumed_at: None,
        }
    }

    /// Whether the record is expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub(crate) fn mark_consumed(&mut self, now: DateTime<Utc>) {
        self.state = TokenState::Consumed;
        self.consumed_at = Some(now);
    }

    pub(crate) fn mark_revoked(&mut self, now: DateTime<Utc>) {
        self.state = TokenState::Revoked;
        self.consumed_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_at(issued: i64, expires: i64) -> TokenRecord {
        TokenRecord::new(
            "id-1".to_string(),
            TokenPurpose::PasswordReset,
            "alice@example.com".to_string(),
            DateTime::from_timestamp(issued, 0).unwrap(),
            DateTime::from_timestamp(expires, 0).unwrap(),
        )
    }

    #[test]
    fn test_new_record_is_issued() {
        let record = record_at(1_000, 1_900);
        assert_eq!(record.state, TokenState::Issued);
        assert!(record.consumed_at.is_none());
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let record = record_at(1_000, 1_900);
        let just_before = DateTime::from_timestamp(1_899, 0).unwrap();
        let at_expiry = DateTime::from_timestamp(1_900, 0).unwrap();

        assert!(!record.is_expired_at(just_before));
        assert!(record.is_expired_at(at_expiry));
    }

    #[test]
    fn test_terminal_transitions() {
        let now = DateTime::from_timestamp(1_100, 0).unwrap();

        let mut record = record_at(1_000, 1_900);
        record.mark_consumed(now);
        assert_eq!(record.state, TokenState::Consumed);
        assert_eq!(record.consumed_at, Some(now));

        let mut record = record_at(1_000, 1_900);
        record.mark_revoked(now);
        assert_eq!(record.state, TokenState::Revoked);
    }
}
