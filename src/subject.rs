use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The verified output of token verification or assertion parsing.
///
/// No identity is trusted until the engine has produced one of these;
/// raw decoded payloads are never handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectClaim {
    /// Identifier of the verified subject.
    pub subject: String,
    /// Attributes carried by the credential.
    pub attributes: BTreeMap<String, String>,
    /// Trust origin: the engine's own issuer for tokens, the external
    /// identity provider for assertions.
    pub issuer: String,
    /// When verification completed.
    pub verified_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_claim_serde_round_trip() {
        let mut attributes = BTreeMap::new();
        attributes.insert("email".to_string(), "alice@example.com".to_string());

        let claim = SubjectClaim {
            subject: "alice@example.com".to_string(),
            attributes,
            issuer: "token-lifecycle".to_string(),
            verified_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        };

        let json = serde_json::to_string(&claim).unwrap();
        let back: SubjectClaim = serde_json::from_str(&json).unwrap();
        assert_eq!(claim, back);
    }
}
