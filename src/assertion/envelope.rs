/// SAML 2.0 assertion namespace.
pub const SAML2_ASSERTION_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";

/// Raw assertion input: transport-decoded XML bytes plus the trust
/// expectations the caller requires the document to meet.
///
/// Envelopes are never persisted; one lives for a single verification
/// call.
#[derive(Debug, Clone)]
pub struct AssertionEnvelope {
    /// The XML document, after transport decoding (e.g. base64).
    pub document: Vec<u8>,
    /// Namespace the assertion element must be bound to.
    pub expected_namespace: String,
    /// Issuer the document must name; must also resolve to a trusted
    /// key in the secret store.
    pub expected_issuer: String,
}

impl AssertionEnvelope {
    /// Build an envelope with explicit trust expectations.
    pub fn new(
        document: Vec<u8>,
        expected_namespace: impl Into<String>,
        expected_issuer: impl Into<String>,
    ) -> Self {
        Self {
            document,
            expected_namespace: expected_namespace.into(),
            expected_issuer: expected_issuer.into(),
        }
    }

    /// Envelope expecting the standard SAML 2.0 assertion namespace.
    pub fn saml2(document: Vec<u8>, expected_issuer: impl Into<String>) -> Self {
        Self::new(document, SAML2_ASSERTION_NS, expected_issuer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saml2_envelope_defaults_namespace() {
        let envelope = AssertionEnvelope::saml2(b"<x/>".to_vec(), "https://idp.example.com");
        assert_eq!(envelope.expected_namespace, SAML2_ASSERTION_NS);
        assert_eq!(envelope.expected_issuer, "https://idp.example.com");
    }
}
