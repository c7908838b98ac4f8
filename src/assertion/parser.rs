//! Hardened parsing of externally supplied identity assertions.
//!
//! Documents are read with a streaming parser: any DOCTYPE declaration is
//! rejected before a single field is extracted, so DTD processing and
//! entity expansion can never occur, and input is size-capped before
//! parsing starts. The subject is accepted only from the assertion block
//! the embedded signature actually covers.

use crate::assertion::envelope::AssertionEnvelope;
use crate::config::AssertionAlgorithm;
use crate::error::AssertionError;
use crate::secrets::SecretStore;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use ring::signature::UnparsedPublicKey;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::warn;

/// Maximum accepted document size, checked before parsing.
const MAX_DOCUMENT_SIZE: usize = 256 * 1024;

/// Maximum length of the assertion `ID` attribute.
const MAX_ASSERTION_ID_LENGTH: usize = 256;

/// Structurally validated, signature-verified assertion fields. Replay
/// tracking of the id is the caller's responsibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAssertion {
    /// The assertion's unique `ID`; replay-tracking key.
    pub id: String,
    /// Issuer named by the document and matched against the trust store.
    pub issuer: String,
    /// Subject identifier, taken from the signed assertion block only.
    pub subject: String,
    /// Attribute statements carried by the assertion.
    pub attributes: BTreeMap<String, String>,
    /// When the assertion was issued.
    pub issue_instant: DateTime<Utc>,
    /// Start of the validity window, if bounded.
    pub not_before: Option<DateTime<Utc>>,
    /// End of the validity window, if bounded.
    pub not_on_or_after: Option<DateTime<Utc>>,
}

/// Signature block fields extracted from the document.
struct SignatureInfo {
    reference_uri: String,
    digest_value: String,
    signature_value: String,
    method_uri: Option<String>,
}

/// Everything the streaming scan pulls out of the document.
#[derive(Default)]
struct DocumentScan {
    path: Vec<String>,
    root_done: bool,
    id: Option<String>,
    issue_instant: Option<String>,
    issuer: Option<String>,
    subject: Option<String>,
    attributes: BTreeMap<String, String>,
    not_before: Option<String>,
    not_on_or_after: Option<String>,
    current_attr_name: Option<String>,
    signature_seen: bool,
    reference_uri: Option<String>,
    digest_value: Option<String>,
    signature_value: Option<String>,
    method_uri: Option<String>,
}

/// Parses and cryptographically verifies XML identity assertions.
pub struct AssertionParser {
    algorithm: AssertionAlgorithm,
    clock_skew_secs: i64,
}

impl AssertionParser {
    /// Create a parser pinned to the given verification algorithm.
    #[must_use]
    pub fn new(algorithm: AssertionAlgorithm, clock_skew: Duration) -> Self {
        Self {
            algorithm,
            clock_skew_secs: clock_skew.as_secs() as i64,
        }
    }

    /// Parse, structurally validate and verify an assertion.
    ///
    /// # Errors
    ///
    /// `MalformedDocument`, `UnsignedAssertion`, `SignatureInvalid`,
    /// `IssuerUntrusted` or `Expired`; see the crate error taxonomy.
    pub fn parse(
        &self,
        envelope: &AssertionEnvelope,
        secrets: &SecretStore,
        now: DateTime<Utc>,
    ) -> Result<ParsedAssertion, AssertionError> {
        if envelope.document.len() > MAX_DOCUMENT_SIZE {
            return Err(AssertionError::MalformedDocument);
        }
        let xml = std::str::from_utf8(&envelope.document)
            .map_err(|_| AssertionError::MalformedDocument)?;

        let (parsed, signature) = scan_document(xml, &envelope.expected_namespace)?;

        // Trust gate before any cryptography: the named issuer must be
        // the one the caller expects and must have a registered key.
        if parsed.issuer != envelope.expected_issuer {
            warn!(issuer = %parsed.issuer, "Assertion from unexpected issuer");
            return Err(AssertionError::IssuerUntrusted);
        }
        let issuer_key = secrets
            .issuer_key(&parsed.issuer)
            .ok_or(AssertionError::IssuerUntrusted)?;

        // The signature must exist and must cover the assertion the
        // subject was read from, otherwise the subject is unsigned data.
        let signature = signature.ok_or(AssertionError::UnsignedAssertion)?;
        if signature.reference_uri != format!("#{}", parsed.id) {
            return Err(AssertionError::UnsignedAssertion);
        }
        if let Some(uri) = &signature.method_uri {
            if uri != self.algorithm.method_uri() {
                return Err(AssertionError::SignatureInvalid);
            }
        }

        let signed = signed_bytes(&envelope.document)
            .ok_or(AssertionError::MalformedDocument)?;

        let digest = Sha256::digest(&signed);
        let presented_digest = STANDARD
            .decode(clean_base64(&signature.digest_value))
            .map_err(|_| AssertionError::SignatureInvalid)?;
        if presented_digest.len() != digest.len()
            || !bool::from(digest.as_slice().ct_eq(&presented_digest))
        {
            return Err(AssertionError::SignatureInvalid);
        }

        let signature_bytes = STANDARD
            .decode(clean_base64(&signature.signature_value))
            .map_err(|_| AssertionError::SignatureInvalid)?;
        UnparsedPublicKey::new(self.algorithm.verification(), issuer_key)
            .verify(&signed, &signature_bytes)
            .map_err(|_| AssertionError::SignatureInvalid)?;

        // Validity window, against the injected clock only.
        let skew = chrono::Duration::seconds(self.clock_skew_secs);
        if let Some(not_before) = parsed.not_before {
            if now + skew < not_before {
                return Err(AssertionError::Expired);
            }
        }
        if let Some(not_on_or_after) = parsed.not_on_or_after {
            if now - skew >= not_on_or_after {
                return Err(AssertionError::Expired);
            }
        }

        Ok(parsed)
    }
}

/// Streaming scan of the document. Returns the extracted assertion
/// fields and the signature block, if any.
fn scan_document(
    xml: &str,
    expected_namespace: &str,
) -> Result<(ParsedAssertion, Option<SignatureInfo>), AssertionError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut scan = DocumentScan::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                scan.on_element(&e, expected_namespace)?;
                let local = local_name(&e)?;
                scan.path.push(local);
            }
            Ok(Event::Empty(e)) => {
                scan.on_element(&e, expected_namespace)?;
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|_| AssertionError::MalformedDocument)?
                    .into_owned();
                scan.on_text(text)?;
            }
            Ok(Event::CData(t)) => {
                let text = std::str::from_utf8(&t)
                    .map_err(|_| AssertionError::MalformedDocument)?
                    .to_string();
                scan.on_text(text)?;
            }
            Ok(Event::End(_)) => {
                scan.path.pop();
                if scan.path.is_empty() {
                    scan.root_done = true;
                }
            }
            // DTDs mean entity definitions; reject before anything is
            // extracted. External entities are never resolved either way.
            Ok(Event::DocType(_)) => return Err(AssertionError::MalformedDocument),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => return Err(AssertionError::MalformedDocument),
        }
    }

    scan.finish()
}

fn local_name(e: &BytesStart<'_>) -> Result<String, AssertionError> {
    String::from_utf8(e.local_name().as_ref().to_vec())
        .map_err(|_| AssertionError::MalformedDocument)
}

fn attribute_value(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes().flatten().find_map(|attr| {
        if attr.key.as_ref() == name.as_bytes() {
            attr.unescape_value().ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

impl DocumentScan {
    fn on_element(
        &mut self,
        e: &BytesStart<'_>,
        expected_namespace: &str,
    ) -> Result<(), AssertionError> {
        let local = local_name(e)?;

        if self.path.is_empty() {
            return self.on_root(e, &local, expected_namespace);
        }

        let in_signature = self.path.len() >= 2 && self.path[1] == "Signature";
        match (self.path.as_slice(), local.as_str()) {
            ([root], "Conditions") if root == "Assertion" => {
                if self.not_before.is_some() || self.not_on_or_after.is_some() {
                    return Err(AssertionError::MalformedDocument);
                }
                self.not_before = attribute_value(e, "NotBefore");
                self.not_on_or_after = attribute_value(e, "NotOnOrAfter");
            }
            ([root], "Signature") if root == "Assertion" => {
                if self.signature_seen {
                    return Err(AssertionError::MalformedDocument);
                }
                self.signature_seen = true;
            }
            ([root, stmt], "Attribute") if root == "Assertion" && stmt == "AttributeStatement" => {
                self.current_attr_name = Some(
                    attribute_value(e, "Name").ok_or(AssertionError::MalformedDocument)?,
                );
            }
            _ if in_signature && local == "Reference" => {
                if self.reference_uri.is_some() {
                    return Err(AssertionError::MalformedDocument);
                }
                self.reference_uri =
                    Some(attribute_value(e, "URI").ok_or(AssertionError::MalformedDocument)?);
            }
            _ if in_signature && local == "SignatureMethod" => {
                self.method_uri = attribute_value(e, "Algorithm");
            }
            _ => {}
        }
        Ok(())
    }

    fn on_root(
        &mut self,
        e: &BytesStart<'_>,
        local: &str,
        expected_namespace: &str,
    ) -> Result<(), AssertionError> {
        // A second top-level element, or trailing content after the
        // assertion closed, is an ambiguity attack surface. Reject.
        if self.root_done || local != "Assertion" {
            return Err(AssertionError::MalformedDocument);
        }

        // The root must declare the expected namespace for its own prefix.
        let qname = e.name();
        let declaration = match qname.as_ref().iter().position(|&b| b == b':') {
            Some(colon) => {
                let mut key = b"xmlns:".to_vec();
                key.extend_from_slice(&qname.as_ref()[..colon]);
                key
            }
            None => b"xmlns".to_vec(),
        };
        let declared = e.attributes().flatten().find_map(|attr| {
            if attr.key.as_ref() == declaration.as_slice() {
                attr.unescape_value().ok().map(|v| v.into_owned())
            } else {
                None
            }
        });
        if declared.as_deref() != Some(expected_namespace) {
            return Err(AssertionError::MalformedDocument);
        }

        let id = attribute_value(e, "ID").ok_or(AssertionError::MalformedDocument)?;
        if id.is_empty() || id.len() > MAX_ASSERTION_ID_LENGTH {
            return Err(AssertionError::MalformedDocument);
        }
        self.id = Some(id);
        self.issue_instant =
            Some(attribute_value(e, "IssueInstant").ok_or(AssertionError::MalformedDocument)?);
        Ok(())
    }

    fn on_text(&mut self, text: String) -> Result<(), AssertionError> {
        let in_signature = self.path.len() >= 2 && self.path[1] == "Signature";
        match (self.path.as_slice(), in_signature) {
            ([root, elem], false) if root == "Assertion" && elem == "Issuer" => {
                set_once(&mut self.issuer, text)?;
            }
            ([root, subj, elem], false)
                if root == "Assertion" && subj == "Subject" && elem == "NameID" =>
            {
                set_once(&mut self.subject, text)?;
            }
            ([root, stmt, attr, elem], false)
                if root == "Assertion"
                    && stmt == "AttributeStatement"
                    && attr == "Attribute"
                    && elem == "AttributeValue" =>
            {
                let name = self
                    .current_attr_name
                    .clone()
                    .ok_or(AssertionError::MalformedDocument)?;
                self.attributes.insert(name, text);
            }
            (path, true) if path.last().is_some_and(|e| e == "DigestValue") => {
                set_once(&mut self.digest_value, text)?;
            }
            (path, true) if path.last().is_some_and(|e| e == "SignatureValue") => {
                set_once(&mut self.signature_value, text)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn finish(self) -> Result<(ParsedAssertion, Option<SignatureInfo>), AssertionError> {
        let id = self.id.ok_or(AssertionError::MalformedDocument)?;
        let issuer = self.issuer.ok_or(AssertionError::MalformedDocument)?;
        let subject = self.subject.ok_or(AssertionError::MalformedDocument)?;
        let issue_instant = parse_instant(
            &self.issue_instant.ok_or(AssertionError::MalformedDocument)?,
        )?;
        let not_before = self.not_before.as_deref().map(parse_instant).transpose()?;
        let not_on_or_after = self
            .not_on_or_after
            .as_deref()
            .map(parse_instant)
            .transpose()?;

        let signature = if self.signature_seen {
            Some(SignatureInfo {
                reference_uri: self.reference_uri.ok_or(AssertionError::MalformedDocument)?,
                digest_value: self.digest_value.ok_or(AssertionError::MalformedDocument)?,
                signature_value: self
                    .signature_value
                    .ok_or(AssertionError::MalformedDocument)?,
                method_uri: self.method_uri,
            })
        } else {
            None
        };

        Ok((
            ParsedAssertion {
                id,
                issuer,
                subject,
                attributes: self.attributes,
                issue_instant,
                not_before,
                not_on_or_after,
            },
            signature,
        ))
    }
}

fn set_once(slot: &mut Option<String>, value: String) -> Result<(), AssertionError> {
    if slot.is_some() {
        return Err(AssertionError::MalformedDocument);
    }
    *slot = Some(value);
    Ok(())
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>, AssertionError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| AssertionError::MalformedDocument)
}

fn clean_base64(value: &str) -> String {
    value.replace(['\n', '\r', ' ', '\t'], "")
}

/// The bytes the signature covers: the document with the `Signature`
/// element's byte range excised (enveloped-signature transform, applied
/// at the byte level).
fn signed_bytes(doc: &[u8]) -> Option<Vec<u8>> {
    let span = signature_span(doc)?;
    let mut out = Vec::with_capacity(doc.len() - span.len());
    out.extend_from_slice(&doc[..span.start]);
    out.extend_from_slice(&doc[span.end..]);
    Some(out)
}

/// Byte range of the first `Signature` element, including its tags.
fn signature_span(doc: &[u8]) -> Option<std::ops::Range<usize>> {
    let mut i = 0;
    while i < doc.len() {
        if doc[i] == b'<' {
            if let Some(name_len) = signature_name_len(&doc[i + 1..]) {
                let name_end = i + 1 + name_len;
                let tag_close = find(doc, b">", name_end)?;
                if doc.get(tag_close.wrapping_sub(1)) == Some(&b'/') {
                    // Self-closing signature element
                    return Some(i..tag_close + 1);
                }
                let qname = &doc[i + 1..name_end];
                let mut closing = Vec::with_capacity(qname.len() + 3);
                closing.extend_from_slice(b"</");
                closing.extend_from_slice(qname);
                closing.push(b'>');
                let close_start = find(doc, &closing, tag_close)?;
                return Some(i..close_start + closing.len());
            }
        }
        i += 1;
    }
    None
}

/// Length of a `Signature` qualified name (with optional prefix) at the
/// start of `rest`, if one is there. `SignatureValue` and friends do not
/// match: the name must end at a tag delimiter.
fn signature_name_len(rest: &[u8]) -> Option<usize> {
    const LOCAL: &[u8] = b"Signature";

    let candidate = if rest.starts_with(LOCAL) {
        LOCAL.len()
    } else {
        let colon = rest.iter().position(|&b| b == b':')?;
        if colon == 0 || !rest[..colon].iter().all(|b| b.is_ascii_alphanumeric()) {
            return None;
        }
        if !rest[colon + 1..].starts_with(LOCAL) {
            return None;
        }
        colon + 1 + LOCAL.len()
    };

    match rest.get(candidate) {
        Some(b' ' | b'\t' | b'\r' | b'\n' | b'>' | b'/') => Some(candidate),
        _ => None,
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}
