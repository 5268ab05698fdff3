//! Detached signature files and Ed25519 verification.
//!
//! A signature file is a small YAML document naming the VLNV it signs and
//! carrying one or more Ed25519 signatures over the raw descriptor bytes:
//!
//! ```yaml
//! coresig:
//!   name: acme:lib1:foo:1.0.0
//!   signatures:
//!     - signer: alice
//!       public_key: <64 hex chars>
//!       signature: <128 hex chars>
//! ```
//!
//! Signature presence is optional everywhere in the catalog; an absent or
//! unverifiable-for-lack-of-trust signature is the non-blocking `Unverified`
//! state. A signature from a *trusted* key that fails to verify is `Invalid`.

use crate::error::{ErrorKind, Issue, Issues, Result};
use crate::vlnv::Vlnv;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::instrument;

/// Outcome of verifying a descriptor/signature pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// At least one trusted key's signature verified over the descriptor.
    Verified,
    /// No trusted key material applies; the file is structurally fine but
    /// its authenticity is unknown.
    Unverified,
    /// A trusted key is named by the file but its signature does not verify.
    Invalid,
}

/// One signature entry from a signature file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SignatureEntry {
    pub signer: String,
    /// Hex-encoded 32-byte Ed25519 public key.
    pub public_key: String,
    /// Hex-encoded 64-byte Ed25519 signature over the raw descriptor bytes.
    pub signature: String,
}

/// A parsed signature file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureFile {
    /// The VLNV the signature claims to cover. The pipeline checks this
    /// against the descriptor's own VLNV.
    pub vlnv: Vlnv,
    pub entries: Vec<SignatureEntry>,
}

#[derive(Deserialize)]
struct SignatureDocument {
    coresig: SignatureBody,
}

#[derive(Deserialize)]
struct SignatureBody {
    name: String,
    #[serde(default)]
    signatures: Vec<SignatureEntry>,
}

/// Parse a signature file from raw text.
pub fn parse_signature(text: &str) -> Result<SignatureFile> {
    let document: SignatureDocument = serde_yaml::from_str(text).map_err(|err| {
        exn::Exn::from(ErrorKind::Invalid(Issue::signature("", format!("malformed signature file: {err}")).into()))
    })?;
    let vlnv = Vlnv::from_str(&document.coresig.name).map_err(|issues| {
        let issues = issues
            .into_iter()
            .map(|issue| Issue::signature("coresig::name", issue.message))
            .collect::<Vec<_>>();
        exn::Exn::from(ErrorKind::Invalid(Issues(issues)))
    })?;
    Ok(SignatureFile { vlnv, entries: document.coresig.signatures })
}

/// Parse a signature file from raw bytes.
pub fn parse_signature_bytes(bytes: &[u8]) -> Result<SignatureFile> {
    let text = std::str::from_utf8(bytes).map_err(|_| exn::Exn::from(ErrorKind::Encoding))?;
    parse_signature(text)
}

/// The set of Ed25519 public keys the catalog trusts.
///
/// Keys are configured as hex strings; an empty store means signature
/// verification degrades to the `Unverified` state for every file.
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    /// Lowercased hex public key -> verifying key.
    keys: HashMap<String, VerifyingKey>,
}

impl TrustStore {
    /// Build a trust store from hex-encoded public keys.
    ///
    /// Malformed keys are skipped with a warning rather than poisoning the
    /// whole store; a typo in one configured key should not disable the rest.
    pub fn from_hex_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut map = HashMap::new();
        for key in keys {
            let hex_key = key.as_ref().to_lowercase();
            match decode_verifying_key(&hex_key) {
                Some(verifying_key) => {
                    map.insert(hex_key, verifying_key);
                },
                None => tracing::warn!(key = %hex_key, "skipping malformed trusted key"),
            }
        }
        Self { keys: map }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    fn get(&self, hex_key: &str) -> Option<&VerifyingKey> {
        self.keys.get(&hex_key.to_lowercase())
    }
}

fn decode_verifying_key(hex_key: &str) -> Option<VerifyingKey> {
    let bytes: [u8; 32] = hex::decode(hex_key).ok()?.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

fn decode_signature(hex_signature: &str) -> Option<Signature> {
    let bytes: [u8; 64] = hex::decode(hex_signature).ok()?.try_into().ok()?;
    Some(Signature::from_bytes(&bytes))
}

/// Verify a signature file against the raw descriptor bytes.
///
/// Only entries whose public key appears in the trust store count; entries
/// from unknown keys are ignored. With no applicable entries the result is
/// [`Unverified`](Verification::Unverified), never an error.
#[instrument(skip_all, fields(vlnv = %signature.vlnv, entries = signature.entries.len()))]
pub fn verify(descriptor: &[u8], signature: &SignatureFile, trust: &TrustStore) -> Verification {
    if signature.entries.is_empty() || trust.is_empty() {
        return Verification::Unverified;
    }
    let mut trusted_entries = 0usize;
    for entry in &signature.entries {
        let Some(verifying_key) = trust.get(&entry.public_key) else {
            continue;
        };
        trusted_entries += 1;
        let Some(decoded) = decode_signature(&entry.signature) else {
            tracing::warn!(signer = %entry.signer, "trusted entry carries a malformed signature");
            continue;
        };
        if verifying_key.verify(descriptor, &decoded).is_ok() {
            return Verification::Verified;
        }
    }
    match trusted_entries {
        0 => Verification::Unverified,
        _ => Verification::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    const DESCRIPTOR: &[u8] = b"CAPI=2:\nname: acme:lib1:foo:1.0.0\n";

    fn keypair() -> (SigningKey, String) {
        // Deterministic test key; no OS randomness needed for verification
        // tests.
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let hex_public = hex::encode(signing_key.verifying_key().to_bytes());
        (signing_key, hex_public)
    }

    fn signature_file(entries: Vec<SignatureEntry>) -> SignatureFile {
        SignatureFile {
            vlnv: "acme:lib1:foo:1.0.0".parse().unwrap(),
            entries,
        }
    }

    fn signed_entry(signing_key: &SigningKey, hex_public: &str, message: &[u8]) -> SignatureEntry {
        SignatureEntry {
            signer: "alice".to_string(),
            public_key: hex_public.to_string(),
            signature: hex::encode(signing_key.sign(message).to_bytes()),
        }
    }

    #[test]
    fn test_parse_signature_file() {
        let text = concat!(
            "coresig:\n",
            "  name: acme:lib1:foo:1.0.0\n",
            "  signatures:\n",
            "    - signer: alice\n",
            "      public_key: aa\n",
            "      signature: bb\n",
        );
        let parsed = parse_signature(text).unwrap();
        assert_eq!(parsed.vlnv.to_string(), "acme:lib1:foo:1.0.0");
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].signer, "alice");
    }

    #[test]
    fn test_parse_rejects_bad_vlnv() {
        let text = "coresig:\n  name: nope\n  signatures: []\n";
        assert!(parse_signature(text).is_err());
    }

    #[test]
    fn test_parse_rejects_non_signature_yaml() {
        assert!(parse_signature("just: yaml\n").is_err());
    }

    #[test]
    fn test_verified() {
        let (signing_key, hex_public) = keypair();
        let file = signature_file(vec![signed_entry(&signing_key, &hex_public, DESCRIPTOR)]);
        let trust = TrustStore::from_hex_keys([hex_public]);
        assert_eq!(verify(DESCRIPTOR, &file, &trust), Verification::Verified);
    }

    #[test]
    fn test_unverified_without_trust_material() {
        let (signing_key, hex_public) = keypair();
        let file = signature_file(vec![signed_entry(&signing_key, &hex_public, DESCRIPTOR)]);
        assert_eq!(verify(DESCRIPTOR, &file, &TrustStore::default()), Verification::Unverified);
    }

    #[test]
    fn test_unverified_when_signer_unknown() {
        let (signing_key, hex_public) = keypair();
        let file = signature_file(vec![signed_entry(&signing_key, &hex_public, DESCRIPTOR)]);
        // Trust store knows a different key.
        let other = SigningKey::from_bytes(&[9u8; 32]);
        let trust = TrustStore::from_hex_keys([hex::encode(other.verifying_key().to_bytes())]);
        assert_eq!(verify(DESCRIPTOR, &file, &trust), Verification::Unverified);
    }

    #[test]
    fn test_invalid_when_trusted_signature_fails() {
        let (signing_key, hex_public) = keypair();
        // Signature over DIFFERENT content than what is being verified.
        let file = signature_file(vec![signed_entry(&signing_key, &hex_public, b"tampered content")]);
        let trust = TrustStore::from_hex_keys([hex_public]);
        assert_eq!(verify(DESCRIPTOR, &file, &trust), Verification::Invalid);
    }

    #[test]
    fn test_unverified_when_no_entries() {
        let (_, hex_public) = keypair();
        let file = signature_file(vec![]);
        let trust = TrustStore::from_hex_keys([hex_public]);
        assert_eq!(verify(DESCRIPTOR, &file, &trust), Verification::Unverified);
    }

    #[test]
    fn test_malformed_trusted_key_skipped() {
        let trust = TrustStore::from_hex_keys(["not-hex"]);
        assert!(trust.is_empty());
    }
}
