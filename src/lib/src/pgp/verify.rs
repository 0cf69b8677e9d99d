use std::borrow::Cow;
use std::fmt;

use sequoia_openpgp as openpgp;
use serde::Serialize;

use super::cert::KeyPacket;
use super::signature::*;
use super::{PublicKeyAlgorithm, SignatureType};

/// Why a signature did not verify.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidReason {
    /// The signature or key is structurally unusable.
    Malformed,
    /// The signature does not match the data.
    Mismatch,
    /// The algorithm combination is not implemented.
    Unsupported,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InvalidReason::Malformed => "malformed",
            InvalidReason::Mismatch => "mismatch",
            InvalidReason::Unsupported => "unsupported",
        })
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SignatureCheck {
    Valid,
    Invalid(InvalidReason),
}

impl SignatureCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, SignatureCheck::Valid)
    }
}

/// Line endings normalized to CRLF, as hashed by text signatures.
pub(crate) fn canonical_text(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 32);
    let mut i = 0;
    while i < data.len() {
        match data[i] {
            b'\r' => {
                out.extend_from_slice(b"\r\n");
                if data.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
            }
            b'\n' => out.extend_from_slice(b"\r\n"),
            b => out.push(b),
        }
        i += 1;
    }
    out
}

fn is_document(sig_type: SignatureType) -> bool {
    matches!(sig_type, SignatureType::Binary | SignatureType::Text)
}

/// RSA keys may be flagged sign-only or encrypt-and-sign; both sign alike.
fn same_family(sig: PublicKeyAlgorithm, key: PublicKeyAlgorithm) -> bool {
    let family = |algorithm: PublicKeyAlgorithm| match u8::from(algorithm) {
        1 | 3 => 1,
        id => id,
    };
    family(sig) == family(key)
}

fn invalid_reason(error: &anyhow::Error) -> InvalidReason {
    match error.downcast_ref::<openpgp::Error>() {
        Some(
            openpgp::Error::UnsupportedHashAlgorithm(..)
            | openpgp::Error::UnsupportedPublicKeyAlgorithm(..)
            | openpgp::Error::UnsupportedEllipticCurve(..)
            | openpgp::Error::UnsupportedSignatureType(..)
            | openpgp::Error::PolicyViolation(..),
        ) => InvalidReason::Unsupported,
        Some(
            openpgp::Error::MalformedMPI(..)
            | openpgp::Error::MalformedPacket(..)
            | openpgp::Error::InvalidArgument(..),
        ) => InvalidReason::Malformed,
        _ => InvalidReason::Mismatch,
    }
}

/// Checks a detached document signature against `key`.
///
/// Certifications and other non-document signatures, and signatures made
/// with a different public-key algorithm than the key's, are `Malformed`.
/// A well-formed signature that does not cover `data` is `Mismatch`.
pub fn verify_signature(data: &[u8], signature: &Signature, key: &KeyPacket) -> SignatureCheck {
    let mut packet = signature.packet().clone();
    if !is_document(packet.typ()) || !same_family(packet.pk_algo(), key.algorithm()) {
        return SignatureCheck::Invalid(InvalidReason::Malformed);
    }
    let content = match packet.typ() {
        SignatureType::Text => Cow::Owned(canonical_text(data)),
        _ => Cow::Borrowed(data),
    };
    match packet.verify_message(key.material(), content.as_ref()) {
        Ok(()) => SignatureCheck::Valid,
        Err(e) => {
            log::debug!("Signature by {} does not verify: {e}", key.key_id());
            SignatureCheck::Invalid(invalid_reason(&e))
        }
    }
}
