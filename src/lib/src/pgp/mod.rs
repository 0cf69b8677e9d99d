//! OpenPGP keys and detached signatures on top of `sequoia-openpgp`.
//!
//! Key ids, fingerprints and key references are kept as small value
//! types so the trust policy can order, hash and serialize them without
//! depending on OpenPGP internals.

use sequoia_openpgp as openpgp;

use openpgp::policy::StandardPolicy;

mod cert;
mod key;
mod signature;
mod verify;

pub use cert::*;
pub use key::*;
pub use openpgp::types::{PublicKeyAlgorithm, SignatureType};
pub use signature::*;
pub use verify::*;

pub(crate) use verify::canonical_text;

/// Self-signatures and subkey bindings are judged against this policy.
pub(crate) static POLICY: StandardPolicy<'static> = StandardPolicy::new();

/// Splits ASCII-armored text into its `label` blocks. Text outside the
/// blocks, such as key summaries, is skipped.
pub(crate) fn armored_blocks<'a>(text: &'a str, label: &str) -> Vec<&'a str> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");
    let mut blocks = vec![];
    let mut rest = text;
    while let Some(start) = rest.find(&begin) {
        let tail = &rest[start..];
        let len = tail.find(&end).map_or(tail.len(), |i| i + end.len());
        blocks.push(&tail[..len]);
        rest = &tail[len..];
    }
    blocks
}

/// Armored input is recognized by its first `-----BEGIN PGP` line.
pub(crate) fn as_armored(data: &[u8]) -> Option<&str> {
    std::str::from_utf8(data)
        .ok()
        .filter(|text| text.contains("-----BEGIN PGP "))
}

pub(crate) fn openpgp_error(e: anyhow::Error) -> crate::DVError {
    crate::DVError::MalformedPacket(e.to_string())
}
