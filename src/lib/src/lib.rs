//! Integrity and provenance verification of downloaded build dependencies.
//!
//! Artifacts are checked against a declarative trust policy
//! (`verification-metadata.xml`): detached OpenPGP signatures are
//! verified against trusted keys, and recorded checksums are compared
//! against the artifact content. In generate mode the policy is
//! rewritten to record what was observed.

#![forbid(unsafe_code)]

mod error;

/// Content digests (MD5, SHA-1, SHA-256, SHA-512)
pub mod checksum;

/// Detached OpenPGP signature verification
///
/// Key ids, certificates restricted to properly bound subkeys, and
/// signature checks, on top of `sequoia-openpgp`.
pub mod pgp;

/// Deduplicated, sorted keyrings and their canonical export
pub mod keyring;

/// Key lookup against HKP key servers
pub mod keyserver;

/// The trust policy and its XML document
pub mod policy;

/// Per-artifact verification and metadata generation
pub mod verifier;

/// Staged file replacement with rollback on a failed commit
pub mod atomic_file;

#[cfg(test)]
mod test_support;

pub use error::*;

pub mod reexports {
    pub use {log, regex, sequoia_openpgp, serde_json, thiserror};
}
