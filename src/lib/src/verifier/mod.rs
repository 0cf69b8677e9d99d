//! Artifact verification against a trust policy.
//!
//! Every artifact goes through the same state machine in both modes:
//! signatures first (when enabled and present), then recorded checksums.
//! Verify mode fails on any unresolved problem. Generate mode downgrades
//! problems to warnings and records what it observed as policy updates.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::checksum::ChecksumKind;
use crate::pgp::{InvalidReason, KeyId, KeyRef, PublicKey};
use crate::policy::{ArtifactRef, Checksum, IgnoredKey};

mod engine;
mod generate;
mod report;
mod workflow;

pub use engine::*;
pub use generate::*;
pub use report::*;
pub use workflow::*;

pub const REASON_KEY_NOT_DOWNLOADED: &str = "Key couldn't be downloaded from any key server";
pub const REASON_PGP_FAILED: &str = "PGP verification failed";
pub const CHECKSUM_REASON_UNSIGNED: &str = "Artifact is not signed";
pub const CHECKSUM_REASON_KEY_MISSING: &str = "A key couldn't be downloaded";
pub const CHECKSUM_REASON_PGP_FAILED: &str = "PGP signature verification failed!";
pub const CHECKSUM_REASON_KEY_IGNORED: &str = "Signature key is ignored";
pub const GENERATED_ORIGIN: &str = "Generated by depverify";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Verify,
    Generate,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Verify => f.write_str("verify"),
            Mode::Generate => f.write_str("generate"),
        }
    }
}

/// Runtime settings that are not part of the persisted policy.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub mode: Mode,

    /// Write the keys used during the run next to the metadata file.
    pub export_keys: bool,

    /// Worker threads for artifact verification and key lookups.
    pub workers: usize,

    pub key_server_timeout: Duration,

    /// Never contact key servers.
    pub offline: bool,

    /// Algorithms recorded for new checksums in generate mode.
    pub generated_checksums: Vec<ChecksumKind>,

    /// Turn on `verify-signatures` in the generated policy.
    pub enable_signature_verification: bool,

    /// Keyrings consulted before key servers, besides the exported one.
    pub keyrings: Vec<PathBuf>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self::verify()
    }
}

impl VerifierConfig {
    pub fn verify() -> Self {
        Self {
            mode: Mode::Verify,
            export_keys: false,
            workers: 4,
            key_server_timeout: Duration::from_secs(30),
            offline: false,
            generated_checksums: vec![ChecksumKind::Sha256],
            enable_signature_verification: false,
            keyrings: vec![],
        }
    }

    pub fn generate() -> Self {
        Self {
            mode: Mode::Generate,
            ..Self::verify()
        }
    }

    pub fn with_export_keys(mut self, export_keys: bool) -> Self {
        self.export_keys = export_keys;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_key_server_timeout(mut self, timeout: Duration) -> Self {
        self.key_server_timeout = timeout;
        self
    }

    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn with_generated_checksums(mut self, kinds: Vec<ChecksumKind>) -> Self {
        let mut kinds = kinds;
        kinds.sort();
        kinds.dedup();
        self.generated_checksums = kinds;
        self
    }

    pub fn with_signature_verification(mut self, enabled: bool) -> Self {
        self.enable_signature_verification = enabled;
        self
    }

    pub fn with_keyring(mut self, path: impl Into<PathBuf>) -> Self {
        self.keyrings.push(path.into());
        self
    }
}

/// Cooperative cancellation shared between the caller and the workers.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The shared flag, for signal handlers that set it directly.
    pub fn flag(&self) -> Arc<AtomicBool> {
        self.0.clone()
    }
}

/// A resolved artifact with its content and optional detached signature.
#[derive(Debug, Clone)]
pub struct ArtifactInput {
    pub artifact: ArtifactRef,
    pub bytes: Vec<u8>,
    pub signature: Option<Vec<u8>>,
}

impl ArtifactInput {
    pub fn new(artifact: ArtifactRef, bytes: Vec<u8>) -> Self {
        ArtifactInput {
            artifact,
            bytes,
            signature: None,
        }
    }

    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = Some(signature);
        self
    }
}

/// The single result of checking one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    SignatureValid {
        key: KeyId,
    },
    SignatureValidUntrusted {
        key: KeyId,
    },
    SignatureInvalid {
        key: Option<KeyId>,
        reason: InvalidReason,
    },
    KeyUnresolved {
        key: KeyId,
        reason: String,
    },
    NoSignature,
    ChecksumMatch {
        algorithm: ChecksumKind,
        established: bool,
    },
    ChecksumMismatch {
        algorithm: ChecksumKind,
        expected: String,
        actual: String,
    },
}

impl Verdict {
    /// Whether the verdict blocks the build. Generate mode never fails.
    pub fn is_fatal(&self, mode: Mode) -> bool {
        if mode == Mode::Generate {
            return false;
        }
        !matches!(
            self,
            Verdict::SignatureValid { .. } | Verdict::ChecksumMatch { .. }
        )
    }

    pub fn describe(&self) -> String {
        match self {
            Verdict::SignatureValid { key } => format!("signed by trusted key {key}"),
            Verdict::SignatureValidUntrusted { key } => {
                format!("signed by key {key}, which is not trusted")
            }
            Verdict::SignatureInvalid { key: Some(key), reason } => {
                format!("signature by key {key} failed verification ({reason})")
            }
            Verdict::SignatureInvalid { key: None, reason } => {
                format!("signature failed verification ({reason})")
            }
            Verdict::KeyUnresolved { key, reason } => {
                format!("key {key} could not be resolved: {reason}")
            }
            Verdict::NoSignature => {
                "artifact is not signed and has no recorded checksum".to_string()
            }
            Verdict::ChecksumMatch {
                algorithm,
                established: false,
            } => format!("{algorithm} checksum matches"),
            Verdict::ChecksumMatch {
                algorithm,
                established: true,
            } => format!("{algorithm} checksum recorded"),
            Verdict::ChecksumMismatch {
                algorithm,
                expected,
                actual,
            } => format!("expected {algorithm} checksum {expected} but was {actual}"),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// A change to the trust policy observed during a generate run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "update", rename_all = "snake_case")]
pub enum PolicyUpdate {
    IgnoreKey(IgnoredKey),
    IgnoreKeyForArtifact {
        artifact: ArtifactRef,
        key: IgnoredKey,
    },
    TrustPgpKey {
        artifact: ArtifactRef,
        key: KeyRef,
    },
    RecordChecksum {
        artifact: ArtifactRef,
        checksum: Checksum,
    },
}

/// Verdict plus everything the run learned about one artifact.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactOutcome {
    pub artifact: ArtifactRef,
    #[serde(flatten)]
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip)]
    pub updates: Vec<PolicyUpdate>,
    /// Keys whose signatures verified for this artifact.
    #[serde(skip)]
    pub used_keys: Vec<Arc<PublicKey>>,
}

impl ArtifactOutcome {
    pub fn new(artifact: ArtifactRef, verdict: Verdict) -> Self {
        ArtifactOutcome {
            artifact,
            verdict,
            warnings: vec![],
            updates: vec![],
            used_keys: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_verdicts() {
        let fatal = [
            Verdict::SignatureValidUntrusted { key: KeyId::new(1) },
            Verdict::SignatureInvalid {
                key: None,
                reason: InvalidReason::Mismatch,
            },
            Verdict::KeyUnresolved {
                key: KeyId::new(1),
                reason: "offline".to_string(),
            },
            Verdict::NoSignature,
            Verdict::ChecksumMismatch {
                algorithm: ChecksumKind::Sha256,
                expected: "aa".to_string(),
                actual: "bb".to_string(),
            },
        ];
        for verdict in &fatal {
            assert!(verdict.is_fatal(Mode::Verify), "{verdict}");
            assert!(!verdict.is_fatal(Mode::Generate), "{verdict}");
        }
        assert!(!Verdict::SignatureValid { key: KeyId::new(1) }.is_fatal(Mode::Verify));
        assert!(!Verdict::ChecksumMatch {
            algorithm: ChecksumKind::Sha1,
            established: false
        }
        .is_fatal(Mode::Verify));
    }

    #[test]
    fn test_verdict_json() {
        let verdict = Verdict::KeyUnresolved {
            key: KeyId::new(0x2BDF5FAC7D64304B),
            reason: REASON_KEY_NOT_DOWNLOADED.to_string(),
        };
        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["verdict"], "key_unresolved");
        assert_eq!(json["key"], "2BDF5FAC7D64304B");
    }

    #[test]
    fn test_config_presets() {
        let config = VerifierConfig::generate()
            .with_workers(0)
            .with_generated_checksums(vec![
                ChecksumKind::Sha512,
                ChecksumKind::Sha256,
                ChecksumKind::Sha512,
            ]);
        assert_eq!(config.mode, Mode::Generate);
        assert_eq!(config.workers, 1);
        assert_eq!(
            config.generated_checksums,
            vec![ChecksumKind::Sha256, ChecksumKind::Sha512]
        );
        assert_eq!(VerifierConfig::default().mode, Mode::Verify);
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancellation_through_flag() {
        let token = CancellationToken::new();
        token.flag().store(true, Ordering::SeqCst);
        assert!(token.is_cancelled());
        assert!(token.clone().is_cancelled());
    }
}
