use std::sync::Arc;

use rayon::prelude::*;

use super::*;
use crate::checksum::digest;
use crate::error::*;
use crate::keyserver::{KeyLookup, KeyResolver};
use crate::pgp::{parse_detached, verify_signature, Signature, SignatureCheck};
use crate::policy::{KeyTrust, TrustPolicy};

/// What one signature in a detached signature file amounted to.
enum SignerCheck {
    Valid { key: Arc<PublicKey>, trusted: bool },
    Invalid { key: Option<KeyId>, reason: InvalidReason },
    Unresolved { key: KeyId },
}

/// Checks artifacts against an immutable trust policy.
pub struct Verifier {
    policy: TrustPolicy,
    resolver: KeyResolver,
    config: VerifierConfig,
}

impl Verifier {
    pub fn new(policy: TrustPolicy, resolver: KeyResolver, config: VerifierConfig) -> Self {
        Verifier {
            policy,
            resolver,
            config,
        }
    }

    pub fn policy(&self) -> &TrustPolicy {
        &self.policy
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn resolver(&self) -> &KeyResolver {
        &self.resolver
    }

    fn generating(&self) -> bool {
        self.config.mode == Mode::Generate
    }

    fn checks_signatures(&self) -> bool {
        self.policy.verify_signatures()
            || (self.generating() && self.config.enable_signature_verification)
    }

    /// Verifies every input on a pool of `workers` threads.
    ///
    /// Outcomes are ordered by artifact. A cancelled run returns
    /// `DVError::Cancelled` and no report.
    pub fn run(
        &self,
        inputs: &[ArtifactInput],
        cancel: &CancellationToken,
    ) -> Result<VerificationReport, DVError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .build()
            .map_err(|e| DVError::InternalError(format!("failed to start workers: {e}")))?;
        let results = pool.install(|| {
            inputs
                .par_iter()
                .map(|input| {
                    if cancel.is_cancelled() {
                        return Err(DVError::Cancelled);
                    }
                    Ok(self.verify_artifact(input))
                })
                .collect::<Result<Vec<_>, DVError>>()
        })?;
        if cancel.is_cancelled() {
            return Err(DVError::Cancelled);
        }

        let skipped = results.iter().filter(|o| o.is_none()).count();
        let mut outcomes: Vec<ArtifactOutcome> = results.into_iter().flatten().collect();
        outcomes.sort_by(|a, b| a.artifact.cmp(&b.artifact));
        outcomes.dedup_by(|later, first| later.artifact == first.artifact);
        Ok(VerificationReport::new(self.config.mode, outcomes, skipped))
    }

    /// Runs the per-artifact state machine. Returns `None` for metadata
    /// artifacts when metadata verification is off.
    pub fn verify_artifact(&self, input: &ArtifactInput) -> Option<ArtifactOutcome> {
        if input.artifact.is_metadata() && !self.policy.verify_metadata() {
            log::debug!("Skipping metadata artifact {}", input.artifact);
            return None;
        }
        let outcome = match &input.signature {
            Some(signature) if self.checks_signatures() => self.signature_path(input, signature),
            Some(_) => self.checksum_path(input, None),
            None => self.checksum_path(input, Some(CHECKSUM_REASON_UNSIGNED)),
        };
        log::debug!("{}: {}", outcome.artifact, outcome.verdict);
        Some(outcome)
    }

    fn signature_path(&self, input: &ArtifactInput, data: &[u8]) -> ArtifactOutcome {
        let signatures = match parse_detached(data) {
            Ok(signatures) => signatures,
            Err(e) => {
                log::warn!("Unreadable signature file for {}: {}", input.artifact, e);
                let check = SignerCheck::Invalid {
                    key: None,
                    reason: InvalidReason::Malformed,
                };
                return self.conclude(input, vec![check]);
            }
        };
        let checks = signatures
            .iter()
            .filter_map(|signature| self.check_signature(input, signature))
            .collect();
        self.conclude(input, checks)
    }

    /// `None` when the signing key is ignored for this artifact.
    fn check_signature(
        &self,
        input: &ArtifactInput,
        signature: &Signature,
    ) -> Option<SignerCheck> {
        let artifact = &input.artifact;
        let Some(issuer) = signature.issuer() else {
            return Some(SignerCheck::Invalid {
                key: None,
                reason: InvalidReason::Malformed,
            });
        };
        let issuer_trust = self
            .policy
            .key_trust(artifact, issuer, signature.issuer_fingerprint());
        if issuer_trust == KeyTrust::Ignored {
            log::debug!("Ignoring signature by key {issuer} on {artifact}");
            return None;
        }

        let key = match self.resolver.resolve(issuer) {
            KeyLookup::Found(key) => key,
            KeyLookup::NotFound => return Some(SignerCheck::Unresolved { key: issuer }),
        };
        let Some(signer) = key.signing_key(issuer) else {
            log::warn!("{issuer} is not a signing key bound to {}", key.fingerprint());
            return Some(SignerCheck::Unresolved { key: issuer });
        };
        let primary_trust = self
            .policy
            .key_trust(artifact, key.key_id(), Some(key.fingerprint()));
        if primary_trust == KeyTrust::Ignored {
            log::debug!("Ignoring signature by key {} on {}", key.key_id(), artifact);
            return None;
        }

        match verify_signature(&input.bytes, signature, signer) {
            SignatureCheck::Valid => {
                let signer_trust = self
                    .policy
                    .key_trust(artifact, signer.key_id(), Some(signer.fingerprint()));
                let trusted =
                    primary_trust == KeyTrust::Trusted || signer_trust == KeyTrust::Trusted;
                Some(SignerCheck::Valid { key, trusted })
            }
            SignatureCheck::Invalid(reason) => Some(SignerCheck::Invalid {
                key: Some(issuer),
                reason,
            }),
        }
    }

    /// Folds the per-signature checks into one verdict:
    /// invalid, then unresolved, then untrusted, then valid.
    fn conclude(&self, input: &ArtifactInput, checks: Vec<SignerCheck>) -> ArtifactOutcome {
        let artifact = &input.artifact;
        if checks.is_empty() {
            return self.checksum_path(input, Some(CHECKSUM_REASON_KEY_IGNORED));
        }

        let mut valid = vec![];
        let mut invalid = vec![];
        let mut unresolved = vec![];
        for check in checks {
            match check {
                SignerCheck::Valid { key, trusted } => valid.push((key, trusted)),
                SignerCheck::Invalid { key, reason } => invalid.push((key, reason)),
                SignerCheck::Unresolved { key } => unresolved.push(key),
            }
        }
        // Only keys the run ended up trusting are worth exporting. Generate
        // mode trusts every valid signer unless another signature failed.
        let accepts_untrusted = self.generating() && invalid.is_empty() && unresolved.is_empty();
        let used_keys: Vec<Arc<PublicKey>> = valid
            .iter()
            .filter(|(_, trusted)| *trusted || accepts_untrusted)
            .map(|(key, _)| key.clone())
            .collect();

        let mut outcome = if let Some(&(key, reason)) = invalid.first() {
            self.invalid_signature(input, &invalid, key, reason)
        } else if let Some(&key) = unresolved.first() {
            self.unresolved_key(input, &unresolved, key)
        } else if let Some((key, _)) = valid.iter().find(|(_, trusted)| !trusted) {
            self.untrusted_key(input, &valid, key.key_id())
        } else {
            match valid.first() {
                Some((key, _)) => self.trusted_signature(input, key.key_id()),
                None => ArtifactOutcome::new(artifact.clone(), Verdict::NoSignature),
            }
        };
        outcome.used_keys = used_keys;
        outcome
    }

    fn invalid_signature(
        &self,
        input: &ArtifactInput,
        invalid: &[(Option<KeyId>, InvalidReason)],
        key: Option<KeyId>,
        reason: InvalidReason,
    ) -> ArtifactOutcome {
        let artifact = &input.artifact;
        let verdict = Verdict::SignatureInvalid { key, reason };
        log::warn!("{artifact}: {verdict}");
        if !self.generating() {
            return ArtifactOutcome::new(artifact.clone(), verdict);
        }
        let mut outcome = self.checksum_path(input, Some(CHECKSUM_REASON_PGP_FAILED));
        for key in invalid.iter().filter_map(|(key, _)| *key) {
            outcome.updates.push(PolicyUpdate::IgnoreKeyForArtifact {
                artifact: artifact.clone(),
                key: IgnoredKey::new(key, Some(REASON_PGP_FAILED.to_string())),
            });
        }
        outcome.warnings.push(format!(
            "{artifact}: signature verification failed, recorded a checksum that must be reviewed"
        ));
        outcome.verdict = verdict;
        outcome
    }

    fn unresolved_reason(&self) -> String {
        if self.resolver.has_key_servers() {
            REASON_KEY_NOT_DOWNLOADED.to_string()
        } else {
            "Key is not in the local keyring and key servers are disabled".to_string()
        }
    }

    fn unresolved_key(
        &self,
        input: &ArtifactInput,
        unresolved: &[KeyId],
        key: KeyId,
    ) -> ArtifactOutcome {
        let artifact = &input.artifact;
        let verdict = Verdict::KeyUnresolved {
            key,
            reason: self.unresolved_reason(),
        };
        log::warn!("{artifact}: {verdict}");
        if !self.generating() {
            return ArtifactOutcome::new(artifact.clone(), verdict);
        }
        let mut outcome = self.checksum_path(input, Some(CHECKSUM_REASON_KEY_MISSING));
        for key in unresolved {
            outcome.updates.push(PolicyUpdate::IgnoreKey(IgnoredKey::new(
                *key,
                Some(REASON_KEY_NOT_DOWNLOADED.to_string()),
            )));
        }
        outcome.warnings.push(format!(
            "{artifact}: key {key} couldn't be downloaded, a checksum was recorded instead"
        ));
        outcome.verdict = verdict;
        outcome
    }

    /// Generate mode trusts every valid signer for the artifact.
    fn untrusted_key(
        &self,
        input: &ArtifactInput,
        valid: &[(Arc<PublicKey>, bool)],
        key: KeyId,
    ) -> ArtifactOutcome {
        let artifact = &input.artifact;
        if !self.generating() {
            return ArtifactOutcome::new(artifact.clone(), Verdict::SignatureValidUntrusted { key });
        }
        let mut outcome = ArtifactOutcome::new(artifact.clone(), Verdict::SignatureValid { key });
        for (signer, _) in valid.iter().filter(|(_, trusted)| !trusted) {
            log::info!("Trusting key {} for {}", signer.fingerprint(), artifact);
            outcome.updates.push(PolicyUpdate::TrustPgpKey {
                artifact: artifact.clone(),
                key: signer.fingerprint().clone().into(),
            });
        }
        outcome
    }

    /// A trusted signature still has to agree with recorded checksums.
    fn trusted_signature(&self, input: &ArtifactInput, key: KeyId) -> ArtifactOutcome {
        let artifact = &input.artifact;
        let recorded = self
            .policy
            .artifact(artifact)
            .map(|entry| entry.checksums.as_slice())
            .unwrap_or_default();
        if let Some(mismatch) = self.first_mismatch(recorded, &input.bytes) {
            return self.mismatch(artifact, mismatch);
        }
        ArtifactOutcome::new(artifact.clone(), Verdict::SignatureValid { key })
    }

    fn first_mismatch(&self, recorded: &[Checksum], bytes: &[u8]) -> Option<Verdict> {
        recorded.iter().find_map(|checksum| {
            let actual = digest(bytes, checksum.kind);
            (!checksum.matches(&actual)).then(|| Verdict::ChecksumMismatch {
                algorithm: checksum.kind,
                expected: checksum.value.clone(),
                actual,
            })
        })
    }

    fn mismatch(&self, artifact: &ArtifactRef, verdict: Verdict) -> ArtifactOutcome {
        log::warn!("{artifact}: {verdict}");
        let mut outcome = ArtifactOutcome::new(artifact.clone(), verdict);
        if self.generating() {
            outcome.warnings.push(format!(
                "{artifact}: checksum does not match the recorded value, the record was kept"
            ));
        }
        outcome
    }

    fn generated_kinds(&self) -> Vec<ChecksumKind> {
        if self.config.generated_checksums.is_empty() {
            vec![ChecksumKind::Sha256]
        } else {
            self.config.generated_checksums.clone()
        }
    }

    fn new_checksum(&self, kind: ChecksumKind, bytes: &[u8], reason: Option<&str>) -> Checksum {
        let checksum = Checksum::new(kind, digest(bytes, kind)).with_origin(GENERATED_ORIGIN);
        match reason {
            Some(reason) => checksum.with_reason(reason),
            None => checksum,
        }
    }

    /// Compares against recorded checksums, or records new ones in
    /// generate mode with `reason` explaining why no signature was used.
    fn checksum_path(&self, input: &ArtifactInput, reason: Option<&str>) -> ArtifactOutcome {
        let artifact = &input.artifact;
        let recorded = self
            .policy
            .artifact(artifact)
            .map(|entry| entry.checksums.as_slice())
            .unwrap_or_default();
        let kinds = self.generated_kinds();

        if recorded.is_empty() {
            if !self.generating() {
                return ArtifactOutcome::new(artifact.clone(), Verdict::NoSignature);
            }
            let strongest = kinds.iter().copied().max().unwrap_or(ChecksumKind::Sha256);
            let mut outcome = ArtifactOutcome::new(
                artifact.clone(),
                Verdict::ChecksumMatch {
                    algorithm: strongest,
                    established: true,
                },
            );
            for kind in kinds {
                outcome.updates.push(PolicyUpdate::RecordChecksum {
                    artifact: artifact.clone(),
                    checksum: self.new_checksum(kind, &input.bytes, reason),
                });
            }
            return outcome;
        }

        if let Some(mismatch) = self.first_mismatch(recorded, &input.bytes) {
            return self.mismatch(artifact, mismatch);
        }
        let strongest = recorded
            .iter()
            .map(|c| c.kind)
            .max()
            .unwrap_or(ChecksumKind::Sha256);
        let mut outcome = ArtifactOutcome::new(
            artifact.clone(),
            Verdict::ChecksumMatch {
                algorithm: strongest,
                established: false,
            },
        );
        if self.generating() {
            for kind in kinds.into_iter().filter(|k| recorded.iter().all(|c| c.kind != *k)) {
                outcome.updates.push(PolicyUpdate::RecordChecksum {
                    artifact: artifact.clone(),
                    checksum: self.new_checksum(kind, &input.bytes, reason),
                });
            }
        }
        outcome
    }
}
