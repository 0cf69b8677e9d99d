use std::fmt::{self, Write as _};
use std::sync::Arc;

use super::*;
use crate::error::*;

/// Number of artifacts per verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VerdictCounts {
    pub signature_valid: usize,
    pub signature_untrusted: usize,
    pub signature_invalid: usize,
    pub key_unresolved: usize,
    pub no_signature: usize,
    pub checksum_match: usize,
    pub checksum_mismatch: usize,
}

impl VerdictCounts {
    fn add(&mut self, verdict: &Verdict) {
        let slot = match verdict {
            Verdict::SignatureValid { .. } => &mut self.signature_valid,
            Verdict::SignatureValidUntrusted { .. } => &mut self.signature_untrusted,
            Verdict::SignatureInvalid { .. } => &mut self.signature_invalid,
            Verdict::KeyUnresolved { .. } => &mut self.key_unresolved,
            Verdict::NoSignature => &mut self.no_signature,
            Verdict::ChecksumMatch { .. } => &mut self.checksum_match,
            Verdict::ChecksumMismatch { .. } => &mut self.checksum_mismatch,
        };
        *slot += 1;
    }
}

/// Outcome of a whole run, one entry per verified artifact.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub mode: Mode,
    pub counts: VerdictCounts,
    pub skipped: usize,
    pub outcomes: Vec<ArtifactOutcome>,
}

impl VerificationReport {
    pub fn new(mode: Mode, outcomes: Vec<ArtifactOutcome>, skipped: usize) -> Self {
        let mut counts = VerdictCounts::default();
        for outcome in &outcomes {
            counts.add(&outcome.verdict);
        }
        VerificationReport {
            mode,
            counts,
            skipped,
            outcomes,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &ArtifactOutcome> {
        self.outcomes
            .iter()
            .filter(move |o| o.verdict.is_fatal(self.mode))
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .flat_map(|o| o.warnings.iter().map(String::as_str))
    }

    /// Keys that verified at least one signature, ordered by key id.
    pub fn used_keys(&self) -> Vec<Arc<PublicKey>> {
        let mut keys: Vec<Arc<PublicKey>> = self
            .outcomes
            .iter()
            .flat_map(|o| o.used_keys.iter().cloned())
            .collect();
        keys.sort_by_key(|k| k.key_id());
        keys
    }

    pub fn failure(&self) -> Option<VerificationFailure> {
        let failures: Vec<_> = self
            .failures()
            .map(|o| (o.artifact.clone(), o.verdict.clone()))
            .collect();
        (!failures.is_empty()).then_some(VerificationFailure { failures })
    }

    /// `Err(VerificationFailed)` when any verdict blocks the build.
    pub fn check(&self) -> Result<(), DVError> {
        match self.failure() {
            Some(failure) => Err(DVError::VerificationFailed(failure)),
            None => Ok(()),
        }
    }

    pub fn to_json(&self) -> Result<String, DVError> {
        serde_json::to_string_pretty(self).map_err(|e| DVError::InternalError(e.to_string()))
    }

    /// Plain-text summary for terminals.
    pub fn render(&self) -> String {
        let c = &self.counts;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} artifact(s) checked in {} mode, {} skipped",
            self.outcomes.len(),
            self.mode,
            self.skipped
        );
        let _ = writeln!(
            out,
            "  signatures: {} valid, {} untrusted, {} invalid, {} unresolved keys",
            c.signature_valid, c.signature_untrusted, c.signature_invalid, c.key_unresolved
        );
        let _ = writeln!(
            out,
            "  checksums: {} matched, {} mismatched, {} missing",
            c.checksum_match, c.checksum_mismatch, c.no_signature
        );
        let failures: Vec<_> = self.failures().collect();
        if !failures.is_empty() {
            out.push_str("Problems:\n");
            for outcome in failures {
                let _ = writeln!(out, "  - {}: {}", outcome.artifact, outcome.verdict);
            }
        }
        let warnings: Vec<_> = self.warnings().collect();
        if !warnings.is_empty() {
            out.push_str("Warnings:\n");
            for warning in warnings {
                let _ = writeln!(out, "  - {warning}");
            }
        }
        out
    }
}

/// Every artifact that blocked a verify run, with its verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationFailure {
    pub failures: Vec<(ArtifactRef, Verdict)>,
}

impl fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Dependency verification failed for {} artifact(s):",
            self.failures.len()
        )?;
        for (artifact, verdict) in &self.failures {
            write!(f, "\n  - {artifact}: {verdict}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pgp::KeyId;
    use crate::policy::ModuleId;

    fn outcome(file: &str, verdict: Verdict) -> ArtifactOutcome {
        ArtifactOutcome::new(ArtifactRef::new(ModuleId::new("g", "n", "1"), file), verdict)
    }

    fn sample(mode: Mode) -> VerificationReport {
        let mut warned = outcome(
            "n-1.pom",
            Verdict::ChecksumMatch {
                algorithm: ChecksumKind::Sha256,
                established: true,
            },
        );
        warned.warnings.push("n-1.pom: look at this".to_string());
        VerificationReport::new(
            mode,
            vec![
                outcome("n-1.jar", Verdict::SignatureValid { key: KeyId::new(1) }),
                outcome("n-1-sources.jar", Verdict::NoSignature),
                warned,
            ],
            2,
        )
    }

    #[test]
    fn test_counts_and_failures() {
        let report = sample(Mode::Verify);
        assert_eq!(report.counts.signature_valid, 1);
        assert_eq!(report.counts.no_signature, 1);
        assert_eq!(report.counts.checksum_match, 1);
        assert!(!report.is_success());
        let failure = report.failure().unwrap();
        assert_eq!(failure.failures.len(), 1);
        assert_eq!(
            failure.to_string(),
            "Dependency verification failed for 1 artifact(s):\n  - g:n:1 (n-1-sources.jar): artifact is not signed and has no recorded checksum"
        );
        assert!(matches!(report.check(), Err(DVError::VerificationFailed(_))));

        let generated = sample(Mode::Generate);
        assert!(generated.is_success());
        assert!(generated.check().is_ok());
    }

    #[test]
    fn test_render() {
        let text = sample(Mode::Verify).render();
        assert!(text.starts_with("3 artifact(s) checked in verify mode, 2 skipped\n"));
        assert!(text.contains("Problems:\n  - g:n:1 (n-1-sources.jar)"));
        assert!(text.contains("Warnings:\n  - n-1.pom: look at this\n"));
    }

    #[test]
    fn test_json() {
        let json: serde_json::Value =
            serde_json::from_str(&sample(Mode::Verify).to_json().unwrap()).unwrap();
        assert_eq!(json["mode"], "verify");
        assert_eq!(json["counts"]["no_signature"], 1);
        assert_eq!(json["outcomes"][0]["verdict"], "signature_valid");
        assert_eq!(json["outcomes"][0]["artifact"]["file"], "n-1.jar");
        assert!(json["outcomes"][0].get("warnings").is_none());
    }
}
