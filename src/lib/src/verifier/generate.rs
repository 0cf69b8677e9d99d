use super::*;
use crate::policy::{TrustPolicy, TrustPolicyBuilder};

fn apply(builder: &mut TrustPolicyBuilder, update: &PolicyUpdate) {
    match update {
        PolicyUpdate::IgnoreKey(key) => {
            builder.add_ignored_key(key.clone());
        }
        PolicyUpdate::IgnoreKeyForArtifact { artifact, key } => {
            builder.add_artifact_ignored_key(artifact, key.clone());
        }
        PolicyUpdate::TrustPgpKey { artifact, key } => {
            builder.add_trusted_artifact_key(artifact, key.clone());
        }
        PolicyUpdate::RecordChecksum { artifact, checksum } => {
            builder.add_checksum(artifact, checksum.clone());
        }
    }
}

/// The previous policy with every update observed in `report` applied.
///
/// Existing entries are kept, including those of artifacts that were not
/// part of this run.
pub fn generate_policy(
    previous: &TrustPolicy,
    report: &VerificationReport,
    config: &VerifierConfig,
) -> TrustPolicy {
    let mut builder = previous.to_builder();
    if config.enable_signature_verification {
        builder.verify_signatures(true);
    }
    for outcome in &report.outcomes {
        for update in &outcome.updates {
            apply(&mut builder, update);
        }
    }
    builder.build()
}
