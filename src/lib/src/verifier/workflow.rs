use std::path::{Path, PathBuf};

use super::*;
use crate::atomic_file::{read_optional, StagedWrites};
use crate::error::*;
use crate::keyring::{Keyring, KeyringExporter};
use crate::keyserver::{HkpKeyServer, KeyResolver, KeyServer, KeyServerClient, DEFAULT_KEY_SERVERS};
use crate::policy::{TrustPolicy, METADATA_FILE};

/// What a completed run produced.
#[derive(Debug)]
pub struct RunSummary {
    pub report: VerificationReport,
    /// The policy in effect after the run; the regenerated one in generate mode.
    pub policy: TrustPolicy,
    /// Files replaced on disk.
    pub written: Vec<PathBuf>,
}

/// A directory holding `verification-metadata.xml` and the exported
/// keyrings.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    dir: PathBuf,
}

impl MetadataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        MetadataStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    /// The persisted policy, or the default policy when there is none yet.
    pub fn load_policy(&self) -> Result<TrustPolicy, DVError> {
        let path = self.metadata_path();
        match read_optional(&path)? {
            Some(bytes) => {
                log::debug!("Loading {}", path.display());
                TrustPolicy::from_xml(std::str::from_utf8(&bytes)?)
            }
            None => {
                log::debug!("No {} found, starting from an empty policy", path.display());
                Ok(TrustPolicy::default())
            }
        }
    }

    pub fn exporter(&self, policy: &TrustPolicy) -> KeyringExporter {
        KeyringExporter::new(&self.dir, policy.keyring_format())
    }

    /// Key servers from the policy, or the defaults when it lists none.
    /// `None` when remote lookups are disabled.
    pub fn key_server_client(
        policy: &TrustPolicy,
        config: &VerifierConfig,
    ) -> Result<Option<KeyServerClient>, DVError> {
        if config.offline || !policy.key_servers_enabled() {
            return Ok(None);
        }
        let uris: Vec<&str> = if policy.key_servers().is_empty() {
            DEFAULT_KEY_SERVERS.to_vec()
        } else {
            policy.key_servers().iter().map(String::as_str).collect()
        };
        let servers = uris
            .into_iter()
            .map(|uri| {
                HkpKeyServer::new(uri, config.key_server_timeout)
                    .map(|server| Box::new(server) as Box<dyn KeyServer>)
            })
            .collect::<Result<Vec<_>, DVError>>()?;
        Ok(Some(KeyServerClient::new(servers)))
    }

    /// Verifies `inputs` and persists the results, without turning fatal
    /// verdicts into an error.
    ///
    /// Generate mode rewrites the metadata file. With `export_keys`, the
    /// keyring files are rewritten from the previous export plus every
    /// key whose signature the run trusted. Nothing is written unless the
    /// run completes.
    pub fn execute(
        &self,
        inputs: &[ArtifactInput],
        config: &VerifierConfig,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, DVError> {
        let policy = self.load_policy()?;
        let exporter = self.exporter(&policy);
        let exported = exporter.load_existing()?;
        let mut local = exported.clone();
        for path in &config.keyrings {
            log::debug!("Loading keyring {}", path.display());
            local.merge(&Keyring::from_file(path)?);
        }
        let client = Self::key_server_client(&policy, config)?;
        let verifier = Verifier::new(policy, KeyResolver::new(local, client), config.clone());

        let report = verifier.run(inputs, cancel)?;
        log::info!(
            "Verified {} artifact(s), {} remote key lookup(s)",
            report.outcomes.len(),
            verifier.resolver().remote_lookups()
        );

        let mut writes = StagedWrites::new();
        let policy = match config.mode {
            Mode::Generate => {
                let generated = generate_policy(verifier.policy(), &report, config);
                writes.stage(&self.metadata_path(), generated.to_xml()?.as_bytes())?;
                generated
            }
            Mode::Verify => verifier.policy().clone(),
        };
        if config.export_keys {
            let keyring = KeyringExporter::export_set(&exported, report.used_keys());
            log::info!("Exporting {} key(s)", keyring.len());
            exporter.stage(&keyring, &mut writes)?;
        }

        if cancel.is_cancelled() {
            return Err(DVError::Cancelled);
        }
        let written = writes.commit()?;
        for path in &written {
            log::info!("Wrote {}", path.display());
        }
        for warning in report.warnings() {
            log::warn!("{warning}");
        }
        Ok(RunSummary {
            report,
            policy,
            written,
        })
    }

    /// Like [`execute`](Self::execute), failing with
    /// `DVError::VerificationFailed` when a verdict blocks the build.
    pub fn run(
        &self,
        inputs: &[ArtifactInput],
        config: &VerifierConfig,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, DVError> {
        let summary = self.execute(inputs, config, cancel)?;
        summary.report.check()?;
        Ok(summary)
    }
}
