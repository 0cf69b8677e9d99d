use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{Keyring, KeyringFormat};
use crate::atomic_file::StagedWrites;
use crate::error::*;
use crate::pgp::PublicKey;

pub const KEYRING_BINARY_FILE: &str = "verification-keyring.gpg";
pub const KEYRING_ARMORED_FILE: &str = "verification-keyring.keys";

/// Writes the keys that verification relied on next to the metadata file.
#[derive(Debug, Clone)]
pub struct KeyringExporter {
    dir: PathBuf,
    format: KeyringFormat,
}

impl KeyringExporter {
    pub fn new(dir: impl Into<PathBuf>, format: KeyringFormat) -> Self {
        KeyringExporter {
            dir: dir.into(),
            format,
        }
    }

    pub fn binary_path(&self) -> PathBuf {
        self.dir.join(KEYRING_BINARY_FILE)
    }

    pub fn armored_path(&self) -> PathBuf {
        self.dir.join(KEYRING_ARMORED_FILE)
    }

    /// Keys from any previously exported keyring files. Missing files
    /// yield an empty keyring.
    pub fn load_existing(&self) -> Result<Keyring, DVError> {
        let mut keyring = Keyring::new();
        for path in [self.binary_path(), self.armored_path()] {
            if path.is_file() {
                log::debug!("Loading keyring {}", path.display());
                keyring.merge(&Keyring::from_file(&path)?);
            }
        }
        Ok(keyring)
    }

    /// Existing keys first, then the keys used during verification,
    /// deduplicated, sanitized and sorted by key id.
    pub fn export_set(
        existing: &Keyring,
        used: impl IntoIterator<Item = Arc<PublicKey>>,
    ) -> Keyring {
        let mut keyring = existing.clone();
        for key in used {
            keyring.insert(key);
        }
        keyring.sanitized().sorted()
    }

    /// Stages the configured keyring files into `writes`.
    pub fn stage(&self, keyring: &Keyring, writes: &mut StagedWrites) -> Result<(), DVError> {
        if self.format.writes_binary() {
            writes.stage(&self.binary_path(), &keyring.to_binary()?)?;
        }
        if self.format.writes_armored() {
            writes.stage(&self.armored_path(), keyring.to_armored()?.as_bytes())?;
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn format(&self) -> KeyringFormat {
        self.format
    }
}
