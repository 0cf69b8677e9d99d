//! Staged, all-or-nothing file replacement
//!
//! Output files (the verification metadata and exported keyrings) are
//! first written to temporary files in their destination directory.
//! Nothing becomes visible until [`StagedWrites::commit`] renames every
//! staged file into place. Dropping a [`StagedWrites`] without committing
//! removes the temporary files and leaves existing outputs untouched.
//! Renames are atomic per file; a failed commit restores the files it had
//! already replaced.
//!
//! # Example
//!
//! ```no_run
//! use depverify::atomic_file::StagedWrites;
//! use std::path::Path;
//!
//! let mut writes = StagedWrites::new();
//! writes.stage(Path::new("metadata/verification-metadata.xml"), b"<verification-metadata/>")?;
//! writes.commit()?;
//! # Ok::<(), depverify::DVError>(())
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::DVError;

/// Permission mode of committed files (owner read/write, others read)
#[cfg(unix)]
pub const OUTPUT_FILE_MODE: u32 = 0o644;

/// Set the output permissions on a staged file (Unix only)
///
/// Temporary files are created with mode 0600, which is too strict for
/// files meant to be committed to version control.
#[cfg(unix)]
fn set_output_permissions(path: &Path) -> Result<(), DVError> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(OUTPUT_FILE_MODE);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_output_permissions(_path: &Path) -> Result<(), DVError> {
    Ok(())
}

struct StagedFile {
    target: PathBuf,
    temp: NamedTempFile,
}

/// A set of files written to temporary locations, pending commit.
#[derive(Default)]
pub struct StagedWrites {
    files: Vec<StagedFile>,
}

impl StagedWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `data` to a temporary file next to `target`.
    pub fn stage(&mut self, target: &Path, data: &[u8]) -> Result<(), DVError> {
        let parent = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| {
            DVError::InternalError(format!(
                "Failed to create directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
        let mut temp = NamedTempFile::new_in(&parent)?;
        temp.write_all(data)?;
        temp.as_file().sync_all()?;
        set_output_permissions(temp.path())?;
        self.files.push(StagedFile {
            target: target.to_path_buf(),
            temp,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn targets(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| f.target.clone()).collect()
    }

    /// Moves every staged file into place, returning the written paths.
    ///
    /// Each rename is atomic. If one fails, the targets already replaced
    /// get their previous contents back (or are removed if they did not
    /// exist), and the error is returned.
    pub fn commit(self) -> Result<Vec<PathBuf>, DVError> {
        let mut previous = Vec::with_capacity(self.files.len());
        for file in &self.files {
            previous.push(read_optional(&file.target)?);
        }
        let mut written = Vec::with_capacity(self.files.len());
        for file in self.files {
            if let Err(e) = file.temp.persist(&file.target) {
                log::warn!(
                    "Failed to write {}, restoring {} committed file(s)",
                    file.target.display(),
                    written.len()
                );
                rollback(&written, &previous);
                return Err(DVError::IOError(e.error));
            }
            log::debug!("Wrote {}", file.target.display());
            written.push(file.target);
        }
        Ok(written)
    }
}

fn rollback(written: &[PathBuf], previous: &[Option<Vec<u8>>]) {
    for (target, contents) in written.iter().zip(previous) {
        let restored = match contents {
            Some(data) => fs::write(target, data),
            None => fs::remove_file(target),
        };
        if let Err(e) = restored {
            log::error!("Failed to restore {}: {}", target.display(), e);
        }
    }
}

/// Reads a file, returning `None` if it does not exist.
pub fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, DVError> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
