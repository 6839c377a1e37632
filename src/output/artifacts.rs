use crate::extract::ImageArtifact;
use crate::output::DurabilityError;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Directory of content-addressed image files
///
/// Files are written to a temporary name in the same directory, synced, and
/// linked into place without clobbering. A name that already exists holds the
/// same bytes by construction, so a repeated store is a no-op.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn open(dir: &Path) -> Result<Self, DurabilityError> {
        std::fs::create_dir_all(dir).map_err(|e| DurabilityError::io(dir, e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Writes `artifact` unless it is already stored
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The file was written now
    /// * `Ok(false)` - An identical file was already present
    /// * `Err(DurabilityError)` - The file could not be written
    pub fn store(&self, artifact: &ImageArtifact) -> Result<bool, DurabilityError> {
        let target = self.path_for(&artifact.name);
        if target.exists() {
            return Ok(false);
        }

        let mut temp =
            NamedTempFile::new_in(&self.dir).map_err(|e| DurabilityError::io(&self.dir, e))?;
        temp.write_all(&artifact.bytes)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| DurabilityError::io(temp.path(), e))?;

        match temp.persist_noclobber(&target) {
            Ok(_) => Ok(true),
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(DurabilityError::io(&target, e.error)),
        }
    }

    /// Number of files in the store
    pub fn count(&self) -> usize {
        std::fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| entry.path().is_file())
                    .count()
            })
            .unwrap_or(0)
    }
}
