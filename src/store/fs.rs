//! One state file per job, under a data directory keyed by app identity.
//! Grounded on `state/fs.py`'s `FileSystemState`.

use std::fs as stdfs;
use std::path::{Path, PathBuf};

use crate::error::{Result, SkedgeError};
use crate::job::Job;

use super::{apply_restored, AppIdentity, PersistedJobState, StateStore};

#[derive(Debug)]
pub struct FilesystemStore {
    dir: PathBuf,
    identity: AppIdentity,
}

impl FilesystemStore {
    /// Create a store rooted at `base_dir`, namespaced under the current
    /// app's identity hash. Writes a human-readable `<cwd-name>.cwd`
    /// fingerprint file alongside the state files, for manual inspection.
    ///
    /// # Errors
    /// Returns [`SkedgeError::StoreError`] if the directory can't be
    /// created.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let identity = AppIdentity::current()?;
        let dir = base_dir.as_ref().join(&identity.hash).join("states");
        stdfs::create_dir_all(&dir)
            .map_err(|e| SkedgeError::StoreError(format!("create state dir: {e}")))?;
        let fingerprint_name = std::env::current_dir()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "app".to_string());
        let fingerprint_path = dir
            .parent()
            .unwrap_or(&dir)
            .join(format!("{fingerprint_name}.cwd"));
        stdfs::write(&fingerprint_path, &identity.info)
            .map_err(|e| SkedgeError::StoreError(format!("write fingerprint: {e}")))?;
        Ok(Self { dir, identity })
    }

    fn path_for(&self, signature_hash: &str) -> PathBuf {
        self.dir.join(format!("{signature_hash}.bin"))
    }
}

impl StateStore for FilesystemStore {
    fn save_job(&self, job: &Job) -> Result<()> {
        let state = PersistedJobState::from_job(job);
        let bytes = bincode::serialize(&state)
            .map_err(|e| SkedgeError::StoreError(format!("serialize job state: {e}")))?;
        stdfs::write(self.path_for(job.signature_hash()), bytes)
            .map_err(|e| SkedgeError::StoreError(format!("write job state: {e}")))?;
        Ok(())
    }

    fn restore_all(&self, jobs: &mut [Job]) -> Result<()> {
        let mut found = Vec::new();
        for job in jobs.iter_mut() {
            let path = self.path_for(job.signature_hash());
            if path.is_file() {
                let bytes = stdfs::read(&path)
                    .map_err(|e| SkedgeError::StoreError(format!("read job state: {e}")))?;
                let state: PersistedJobState = bincode::deserialize(&bytes)
                    .map_err(|e| SkedgeError::StoreError(format!("decode job state: {e}")))?;
                apply_restored(job, &state);
                found.push(path);
            }
        }
        // Stale files: states on disk for jobs that no longer exist.
        let entries = stdfs::read_dir(&self.dir)
            .map_err(|e| SkedgeError::StoreError(format!("list state dir: {e}")))?;
        for entry in entries {
            let entry = entry.map_err(|e| SkedgeError::StoreError(format!("read dir entry: {e}")))?;
            let path = entry.path();
            if !found.contains(&path) {
                let _ = stdfs::remove_file(&path);
            }
        }
        tracing::debug!(app_hash = %self.identity.hash, "restored job state from filesystem");
        Ok(())
    }
}
