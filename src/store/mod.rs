//! Pluggable persistence for job run state, so a job's log/disabled flag
//! survives process restarts. Keyed by [`Job::signature_hash`] and scoped
//! per "app identity" so two different programs sharing a data directory
//! don't clobber each other's state.
//!
//! Grounded on `state/base.py`, `state/fs.py`, and `state/db.py`.

pub mod fs;
pub mod sql;

use sha1::{Digest, Sha1};

use crate::error::Result;
use crate::job::Job;

/// A fingerprint of the running program: its working directory,
/// executable path, and arguments, hashed with SHA-1. Two runs of the
/// same program from the same place get the same identity; a different
/// program sharing a store directory gets flagged.
#[derive(Debug, Clone)]
pub struct AppIdentity {
    pub info: String,
    pub hash: String,
}

impl AppIdentity {
    /// # Errors
    /// Returns an error if the current working directory or executable
    /// path can't be determined.
    pub fn current() -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| crate::error::SkedgeError::StoreError(format!("cwd: {e}")))?;
        let exe = std::env::current_exe()
            .map_err(|e| crate::error::SkedgeError::StoreError(format!("current_exe: {e}")))?;
        let argv: Vec<String> = std::env::args().collect();
        let info = format!("{}\n{}\n{}", cwd.display(), exe.display(), argv.join(" "));
        let mut hasher = Sha1::new();
        hasher.update(info.as_bytes());
        let hash = hex::encode(hasher.finalize());
        Ok(Self { info, hash })
    }
}

/// A persisted view of one job's run state, independent of the in-memory
/// `RunRecord` shape so stores can evolve their wire format separately.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PersistedJobState {
    pub signature_hash: String,
    pub readable: String,
    pub log: String,
    pub err: Option<String>,
    pub start_dt: Option<String>,
    pub end_dt: Option<String>,
    pub disabled: bool,
}

impl PersistedJobState {
    #[must_use]
    pub fn from_job(job: &Job) -> Self {
        Self {
            signature_hash: job.signature_hash().to_string(),
            readable: job.function_signature(),
            log: job.record.log.clone(),
            err: job.record.error.clone(),
            start_dt: job.record.started_at.as_ref().map(std::string::ToString::to_string),
            end_dt: job.record.ended_at.as_ref().map(std::string::ToString::to_string),
            disabled: job.is_disabled(),
        }
    }
}

/// Persistence backend for job run state.
pub trait StateStore: Send + Sync + std::fmt::Debug {
    /// Persist one job's current run record and disabled flag.
    ///
    /// # Errors
    /// Returns [`crate::error::SkedgeError::StoreError`] on I/O or backend
    /// failure.
    fn save_job(&self, job: &Job) -> Result<()>;

    /// Restore all matching jobs' state in place, pruning any stored
    /// state that doesn't correspond to a job in `jobs` (stale entries
    /// from a job that's no longer scheduled).
    ///
    /// # Errors
    /// Returns [`crate::error::SkedgeError::StoreError`] on I/O or backend
    /// failure.
    fn restore_all(&self, jobs: &mut [Job]) -> Result<()>;
}

pub(crate) fn apply_restored(job: &mut Job, state: &PersistedJobState) {
    let mut record = crate::record::RunRecord::default();
    if let Some(start) = &state.start_dt {
        if let Ok(z) = start.parse() {
            record.started_at = Some(z);
        }
    }
    if let Some(end) = &state.end_dt {
        if let Ok(z) = end.parse() {
            record.ended_at = Some(z);
        }
    }
    record.log.clone_from(&state.log);
    record.error.clone_from(&state.err);
    job.record = record;
    if state.disabled {
        job.disable();
    }
}
