//! This module defines the error type and Result alias.

use thiserror::Error;

/// All errors this crate can produce.
///
/// The first three variants are raised synchronously to the caller of the
/// builder/control API. The last three happen inside the dispatch loop and
/// are confined there - logged, routed to a handler, and never allowed to
/// unwind the loop thread.
#[derive(Error, Debug)]
pub enum SkedgeError {
    /// A job or schedule was built with an invalid combination of settings.
    #[error("bad schedule: {0}")]
    BadSchedule(String),

    /// A monitor/control operation referenced a job id that doesn't exist.
    #[error("no job with id {0}")]
    InvalidJobId(String),

    /// A rerun was requested for a job that is already running and isn't
    /// marked parallel.
    #[error("job {0} is already running")]
    JobBusy(String),

    /// The job's callable returned an error or panicked.
    #[error("job {job} failed: {source}")]
    CallableError {
        job: String,
        #[source]
        source: anyhow::Error,
    },

    /// The user-supplied error handler itself failed.
    #[error("error handler for job {job} failed: {source}")]
    HandlerError {
        job: String,
        #[source]
        source: anyhow::Error,
    },

    /// A `StateStore` operation failed.
    #[error("state store error: {0}")]
    StoreError(String),
}

pub type Result<T> = std::result::Result<T, SkedgeError>;
