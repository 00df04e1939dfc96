//! JSON-only monitoring/control surface. This module has no HTTP server
//! or route wiring in it - the embedder maps whatever framework it uses
//! onto these methods, the same split `core.py` (WSGI glue) kept from
//! `sched.py` (scheduler core) in the original.
//!
//! Grounded on `plugins/task_monitor.py`'s `__get_all_json`/
//! `__get_summary_json`/`__get_one_json`/`__rerun_job`.

use rand::Rng;
use serde_json::{json, Value};

use crate::error::SkedgeError;
use crate::scheduler::Scheduler;

/// A random bearer-style token gating mutating monitor calls. Generated
/// once at `MonitorApi::new` time and compared on every mutating call.
#[derive(Debug, Clone)]
pub struct ApiToken(String);

impl ApiToken {
    #[must_use]
    pub fn generate() -> Self {
        const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
        let mut rng = rand::thread_rng();
        let token: String = (0..32)
            .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
            .collect();
        Self(token)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Name reported in the `json/summary` envelope.
const MONITOR_NAME: &str = "skedge";

fn success(value: Value) -> Value {
    json!({ "success": value })
}

fn error_envelope(err: &SkedgeError) -> Value {
    json!({ "error": err.to_string() })
}

fn invalid_job_id_envelope() -> Value {
    json!({ "error": "Invalid job id" })
}

fn invalid_input_envelope() -> Value {
    json!({ "error": "Invalid input" })
}

fn nothing_here_envelope() -> Value {
    json!({ "error": "Nothing here" })
}

fn summary_json(scheduler: &Scheduler) -> Value {
    let (count, running, errors) = scheduler.summary_counts();
    json!({
        "name": MONITOR_NAME,
        "summary": { "count": count, "running": running, "errors": errors },
        "details": scheduler.summary_details(),
    })
}

/// Full monitor: JSON reads plus rerun/enable/disable, gated by an
/// `ApiToken`.
pub struct MonitorApi {
    token: Option<ApiToken>,
}

impl MonitorApi {
    /// Full API with mutating endpoints enabled, gated by `token`. Pass
    /// `None` to leave rerun/enable/disable ungated (only appropriate
    /// behind another auth layer the embedder already has).
    #[must_use]
    pub fn new(token: Option<ApiToken>) -> Self {
        Self { token }
    }

    /// Read-only variant: no method on this type can mutate scheduler
    /// state, so there is nothing to gate.
    #[must_use]
    pub fn read_only() -> ReadOnlyMonitorApi {
        ReadOnlyMonitorApi
    }

    fn check_token(&self, supplied: Option<&str>) -> Result<(), Value> {
        match (&self.token, supplied) {
            (None, _) => Ok(()),
            (Some(expected), Some(got)) if expected.as_str() == got => Ok(()),
            _ => Err(json!({ "error": "Action blocked" })),
        }
    }

    /// All jobs as a JSON array, or an error if the registry is empty.
    #[must_use]
    pub fn all_jobs(&self, scheduler: &Scheduler) -> Value {
        let jobs = scheduler.jobs_json();
        if jobs.is_empty() {
            nothing_here_envelope()
        } else {
            success(json!(jobs))
        }
    }

    /// Aggregate counts: total, running, errored.
    #[must_use]
    pub fn summary(&self, scheduler: &Scheduler) -> Value {
        success(summary_json(scheduler))
    }

    /// One job by id.
    #[must_use]
    pub fn one_job(&self, scheduler: &Scheduler, id: &str) -> Value {
        match scheduler.job_json(id) {
            Some(job) => success(job),
            None => invalid_job_id_envelope(),
        }
    }

    /// Force a job to run now.
    pub fn rerun(&self, scheduler: &mut Scheduler, id: &str, token: Option<&str>) -> Value {
        if let Err(e) = self.check_token(token) {
            return e;
        }
        match scheduler.rerun(id) {
            Ok(()) => success(json!({ "rerun": id })),
            Err(SkedgeError::InvalidJobId(_)) => invalid_input_envelope(),
            Err(e) => error_envelope(&e),
        }
    }

    pub fn enable(&self, scheduler: &mut Scheduler, id: &str, token: Option<&str>) -> Value {
        if let Err(e) = self.check_token(token) {
            return e;
        }
        match scheduler.enable(id) {
            Ok(()) => success(json!({ "enabled": id })),
            Err(SkedgeError::InvalidJobId(_)) => invalid_input_envelope(),
            Err(e) => error_envelope(&e),
        }
    }

    pub fn disable(&self, scheduler: &mut Scheduler, id: &str, token: Option<&str>) -> Value {
        if let Err(e) = self.check_token(token) {
            return e;
        }
        match scheduler.disable(id) {
            Ok(()) => success(json!({ "disabled": id })),
            Err(SkedgeError::InvalidJobId(_)) => invalid_input_envelope(),
            Err(e) => error_envelope(&e),
        }
    }
}

/// Read-only monitor: only the JSON read endpoints exist on this type at
/// all, so there's no runtime gate to bypass.
pub struct ReadOnlyMonitorApi;

impl ReadOnlyMonitorApi {
    #[must_use]
    pub fn all_jobs(&self, scheduler: &Scheduler) -> Value {
        let jobs = scheduler.jobs_json();
        if jobs.is_empty() {
            nothing_here_envelope()
        } else {
            success(json!(jobs))
        }
    }

    #[must_use]
    pub fn summary(&self, scheduler: &Scheduler) -> Value {
        success(summary_json(scheduler))
    }

    #[must_use]
    pub fn one_job(&self, scheduler: &Scheduler, id: &str) -> Value {
        match scheduler.job_json(id) {
            Some(job) => success(job),
            None => invalid_job_id_envelope(),
        }
    }
}
