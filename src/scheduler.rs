//! The scheduler owns the job list, ticks the dispatch loop, and wires
//! jobs to an optional [`StateStore`]. Grounded on `sched.py`'s
//! `TaskScheduler` and the observed behavior in its test suite: a job
//! list snapshotted per tick so it's safe to mutate while iterating, a
//! `Timekeeper`-backed clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration as StdDuration;

use jiff::{SpanRound, Unit, Zoned};
use tracing::{debug, warn};

use crate::error::{Result, SkedgeError};
use crate::job::{ErrorHandler, Job};
use crate::store::StateStore;
use crate::time::{Clock, Timekeeper};

type SharedJob = Arc<Mutex<Job>>;

/// A Scheduler creates jobs, tracks registered jobs, and executes jobs
/// whose `next_run` has arrived.
pub struct Scheduler {
    jobs: Vec<SharedJob>,
    clock: Clock,
    check_interval: StdDuration,
    persist_states: bool,
    store: Option<Arc<dyn StateStore>>,
    on_job_error: Option<ErrorHandler>,
    running: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    next_job_id: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            jobs: Vec::new(),
            clock: Clock::default(),
            check_interval: StdDuration::from_secs(1),
            persist_states: true,
            store: None,
            on_job_error: None,
            running: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            next_job_id: 1,
        }
    }
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a scheduler backed by a [`crate::time::mock::Mock`] clock
    /// instead of the system clock - for driving schedules deterministically
    /// in tests.
    #[must_use]
    pub fn with_mock_clock(clock: crate::time::mock::Mock) -> Self {
        Self {
            clock: Clock::Mock(clock),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_check_interval(mut self, interval: StdDuration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Attach a state store and turn persistence on (the default).
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.persist_states = true;
        self.store = Some(store);
        self
    }

    /// Opt out of persistence entirely - no store is ever constructed or
    /// consulted.
    #[must_use]
    pub fn without_persistence(mut self) -> Self {
        self.persist_states = false;
        self.store = None;
        self
    }

    #[must_use]
    pub fn on_job_error(mut self, handler: ErrorHandler) -> Self {
        self.on_job_error = Some(handler);
        self
    }

    /// Register a job, computing its initial `next_run`.
    ///
    /// # Errors
    /// Propagates [`SkedgeError::BadSchedule`] if the job's schedule
    /// can't produce a next run from the current time.
    pub fn schedule(&mut self, mut job: Job) -> Result<String> {
        let now = self.now();
        job.schedule_next_run(&now, false)?;
        job.job_id = self.next_job_id;
        self.next_job_id += 1;
        let id = job.id().to_string();
        self.jobs.push(Arc::new(Mutex::new(job)));
        Ok(id)
    }

    fn find(&self, id: &str) -> Result<&SharedJob> {
        self.jobs
            .iter()
            .find(|j| j.lock().expect("job mutex poisoned").id() == id)
            .ok_or_else(|| SkedgeError::InvalidJobId(id.to_string()))
    }

    /// Restore persisted state for every currently-registered job, and
    /// prune any stale stored state that doesn't match a current job.
    /// Called automatically by `start`, but also callable standalone.
    ///
    /// # Errors
    /// Propagates [`SkedgeError::StoreError`] from the backing store.
    pub fn restore_all_job_logs(&mut self) -> Result<()> {
        let Some(store) = self.store.clone() else {
            return Ok(());
        };
        let mut guards: Vec<_> = self
            .jobs
            .iter()
            .map(|j| j.lock().expect("job mutex poisoned"))
            .collect();
        let mut refs: Vec<&mut Job> = guards.iter_mut().map(|g| &mut **g).collect();
        restore_via_refs(store.as_ref(), &mut refs)
    }

    pub fn enable(&mut self, id: &str) -> Result<()> {
        self.find(id)?.lock().expect("job mutex poisoned").enable();
        Ok(())
    }

    pub fn disable(&mut self, id: &str) -> Result<()> {
        self.find(id)?.lock().expect("job mutex poisoned").disable();
        Ok(())
    }

    pub fn enable_all(&mut self) {
        for j in &self.jobs {
            j.lock().expect("job mutex poisoned").enable();
        }
    }

    pub fn disable_all(&mut self) {
        for j in &self.jobs {
            j.lock().expect("job mutex poisoned").disable();
        }
    }

    /// Force one job to run immediately, outside its normal cadence.
    ///
    /// # Errors
    /// - [`SkedgeError::InvalidJobId`] if no job has that id.
    /// - [`SkedgeError::JobBusy`] if the job is already running and isn't
    ///   marked parallel.
    pub fn rerun(&mut self, id: &str) -> Result<()> {
        let job_arc = self.find(id)?.clone();
        let parallel = job_arc.lock().expect("job mutex poisoned").is_parallel();
        if !parallel && job_arc.lock().expect("job mutex poisoned").record.is_running() {
            return Err(SkedgeError::JobBusy(id.to_string()));
        }
        // Always detached, even for serial jobs: a monitor-triggered rerun
        // must never block the caller on the job's own runtime.
        let now = self.now();
        self.spawn_parallel(job_arc, now, true);
        Ok(())
    }

    fn spawn_parallel(&mut self, job_arc: SharedJob, now: Zoned, is_rerun: bool) {
        let store = self.store.clone();
        let on_error = self.on_job_error.clone();
        let handle = std::thread::spawn(move || {
            let mut job = job_arc.lock().expect("job mutex poisoned");
            match job.run(&now, is_rerun) {
                Ok(_keep_going) => {
                    if let Some(store) = &store {
                        if let Err(e) = store.save_job(&job) {
                            warn!(error = %e, "failed to persist job state");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "parallel job failed");
                    if let Some(handler) = &on_error {
                        handler(job.name(), &anyhow::anyhow!(e.to_string()));
                    }
                }
            }
        });
        self.workers.push(handle);
    }

    /// Run one due job synchronously, routing any error to the scheduler's
    /// generic handler instead of propagating it - only control-plane
    /// errors (`InvalidJobId`, `JobBusy`, `BadSchedule`) cross this
    /// boundary.
    fn run_one(&self, job: &mut Job, now: &Zoned, is_rerun: bool) -> Result<()> {
        match job.run(now, is_rerun) {
            Ok(_keep_going) => {
                if self.persist_states {
                    if let Some(store) = &self.store {
                        if let Err(e) = store.save_job(job) {
                            warn!(error = %e, "failed to persist job state");
                        }
                    }
                }
                Ok(())
            }
            Err(e) => {
                warn!(job = job.name(), error = %e, "job failed");
                if let Some(handler) = &self.on_job_error {
                    handler(job.name(), &anyhow::anyhow!(e.to_string()));
                }
                Ok(())
            }
        }
    }

    /// Check every job once: run whatever is due (dispatching parallel
    /// jobs onto their own thread), drop jobs whose schedule has been
    /// exhausted (e.g. a fired one-shot), and keep everything else.
    ///
    /// # Errors
    /// Propagates [`SkedgeError::BadSchedule`] if recomputing a job's
    /// next run fails.
    pub fn check(&mut self) -> Result<()> {
        let now = self.now();
        let mut keep = Vec::with_capacity(self.jobs.len());
        let jobs = std::mem::take(&mut self.jobs);
        for job_arc in jobs {
            let (due, parallel) = {
                let guard = job_arc.lock().expect("job mutex poisoned");
                (guard.is_due(&now), guard.is_parallel())
            };
            if !due {
                keep.push(job_arc);
                continue;
            }
            if parallel {
                keep.push(job_arc.clone());
                self.spawn_parallel(job_arc, now.clone(), false);
            } else {
                let keep_going = {
                    let mut guard = job_arc.lock().expect("job mutex poisoned");
                    self.run_one(&mut guard, &now, false)?;
                    guard.next_run.is_some()
                };
                if keep_going {
                    keep.push(job_arc);
                } else {
                    debug!("dropping exhausted job");
                }
            }
        }
        self.jobs = keep;
        Ok(())
    }

    /// Block, checking for due jobs every `check_interval`, until
    /// `stop()` is called from another thread. Restores persisted state
    /// once up front.
    ///
    /// # Errors
    /// Propagates [`SkedgeError::BadSchedule`] from `check`.
    pub fn start(&mut self) -> Result<()> {
        self.restore_all_job_logs()?;
        self.running.store(true, Ordering::SeqCst);
        while self.running.load(Ordering::SeqCst) {
            self.check()?;
            std::thread::sleep(self.check_interval);
        }
        Ok(())
    }

    /// A handle that, when called, stops a running `start()` loop.
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Block until every in-flight parallel job worker has finished,
    /// without stopping the dispatch loop.
    pub fn join(&mut self) {
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }

    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// JSON snapshot of every registered job, for the monitor API.
    #[must_use]
    pub fn jobs_json(&self) -> Vec<serde_json::Value> {
        self.jobs
            .iter()
            .map(|j| j.lock().expect("job mutex poisoned").to_json())
            .collect()
    }

    /// JSON snapshot of one job by id.
    #[must_use]
    pub fn job_json(&self, id: &str) -> Option<serde_json::Value> {
        self.jobs.iter().find_map(|j| {
            let guard = j.lock().expect("job mutex poisoned");
            (guard.id() == id).then(|| guard.to_json())
        })
    }

    /// `(total, running, errored)` counts, for the monitor's summary
    /// endpoint.
    #[must_use]
    pub fn summary_counts(&self) -> (usize, usize, usize) {
        let mut running = 0;
        let mut errors = 0;
        for j in &self.jobs {
            let guard = j.lock().expect("job mutex poisoned");
            if guard.record.is_running() {
                running += 1;
            }
            if guard.record.did_fail() {
                errors += 1;
            }
        }
        (self.jobs.len(), running, errors)
    }

    /// Per-job `{id, state, signature, prev_run, next_run}` rows, for the
    /// monitor's summary endpoint.
    #[must_use]
    pub fn summary_details(&self) -> Vec<serde_json::Value> {
        self.jobs
            .iter()
            .map(|j| {
                let guard = j.lock().expect("job mutex poisoned");
                serde_json::json!({
                    "id": guard.job_id(),
                    "state": guard.record.state_label(),
                    "signature": guard.function_signature(),
                    "prev_run": guard.record.started_at.as_ref().map(std::string::ToString::to_string),
                    "next_run": guard.next_run.as_ref().map(std::string::ToString::to_string),
                })
            })
            .collect()
    }

    #[must_use]
    pub fn next_run(&self) -> Option<Zoned> {
        self.jobs
            .iter()
            .filter_map(|j| j.lock().expect("job mutex poisoned").next_run.clone())
            .min()
    }

    /// Whole seconds until the next run, or `None` if no jobs are
    /// scheduled.
    ///
    /// # Errors
    /// Propagates a time-arithmetic error if the duration can't be
    /// rounded (should not happen for any reasonable schedule).
    pub fn idle_seconds(&self) -> Result<Option<i64>> {
        let now = self.now();
        self.next_run()
            .map(|next| {
                now.until(&next)
                    .and_then(|span| span.round(SpanRound::new().largest(Unit::Second)))
                    .map(|span| span.get_seconds())
                    .map_err(|e| SkedgeError::BadSchedule(format!("idle_seconds: {e}")))
            })
            .transpose()
    }
}

impl Timekeeper for Scheduler {
    fn now(&self) -> Zoned {
        self.clock.now()
    }

    fn add_duration(&mut self, span: jiff::Span) {
        self.clock.add_duration(span);
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("job_count", &self.jobs.len())
            .field("persist_states", &self.persist_states)
            .finish()
    }
}

/// `StateStore::restore_all` wants `&mut [Job]`; since `Job` isn't
/// `Clone` we can't collect owned copies out of the mutex guards, so
/// each job is restored through its own one-element slice instead.
fn restore_via_refs(store: &dyn StateStore, jobs: &mut [&mut Job]) -> Result<()> {
    for job in jobs.iter_mut() {
        let slice = std::slice::from_mut(&mut **job);
        store.restore_all(slice)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::NoHolidays;
    use crate::callable::{Callable, FnCallable, Kwargs};
    use crate::job::JobBuilder;
    use crate::schedule::DayKind;
    use crate::time::mock::{start, Mock};
    use jiff::ToSpan as _;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn noop(_: &Kwargs) -> anyhow::Result<()> {
        Ok(())
    }

    fn setup() -> Scheduler {
        Scheduler::with_mock_clock(Mock::default())
    }

    fn make_job(name: &str) -> Job {
        let callable: Arc<dyn Callable> = Arc::new(FnCallable::new(name, noop));
        JobBuilder::new(name, callable)
            .calendar(Arc::new(NoHolidays))
            .day_class(DayKind::Day, vec![jiff::civil::time(13, 0, 0, 0)])
            .build()
            .unwrap()
    }

    #[test]
    fn schedule_and_check_runs_due_job() -> Result<()> {
        let mut sched = setup();
        sched.schedule(make_job("job-a"))?;
        assert_eq!(sched.job_count(), 1);
        sched.add_duration(2.days());
        sched.check()?;
        let job = sched.find("job-a")?.lock().unwrap();
        assert_eq!(job.call_count, 1);
        Ok(())
    }

    #[test]
    fn unknown_job_id_is_invalid_job_id() {
        let mut sched = setup();
        let err = sched.rerun("nope").unwrap_err();
        assert!(matches!(err, SkedgeError::InvalidJobId(_)));
    }

    #[test]
    fn idle_seconds_tracks_soonest_job() -> Result<()> {
        let mut sched = setup();
        sched.schedule(make_job("job-a"))?;
        assert!(sched.idle_seconds()?.is_some());
        Ok(())
    }

    #[test]
    fn schedule_assigns_dense_incrementing_job_ids() -> Result<()> {
        let mut sched = setup();
        sched.schedule(make_job("job-a"))?;
        sched.schedule(make_job("job-b"))?;
        let a = sched.find("job-a")?.lock().unwrap().job_id();
        let b = sched.find("job-b")?.lock().unwrap().job_id();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        Ok(())
    }

    #[test]
    fn rerun_of_serial_job_runs_on_a_detached_worker() -> Result<()> {
        let mut sched = setup();
        sched.schedule(make_job("job-a"))?;
        sched.rerun("job-a")?;
        sched.join();
        let job = sched.find("job-a")?.lock().unwrap();
        assert_eq!(job.call_count, 1);
        Ok(())
    }

    #[test]
    fn disable_then_check_does_not_run() -> Result<()> {
        let mut sched = setup();
        sched.schedule(make_job("job-a"))?;
        sched.disable("job-a")?;
        sched.add_duration(2.days());
        sched.check()?;
        let job = sched.find("job-a")?.lock().unwrap();
        assert_eq!(job.call_count, 0);
        Ok(())
    }
}
