//! A Job pairs a [`Callable`] with a [`Schedule`] and tracks its own
//! run history. Built through [`JobBuilder`], a stateless, self-consuming
//! builder that produces one immutable-shape `Job` per call to `build`.

use std::sync::{Arc, OnceLock};

use jiff::civil::Time;
use jiff::{tz::TimeZone, Span, Zoned};
use regex::Regex;
use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use crate::calendar::{HolidayCalendar, NoHolidays};
use crate::callable::{render_short, Callable, Kwargs};
use crate::error::{Result, SkedgeError};
use crate::record::{RunRecord, StdoutCapture};
use crate::schedule::{DayKind, NextCtx, Schedule};

fn daily_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-2]\d:)?[0-5]\d:[0-5]\d$").unwrap())
}

fn hourly_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-5]\d)?:[0-5]\d$").unwrap())
}

fn minute_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^:[0-5]\d$").unwrap())
}

/// Parse one of the `.at()` time-of-day strings the original interval
/// grammar accepts: `HH:MM:SS`, `MM:SS` (hourly), or `:SS` (minute-ly).
/// Here we only need the wall-clock time of day out of it, since
/// [`Schedule`] already carries which days it applies to.
pub fn parse_time_of_day(s: &str) -> Result<Time> {
    if daily_re().is_match(s) {
        let parts: Vec<&str> = s.split(':').collect();
        let (h, m, sec) = match parts.as_slice() {
            [h, m, s] => (h.parse().unwrap_or(0), m.parse().unwrap_or(0), s.parse().unwrap_or(0)),
            [m, s] => (0, m.parse().unwrap_or(0), s.parse().unwrap_or(0)),
            _ => return Err(SkedgeError::BadSchedule(format!("unparseable time {s}"))),
        };
        Time::new(h, m, sec, 0)
            .map_err(|e| SkedgeError::BadSchedule(format!("invalid time {s}: {e}")))
    } else if hourly_re().is_match(s) || minute_re().is_match(s) {
        let parts: Vec<&str> = s.trim_start_matches(':').split(':').collect();
        let (m, sec) = if s.starts_with(':') {
            (0, parts[0].parse().unwrap_or(0))
        } else {
            (parts[0].parse().unwrap_or(0), parts.get(1).and_then(|p| p.parse().ok()).unwrap_or(0))
        };
        Time::new(0, m, sec, 0)
            .map_err(|e| SkedgeError::BadSchedule(format!("invalid time {s}: {e}")))
    } else {
        Err(SkedgeError::BadSchedule(format!(
            "time string {s} doesn't match HH:MM:SS, MM:SS, or :SS"
        )))
    }
}

/// Stable across restarts: derived from the job's schedule shape, its
/// callable's name, and its rendered kwargs. Used as the state store key.
fn compute_signature_hash(name: &str, schedule: &Schedule, kwargs: &Kwargs) -> String {
    let mut hasher = Sha1::new();
    hasher.update(name.as_bytes());
    hasher.update(schedule.to_string().as_bytes());
    for (k, v) in kwargs {
        hasher.update(k.as_bytes());
        hasher.update(render_short(v).as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// A handler invoked with the job's name and the error it raised.
pub type ErrorHandler = Arc<dyn Fn(&str, &anyhow::Error) + Send + Sync>;

/// Stateless per-build configuration. Every method consumes and returns
/// `Self`; nothing here survives past `build()`.
pub struct JobBuilder {
    id: Option<String>,
    name: String,
    callable: Arc<dyn Callable>,
    kwargs: Kwargs,
    schedule: Option<Schedule>,
    tz: TimeZone,
    calendar: Arc<dyn HolidayCalendar>,
    silent: bool,
    do_parallel: bool,
    startup_grace_mins: u32,
    on_error: Option<ErrorHandler>,
    func_src: Option<String>,
    doc: Option<String>,
}

impl JobBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>, callable: Arc<dyn Callable>) -> Self {
        Self {
            id: None,
            name: name.into(),
            callable,
            kwargs: Kwargs::new(),
            schedule: None,
            tz: TimeZone::UTC,
            calendar: Arc::new(NoHolidays),
            silent: false,
            do_parallel: false,
            startup_grace_mins: 5,
            on_error: None,
            func_src: None,
            doc: None,
        }
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn kwargs(mut self, kwargs: Kwargs) -> Self {
        self.kwargs = kwargs;
        self
    }

    #[must_use]
    pub fn day_class(mut self, kind: DayKind, slots: Vec<Time>) -> Self {
        self.schedule = Some(Schedule::DayClass { kind, slots });
        self
    }

    /// `day_of_month` in `1..=31`; `strict` controls whether short months
    /// are skipped entirely (`true`) or clamped to their last day
    /// (`false`).
    pub fn monthly(mut self, day_of_month: i8, strict: bool, slots: Vec<Time>) -> Result<Self> {
        if !(1..=31).contains(&day_of_month) {
            return Err(SkedgeError::BadSchedule(format!(
                "day_of_month {day_of_month} out of range 1..=31"
            )));
        }
        self.schedule = Some(Schedule::Monthly {
            day_of_month,
            strict,
            slots,
        });
        Ok(self)
    }

    #[must_use]
    pub fn repeat_every(mut self, interval: Span) -> Self {
        self.schedule = Some(Schedule::Repeat { interval });
        self
    }

    #[must_use]
    pub fn once_at(mut self, at: Zoned) -> Self {
        self.schedule = Some(Schedule::OneShot { at });
        self
    }

    #[must_use]
    pub fn never(mut self) -> Self {
        self.schedule = Some(Schedule::Never);
        self
    }

    pub fn timezone(mut self, tz_name: &str) -> Result<Self> {
        self.tz = TimeZone::get(tz_name)
            .map_err(|e| SkedgeError::BadSchedule(format!("unknown timezone {tz_name}: {e}")))?;
        Ok(self)
    }

    #[must_use]
    pub fn calendar(mut self, calendar: Arc<dyn HolidayCalendar>) -> Self {
        self.calendar = calendar;
        self
    }

    /// Suppress the start/end banner lines a run otherwise logs.
    #[must_use]
    pub fn silently(mut self) -> Self {
        self.silent = true;
        self
    }

    #[must_use]
    pub fn do_parallel(mut self) -> Self {
        self.do_parallel = true;
        self
    }

    #[must_use]
    pub fn startup_grace_mins(mut self, mins: u32) -> Self {
        self.startup_grace_mins = mins;
        self
    }

    #[must_use]
    pub fn catch(mut self, handler: ErrorHandler) -> Self {
        self.on_error = Some(handler);
        self
    }

    /// Attach cosmetic source/doc text, shown by `to_dict`'s `src`/`doc`
    /// fields. Entirely optional - nothing in dispatch depends on it.
    #[must_use]
    pub fn describe(mut self, src: impl Into<String>, doc: impl Into<String>) -> Self {
        self.func_src = Some(src.into());
        self.doc = Some(doc.into());
        self
    }

    /// Finalize. Fails if no schedule was configured.
    pub fn build(self) -> Result<Job> {
        let schedule = self
            .schedule
            .ok_or_else(|| SkedgeError::BadSchedule("job has no schedule".into()))?;
        let id = self.id.unwrap_or_else(|| self.name.clone());
        let signature_hash = compute_signature_hash(&self.name, &schedule, &self.kwargs);
        Ok(Job {
            id,
            name: self.name,
            callable: self.callable,
            kwargs: self.kwargs,
            schedule,
            tz: self.tz,
            calendar: self.calendar,
            silent: self.silent,
            do_parallel: self.do_parallel,
            startup_grace_mins: self.startup_grace_mins,
            on_error: self.on_error,
            func_src: self.func_src,
            doc: self.doc,
            signature_hash,
            disabled: false,
            job_id: 0,
            next_run: None,
            call_count: 0,
            record: RunRecord::default(),
        })
    }
}

/// A scheduled unit of work plus its own run history.
pub struct Job {
    id: String,
    name: String,
    callable: Arc<dyn Callable>,
    kwargs: Kwargs,
    schedule: Schedule,
    tz: TimeZone,
    calendar: Arc<dyn HolidayCalendar>,
    silent: bool,
    do_parallel: bool,
    startup_grace_mins: u32,
    on_error: Option<ErrorHandler>,
    func_src: Option<String>,
    doc: Option<String>,
    signature_hash: String,
    disabled: bool,
    pub(crate) job_id: u64,
    pub(crate) next_run: Option<Zoned>,
    pub(crate) call_count: u32,
    pub(crate) record: RunRecord,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("disabled", &self.disabled)
            .field("next_run", &self.next_run)
            .finish()
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} do {}({})", self.schedule, self.name, self.function_signature())
    }
}

impl Job {
    /// Start building a job named `name` around `callable`.
    #[must_use]
    pub fn builder(name: impl Into<String>, callable: Arc<dyn Callable>) -> JobBuilder {
        JobBuilder::new(name, callable)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Process-local dense integer id, assigned by the scheduler at
    /// registration time. `0` until then.
    #[must_use]
    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn enable(&mut self) {
        self.disabled = false;
    }

    pub fn disable(&mut self) {
        self.disabled = true;
    }

    #[must_use]
    pub fn is_parallel(&self) -> bool {
        self.do_parallel
    }

    #[must_use]
    pub fn signature_hash(&self) -> &str {
        &self.signature_hash
    }

    /// The next scheduled run instant, or `None` if this job has no
    /// future run pending (exhausted one-shot, or a `Never` schedule).
    #[must_use]
    pub fn next_run(&self) -> Option<&Zoned> {
        self.next_run.as_ref()
    }

    /// e.g. `my_job(amount=123.4.., name=hello.)`, matching the original's
    /// `readable_trim` rendering.
    #[must_use]
    pub fn function_signature(&self) -> String {
        let args = self
            .kwargs
            .iter()
            .map(|(k, v)| format!("{k}={}", render_short(v)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({args})", self.name)
    }

    /// Recompute `next_run` given whether the job just finished running.
    pub fn schedule_next_run(&mut self, now: &Zoned, just_ran: bool) -> Result<()> {
        let ctx = NextCtx {
            now,
            tz: &self.tz,
            calendar: self.calendar.as_ref(),
            just_ran,
            startup_grace_mins: self.startup_grace_mins,
            prev_next_fire: self.next_run.as_ref(),
        };
        self.next_run = self.schedule.next(&ctx)?;
        Ok(())
    }

    /// Whether this job is due to run at `now`. A disabled or currently
    /// running job is never due.
    #[must_use]
    pub fn is_due(&self, now: &Zoned) -> bool {
        if self.disabled || self.record.is_running() {
            return false;
        }
        match &self.next_run {
            Some(next) => now >= next,
            None => false,
        }
    }

    /// Execute the callable, capturing its log output and updating the
    /// run record and next scheduled time. Returns `false` if this was a
    /// one-shot job that has now run and should be removed from the
    /// scheduler.
    ///
    /// # Errors
    /// Propagates [`SkedgeError::CallableError`] if the callable failed
    /// and no `catch` handler swallowed it.
    pub fn run(&mut self, now: &Zoned, is_rerun: bool) -> Result<bool> {
        self.record.mark_started(now.clone());
        let capture = StdoutCapture::start(self.silent, None);
        if !self.silent {
            debug!(job = self.name, "====== Job Start ======");
        }
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.callable.call(&self.kwargs)
        }));
        if !self.silent {
            debug!(job = self.name, "====== Job End ======");
        }
        let log = capture.finish();
        let call_result = match outcome {
            Ok(r) => r,
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "job panicked".to_string());
                Err(anyhow::anyhow!(msg))
            }
        };

        self.call_count += 1;
        let end = now.clone();
        let mut propagate: Option<SkedgeError> = None;
        match &call_result {
            Ok(()) => {
                self.record.mark_finished(end.clone(), log, None);
            }
            Err(e) => {
                let formatted = format!("{e:?}");
                self.record.mark_finished(end.clone(), log, Some(formatted.clone()));
                warn!(job = self.name, error = %formatted, "job failed");
                if let Some(handler) = &self.on_error {
                    handler(&self.name, e);
                } else {
                    propagate = Some(SkedgeError::CallableError {
                        job: self.name.clone(),
                        source: anyhow::anyhow!(formatted),
                    });
                }
            }
        }

        // Reschedule in all cases (success, handled failure, or
        // unhandled failure we're about to propagate) unless this was an
        // ad hoc rerun, which doesn't touch the regular cadence.
        let keep_going = if is_rerun {
            !matches!(self.schedule, Schedule::OneShot { .. })
        } else {
            self.schedule_next_run(&end, true)?;
            self.next_run.is_some() || matches!(self.schedule, Schedule::Never)
        };

        match propagate {
            Some(e) => Err(e),
            None => Ok(keep_going),
        }
    }

    /// Render this job as the `job_dict` JSON contract.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "jobid": self.job_id,
            "func": self.name,
            "signature": self.function_signature(),
            "src": self.func_src,
            "doc": self.doc,
            "type": self.schedule.type_name(),
            "every": self.schedule.every_json(),
            "at": self.schedule.at_json(),
            "tzname": self.tz.iana_name(),
            "is_running": self.record.is_running(),
            "is_disabled": self.disabled,
            "next_run": self.next_run.as_ref().map(std::string::ToString::to_string),
            "logs": {
                "log": self.record.log,
                "err": self.record.error,
                "start": self.record.started_at.as_ref().map(std::string::ToString::to_string),
                "end": self.record.ended_at.as_ref().map(std::string::ToString::to_string),
            },
        })
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.next_run.cmp(&other.next_run)
    }
}
