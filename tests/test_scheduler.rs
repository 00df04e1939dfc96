//! Integration tests exercising the public API end to end: building jobs
//! of every schedule kind, running them through a `Scheduler`, and round
//! tripping state through both persistence backends.
//!
//! Scenario coverage (registry/bad-interval/regular/day-of-week/holidays/
//! onetime/never/eom/monthly/repeat/error-callback/print-capture/
//! silent-run/job-rerun/job-disable/timezones/persistent-logs) is driven
//! by a mock clock instead of real sleeps.

use std::sync::{Arc, Mutex};

use jiff::civil;
use jiff::ToSpan as _;
use jiff::{SpanRound, Unit};
use pretty_assertions::assert_eq;

use skedge::time::mock::{start, Mock};
use skedge::{
    Callable, DayKind, FilesystemStore, FnCallable, HolidayCalendar, Job, JobBuilder, Kwargs,
    NoHolidays, Scheduler, SkedgeError, Timekeeper,
};

type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

fn noop(_: &Kwargs) -> anyhow::Result<()> {
    Ok(())
}

fn callable(name: &str) -> Arc<dyn Callable> {
    Arc::new(FnCallable::new(name, noop))
}

#[test]
fn registry_builds_every_schedule_kind() -> TestResult {
    let mut sched = Scheduler::with_mock_clock(Mock::default());
    sched.schedule(
        Job::builder("daily", callable("daily"))
            .day_class(DayKind::Businessday, vec![civil::time(10, 0, 0, 0)])
            .build()?,
    )?;
    sched.schedule(
        Job::builder("onetime", callable("onetime"))
            .once_at(start().checked_add(1.day())?)
            .build()?,
    )?;
    sched.schedule(
        Job::builder("repeat", callable("repeat"))
            .repeat_every(5.seconds())
            .build()?,
    )?;
    sched.schedule(
        Job::builder("monthly", callable("monthly"))
            .monthly(2, false, vec![civil::time(10, 0, 0, 0)])?
            .build()?,
    )?;
    assert_eq!(sched.job_count(), 4);
    Ok(())
}

#[test]
fn bad_schedule_rejects_invalid_day_of_month() {
    let err = JobBuilder::new("bad", callable("bad"))
        .monthly(32, false, vec![])
        .unwrap_err();
    assert!(matches!(err, SkedgeError::BadSchedule(_)));
}

#[test]
fn bad_schedule_rejects_deprecated_holiday_literal() {
    assert!(DayKind::parse("holiday").is_err());
}

#[test]
fn bad_schedule_rejects_unknown_timezone() {
    let err = JobBuilder::new("bad", callable("bad"))
        .timezone("Mars/Olympus_Mons")
        .unwrap_err();
    assert!(matches!(err, SkedgeError::BadSchedule(_)));
}

#[test]
fn daily_future_slot_same_day() -> TestResult {
    // Mock clock starts 2024-01-01 12:00 America/New_York.
    let mut job = JobBuilder::new("daily", callable("daily"))
        .calendar(Arc::new(NoHolidays))
        .day_class(DayKind::Day, vec![civil::time(23, 59, 0, 0)])
        .build()?;
    let now = start();
    job.schedule_next_run(&now, false)?;
    let next = job.next_run().cloned().expect("has a next run");
    assert_eq!(next.date(), now.date());
    assert_eq!(next.time(), civil::time(23, 59, 0, 0));
    Ok(())
}

#[test]
fn weekly_rollover_monday() -> TestResult {
    // 2024-01-01 is a Monday; schedule for 10:00 with mock now at 12:00,
    // so today's slot has already passed and the next fire is next Monday.
    let mut job = JobBuilder::new("monday", callable("monday"))
        .calendar(Arc::new(NoHolidays))
        .day_class(DayKind::Monday, vec![civil::time(10, 0, 0, 0)])
        .build()?;
    let now = start();
    job.schedule_next_run(&now, false)?;
    let next = job.next_run().cloned().expect("has a next run");
    let gap = now
        .until(&next)?
        .round(SpanRound::new().largest(Unit::Day))?
        .get_days();
    assert_eq!(gap, 7);
    Ok(())
}

#[derive(Debug)]
struct GoodFriday2020;

impl HolidayCalendar for GoodFriday2020 {
    fn contains(&self, date: civil::Date) -> bool {
        date == civil::date(2020, 4, 10)
    }
}

#[test]
fn businessday_skips_custom_holiday() -> TestResult {
    let mut job = JobBuilder::new("biz", callable("biz"))
        .calendar(Arc::new(GoodFriday2020))
        .day_class(DayKind::Businessday, vec![civil::time(10, 0, 0, 0)])
        .build()?;
    // Thursday 2020-04-09, before the slot: runs later today.
    let thursday = civil::date(2020, 4, 9)
        .at(8, 0, 0, 0)
        .intz("America/New_York")?;
    job.schedule_next_run(&thursday, false)?;
    assert_eq!(job.next_run().cloned().unwrap().date(), civil::date(2020, 4, 9));

    // After running on the 9th, Good Friday (holiday) and the weekend are
    // skipped, landing on Monday the 13th.
    job.schedule_next_run(&thursday, true)?;
    assert_eq!(job.next_run().cloned().unwrap().date(), civil::date(2020, 4, 13));
    Ok(())
}

#[test]
fn monthly_strict_vs_nonstrict() -> TestResult {
    let now = civil::date(2024, 2, 15)
        .at(0, 0, 0, 0)
        .intz("America/New_York")?;

    let mut nonstrict = JobBuilder::new("m1", callable("m1"))
        .calendar(Arc::new(NoHolidays))
        .monthly(31, false, vec![civil::time(23, 59, 0, 0)])?
        .build()?;
    nonstrict.schedule_next_run(&now, false)?;
    assert_eq!(
        nonstrict.next_run().cloned().unwrap().date(),
        civil::date(2024, 2, 29)
    );

    let mut strict = JobBuilder::new("m2", callable("m2"))
        .calendar(Arc::new(NoHolidays))
        .monthly(31, true, vec![civil::time(23, 59, 0, 0)])?
        .build()?;
    strict.schedule_next_run(&now, false)?;
    assert_eq!(
        strict.next_run().cloned().unwrap().date(),
        civil::date(2024, 3, 31)
    );
    Ok(())
}

#[test]
fn repeat_next_run_advances_by_exact_interval() -> TestResult {
    let mut sched = Scheduler::with_mock_clock(Mock::default());
    sched.schedule(
        Job::builder("heartbeat", callable("heartbeat"))
            .repeat_every(5.seconds())
            .build()?,
    )?;
    let first_next = sched.next_run().expect("scheduled");
    sched.add_duration(5.seconds());
    sched.check()?;
    let second_next = sched.next_run().expect("still scheduled");
    let gap = first_next
        .until(&second_next)?
        .round(SpanRound::new().largest(Unit::Second))?;
    assert_eq!(gap.get_seconds(), 5);
    Ok(())
}

#[test]
fn never_schedule_stays_dormant_but_rerun_executes() -> TestResult {
    let mut sched = Scheduler::with_mock_clock(Mock::default());
    let count = Arc::new(Mutex::new(0));
    let count2 = count.clone();
    let id = sched.schedule(
        Job::builder(
            "dormant",
            Arc::new(CountingCallable::new("dormant", move || {
                *count2.lock().unwrap() += 1;
            })),
        )
        .never()
        .build()?,
    )?;
    sched.add_duration(10.days());
    sched.check()?;
    assert_eq!(*count.lock().unwrap(), 0);
    assert_eq!(sched.job_count(), 1);

    sched.rerun(&id)?;
    sched.join();
    assert_eq!(*count.lock().unwrap(), 1);
    assert_eq!(sched.job_count(), 1);
    Ok(())
}

#[test]
fn oneshot_in_the_past_never_invoked() -> TestResult {
    let mut sched = Scheduler::with_mock_clock(Mock::default());
    let count = Arc::new(Mutex::new(0));
    let count2 = count.clone();
    sched.schedule(
        Job::builder(
            "stale",
            Arc::new(CountingCallable::new("stale", move || {
                *count2.lock().unwrap() += 1;
            })),
        )
        .once_at(start().checked_sub(1.day())?)
        .build()?,
    )?;
    sched.check()?;
    assert_eq!(*count.lock().unwrap(), 0);
    Ok(())
}

#[test]
fn oneshot_in_the_future_runs_once_then_is_dropped() -> TestResult {
    let mut sched = Scheduler::with_mock_clock(Mock::default());
    sched.schedule(
        Job::builder("future", callable("future"))
            .once_at(start().checked_add(1.day())?)
            .build()?,
    )?;
    sched.check()?;
    assert_eq!(sched.job_count(), 1, "not due yet");
    sched.add_duration(2.days());
    sched.check()?;
    assert_eq!(sched.job_count(), 0, "fired once and fell out of the list");
    Ok(())
}

#[test]
fn disable_enable_job_and_scheduler_level() -> TestResult {
    let mut sched = Scheduler::with_mock_clock(Mock::default());
    let count = Arc::new(Mutex::new(0));
    let count2 = count.clone();
    let id = sched.schedule(
        Job::builder(
            "tick",
            Arc::new(CountingCallable::new("tick", move || {
                *count2.lock().unwrap() += 1;
            })),
        )
        .repeat_every(1.second())
        .build()?,
    )?;
    sched.add_duration(2.seconds());
    sched.check()?;
    assert_eq!(*count.lock().unwrap(), 1);

    sched.disable(&id)?;
    sched.add_duration(2.seconds());
    sched.check()?;
    assert_eq!(*count.lock().unwrap(), 1, "disabled, did not run");

    sched.enable(&id)?;
    sched.add_duration(2.seconds());
    sched.check()?;
    assert_eq!(*count.lock().unwrap(), 2, "ran again after enable");

    sched.disable_all();
    sched.add_duration(2.seconds());
    sched.check()?;
    assert_eq!(*count.lock().unwrap(), 2);

    sched.enable_all();
    sched.add_duration(2.seconds());
    sched.check()?;
    assert_eq!(*count.lock().unwrap(), 3);
    Ok(())
}

#[test]
fn job_rerun_does_not_reschedule() -> TestResult {
    let mut sched = Scheduler::with_mock_clock(Mock::default());
    let count = Arc::new(Mutex::new(0));
    let count2 = count.clone();
    let id = sched.schedule(
        Job::builder(
            "weekly",
            Arc::new(CountingCallable::new("weekly", move || {
                *count2.lock().unwrap() += 1;
            })),
        )
        .day_class(DayKind::Monday, vec![civil::time(10, 0, 0, 0)])
        .build()?,
    )?;
    sched.add_duration(8.days());
    sched.check()?;
    let after_regular_run = sched.job_json(&id).unwrap()["next_run"].clone();

    sched.rerun(&id)?;
    sched.join();
    assert_eq!(*count.lock().unwrap(), 2);
    assert_eq!(sched.job_json(&id).unwrap()["next_run"], after_regular_run);
    Ok(())
}

#[test]
fn error_callback_specific_overrides_generic() -> TestResult {
    let mut sched = Scheduler::with_mock_clock(Mock::default());
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let generic_seen = seen.clone();
    sched = sched.on_job_error(Arc::new(move |name, _err| {
        generic_seen.lock().unwrap().push(format!("generic:{name}"));
    }));

    fn boom(_: &Kwargs) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("boom"))
    }

    sched.schedule(
        Job::builder("plain-fail", Arc::new(FnCallable::new("plain-fail", boom)))
            .repeat_every(1.second())
            .build()?,
    )?;

    let specific_seen = seen.clone();
    sched.schedule(
        Job::builder("caught-fail", Arc::new(FnCallable::new("caught-fail", boom)))
            .repeat_every(1.second())
            .catch(Arc::new(move |name, _err| {
                specific_seen.lock().unwrap().push(format!("specific:{name}"));
            }))
            .build()?,
    )?;

    sched.add_duration(2.seconds());
    sched.check()?;

    let seen = seen.lock().unwrap();
    assert!(seen.contains(&"generic:plain-fail".to_string()));
    assert!(seen.contains(&"specific:caught-fail".to_string()));
    assert!(!seen.contains(&"generic:caught-fail".to_string()));
    Ok(())
}

#[test]
fn silent_job_suppresses_banner_but_keeps_output() -> TestResult {
    fn chatty(_: &Kwargs) -> anyhow::Result<()> {
        tracing::info!("job output line");
        Ok(())
    }

    let mut sched = Scheduler::with_mock_clock(Mock::default());
    let loud_id = sched.schedule(
        Job::builder("loud", Arc::new(FnCallable::new("loud", chatty)))
            .repeat_every(1.second())
            .build()?,
    )?;
    let quiet_id = sched.schedule(
        Job::builder("quiet", Arc::new(FnCallable::new("quiet", chatty)))
            .repeat_every(1.second())
            .silently()
            .build()?,
    )?;
    sched.add_duration(2.seconds());
    sched.check()?;

    let loud_log = sched.job_json(&loud_id).unwrap()["logs"]["log"]
        .as_str()
        .unwrap()
        .to_string();
    let quiet_log = sched.job_json(&quiet_id).unwrap()["logs"]["log"]
        .as_str()
        .unwrap()
        .to_string();

    assert!(loud_log.contains("job output line"));
    assert!(loud_log.contains("======"));
    assert!(quiet_log.contains("job output line"));
    assert!(!quiet_log.contains("======"));
    Ok(())
}

#[test]
fn timezone_affects_computed_instant() -> TestResult {
    let now_utc = civil::date(2024, 6, 1).at(0, 0, 0, 0).intz("UTC")?;

    let mut ny = JobBuilder::new("ny", callable("ny"))
        .calendar(Arc::new(NoHolidays))
        .timezone("America/New_York")?
        .day_class(DayKind::Day, vec![civil::time(10, 0, 0, 0)])
        .build()?;
    ny.schedule_next_run(&now_utc, false)?;

    let mut tokyo = JobBuilder::new("tokyo", callable("tokyo"))
        .calendar(Arc::new(NoHolidays))
        .timezone("Asia/Tokyo")?
        .day_class(DayKind::Day, vec![civil::time(10, 0, 0, 0)])
        .build()?;
    tokyo.schedule_next_run(&now_utc, false)?;

    let ny_instant = ny.next_run().cloned().unwrap().timestamp();
    let tokyo_instant = tokyo.next_run().cloned().unwrap().timestamp();
    assert_ne!(ny_instant, tokyo_instant);
    Ok(())
}

#[test]
fn filesystem_persistence_round_trips_across_scheduler_restart() -> TestResult {
    let tmp = std::env::temp_dir().join(format!(
        "skedge-it-fs-{}-{}",
        std::process::id(),
        line!()
    ));
    let store = Arc::new(FilesystemStore::new(&tmp)?);

    let mut first = Scheduler::with_mock_clock(Mock::default()).with_store(store.clone());
    let id = first.schedule(
        Job::builder("persisted", callable("persisted"))
            .repeat_every(1.second())
            .build()?,
    )?;
    first.add_duration(2.seconds());
    first.check()?;
    let first_end = first.job_json(&id).unwrap()["logs"]["end"].clone();
    assert!(!first_end.is_null());

    let mut second = Scheduler::with_mock_clock(Mock::default()).with_store(store);
    second.schedule(
        Job::builder("persisted", callable("persisted"))
            .repeat_every(1.second())
            .build()?,
    )?;
    second.restore_all_job_logs()?;
    let restored_end = second.job_json(&id).unwrap()["logs"]["end"].clone();
    assert_eq!(restored_end, first_end);

    let _ = std::fs::remove_dir_all(&tmp);
    Ok(())
}

#[cfg(feature = "sqlite")]
#[test]
fn sqlite_persistence_round_trips_across_scheduler_restart() -> TestResult {
    use skedge::SqlStore;

    let tmp = std::env::temp_dir().join(format!(
        "skedge-it-sqlite-{}-{}.db",
        std::process::id(),
        line!()
    ));
    let store = Arc::new(SqlStore::open(&tmp, "skedge-integration-test")?);

    let mut first = Scheduler::with_mock_clock(Mock::default()).with_store(store.clone());
    let id = first.schedule(
        Job::builder("persisted", callable("persisted"))
            .repeat_every(1.second())
            .build()?,
    )?;
    first.add_duration(2.seconds());
    first.check()?;
    let first_end = first.job_json(&id).unwrap()["logs"]["end"].clone();
    assert!(!first_end.is_null());

    let mut second = Scheduler::with_mock_clock(Mock::default()).with_store(store);
    second.schedule(
        Job::builder("persisted", callable("persisted"))
            .repeat_every(1.second())
            .build()?,
    )?;
    second.restore_all_job_logs()?;
    let restored_end = second.job_json(&id).unwrap()["logs"]["end"].clone();
    assert_eq!(restored_end, first_end);

    let _ = std::fs::remove_file(&tmp);
    Ok(())
}

/// A `Callable` that invokes an arbitrary closure, for tests that need to
/// observe a call count without a free-standing `fn`.
struct CountingCallable<F: Fn() + Send + Sync> {
    name: String,
    work: F,
}

impl<F: Fn() + Send + Sync> CountingCallable<F> {
    fn new(name: impl Into<String>, work: F) -> Self {
        Self {
            name: name.into(),
            work,
        }
    }
}

impl<F: Fn() + Send + Sync> std::fmt::Debug for CountingCallable<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "CountingCallable(name={})", self.name)
    }
}

impl<F: Fn() + Send + Sync> Callable for CountingCallable<F> {
    fn call(&self, _kwargs: &Kwargs) -> anyhow::Result<()> {
        (self.work)();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
