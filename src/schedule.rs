//! The schedule model: a closed set of variants, each answering one
//! question - "what's the next run, given now and whether we just ran?"
//!
//! Grounded on the RUNABLE_DAYS dispatch table and per-class
//! `schedule_next_run` methods of the original job hierarchy, folded into
//! a single tagged union per the "closed variant, one `next()` op" design
//! note rather than five separate subclasses.

use crate::calendar::HolidayCalendar;
use crate::error::{Result, SkedgeError};
use jiff::civil::{Date, Time, Weekday};
use jiff::{tz::TimeZone, Span, ToSpan as _, Zoned};

/// Which days a [`Schedule::DayClass`] is allowed to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DayKind {
    Day,
    Weekday,
    Weekend,
    Businessday,
    TradingHoliday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
    Eom,
    EomWeekday,
    EomBusinessday,
}

impl DayKind {
    /// Parse from the interval-grammar literal. The deprecated `holiday`
    /// literal is rejected outright - callers must say `weekend` or
    /// `trading-holiday`.
    pub fn parse(s: &str) -> Result<Self> {
        use DayKind::{
            Businessday, Day, Eom, EomBusinessday, EomWeekday, Friday, Monday, Saturday, Sunday,
            Thursday, TradingHoliday, Tuesday, Weekday, Weekend, Wednesday,
        };
        Ok(match s {
            "day" => Day,
            "weekday" => Weekday,
            "weekend" => Weekend,
            "businessday" => Businessday,
            "trading-holiday" => TradingHoliday,
            "monday" => Monday,
            "tuesday" => Tuesday,
            "wednesday" => Wednesday,
            "thursday" => Thursday,
            "friday" => Friday,
            "saturday" => Saturday,
            "sunday" => Sunday,
            "eom" => Eom,
            "eom-weekday" => EomWeekday,
            "eom-businessday" => EomBusinessday,
            "holiday" => {
                return Err(SkedgeError::BadSchedule(
                    "'holiday' is deprecated and ambiguous; use 'weekend' or 'trading-holiday'"
                        .into(),
                ))
            }
            other => return Err(SkedgeError::BadSchedule(format!("unknown day kind {other}"))),
        })
    }

    fn matches(self, date: Date, calendar: &dyn HolidayCalendar) -> bool {
        let is_weekend = matches!(date.weekday(), Weekday::Saturday | Weekday::Sunday);
        let is_holiday = calendar.contains(date);
        match self {
            DayKind::Day => true,
            DayKind::Weekday => !is_weekend,
            DayKind::Weekend => is_weekend,
            DayKind::Businessday => !is_weekend && !is_holiday,
            DayKind::TradingHoliday => is_holiday,
            DayKind::Monday => date.weekday() == Weekday::Monday,
            DayKind::Tuesday => date.weekday() == Weekday::Tuesday,
            DayKind::Wednesday => date.weekday() == Weekday::Wednesday,
            DayKind::Thursday => date.weekday() == Weekday::Thursday,
            DayKind::Friday => date.weekday() == Weekday::Friday,
            DayKind::Saturday => date.weekday() == Weekday::Saturday,
            DayKind::Sunday => date.weekday() == Weekday::Sunday,
            DayKind::Eom => is_eom(date),
            DayKind::EomWeekday => is_eom_weekday(date),
            DayKind::EomBusinessday => is_eom_businessday(date, calendar),
        }
    }
}

fn is_eom(date: Date) -> bool {
    date.day() == days_in_month(date)
}

fn days_in_month(date: Date) -> i8 {
    date.last_of_month().day()
}

/// The date is the last weekday on/before end of month.
fn is_eom_weekday(date: Date) -> bool {
    let last = date.last_of_month();
    let last_weekday = last_business_like_day(last, |d| {
        matches!(d.weekday(), Weekday::Saturday | Weekday::Sunday)
    });
    date == last_weekday
}

/// The date is the last business day (weekday & non-holiday) on/before
/// end of month.
fn is_eom_businessday(date: Date, calendar: &dyn HolidayCalendar) -> bool {
    let last = date.last_of_month();
    let last_biz = last_business_like_day(last, |d| {
        matches!(d.weekday(), Weekday::Saturday | Weekday::Sunday) || calendar.contains(*d)
    });
    date == last_biz
}

fn last_business_like_day(mut d: Date, skip: impl Fn(&Date) -> bool) -> Date {
    while skip(&d) {
        d = d.yesterday().expect("date underflow");
    }
    d
}

/// Context passed into [`Schedule::next`].
pub struct NextCtx<'a> {
    pub now: &'a Zoned,
    pub tz: &'a TimeZone,
    pub calendar: &'a dyn HolidayCalendar,
    pub just_ran: bool,
    pub startup_grace_mins: u32,
    /// The run instant this job was scheduled for before it fired, i.e.
    /// the `next_fire_ts` that made it due. Only meaningful when
    /// `just_ran` is set - `Repeat` anchors its next interval on this
    /// instead of `now` so tick jitter never accumulates.
    pub prev_next_fire: Option<&'a Zoned>,
}

/// The closed set of schedule kinds a job can have.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Run on days matching `kind`, at one or more times of day.
    DayClass { kind: DayKind, slots: Vec<Time> },
    /// Run on a specific day-of-month (1-31), clamped to end-of-month.
    /// `strict` means a day-of-month past the month's length never runs
    /// early - it waits for the *next* month that has that day (if
    /// `false`, the last day of shorter months stands in).
    Monthly {
        day_of_month: i8,
        strict: bool,
        slots: Vec<Time>,
    },
    /// Run every `interval`, starting from `just_ran` or now.
    Repeat { interval: Span },
    /// Run exactly once at a fixed instant.
    OneShot { at: Zoned },
    /// Never runs; used for jobs that are registered but dormant.
    Never,
}

impl std::fmt::Display for DayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            DayKind::Day => "day",
            DayKind::Weekday => "weekday",
            DayKind::Weekend => "weekend",
            DayKind::Businessday => "businessday",
            DayKind::TradingHoliday => "trading-holiday",
            DayKind::Monday => "monday",
            DayKind::Tuesday => "tuesday",
            DayKind::Wednesday => "wednesday",
            DayKind::Thursday => "thursday",
            DayKind::Friday => "friday",
            DayKind::Saturday => "saturday",
            DayKind::Sunday => "sunday",
            DayKind::Eom => "eom",
            DayKind::EomWeekday => "eom-weekday",
            DayKind::EomBusinessday => "eom-businessday",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Schedule::DayClass { kind, slots } => {
                write!(f, "every {kind}")?;
                if !slots.is_empty() {
                    write!(f, " at {:?}", slots)?;
                }
                Ok(())
            }
            Schedule::Monthly {
                day_of_month,
                strict,
                ..
            } => {
                write!(f, "monthly on day {day_of_month}")?;
                if *strict {
                    write!(f, " [strict]")?;
                }
                Ok(())
            }
            Schedule::Repeat { interval } => write!(f, "every {interval}"),
            Schedule::OneShot { at } => write!(f, "once at {at}"),
            Schedule::Never => write!(f, "never"),
        }
    }
}

impl Schedule {
    /// Variant name as used in the `job_dict` JSON contract's `type` key.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Schedule::DayClass { .. } => "DayClass",
            Schedule::Monthly { .. } => "Monthly",
            Schedule::Repeat { .. } => "Repeat",
            Schedule::OneShot { .. } => "OneShot",
            Schedule::Never => "Never",
        }
    }

    /// The `every` value of the `job_dict` JSON contract: the day kind or
    /// day-of-month for the calendar-driven variants, the interval in
    /// seconds for `Repeat`, `null` otherwise.
    #[must_use]
    pub fn every_json(&self) -> serde_json::Value {
        match self {
            Schedule::DayClass { kind, .. } => serde_json::Value::String(kind.to_string()),
            Schedule::Monthly { day_of_month, .. } => serde_json::json!(day_of_month),
            Schedule::Repeat { interval } => {
                let secs = interval
                    .round(jiff::SpanRound::new().largest(jiff::Unit::Second))
                    .map(|s| s.get_seconds())
                    .unwrap_or_default();
                serde_json::json!(secs)
            }
            Schedule::OneShot { .. } | Schedule::Never => serde_json::Value::Null,
        }
    }

    /// The `at` value of the `job_dict` JSON contract: the slot list for
    /// the calendar-driven variants, the fixed instant for `OneShot`,
    /// `null` otherwise.
    #[must_use]
    pub fn at_json(&self) -> serde_json::Value {
        match self {
            Schedule::DayClass { slots, .. } | Schedule::Monthly { slots, .. } => {
                if slots.is_empty() {
                    serde_json::Value::Null
                } else if slots.len() == 1 {
                    serde_json::Value::String(slots[0].to_string())
                } else {
                    serde_json::json!(slots.iter().map(std::string::ToString::to_string).collect::<Vec<_>>())
                }
            }
            Schedule::OneShot { at } => serde_json::Value::String(at.to_string()),
            Schedule::Repeat { .. } | Schedule::Never => serde_json::Value::Null,
        }
    }

    /// Compute the next run instant, or `None` if this schedule will
    /// never run again.
    pub fn next(&self, ctx: &NextCtx) -> Result<Option<Zoned>> {
        match self {
            Schedule::Never => Ok(None),
            Schedule::OneShot { at } => {
                if ctx.just_ran {
                    return Ok(None);
                }
                let grace = i64::from(ctx.startup_grace_mins).minutes();
                let deadline = at.checked_add(grace).map_err(|e| {
                    SkedgeError::BadSchedule(format!("one-shot grace overflow: {e}"))
                })?;
                // Fired or expired: settles permanently at no next run rather
                // than erroring, so registering a stale one-shot is harmless.
                if ctx.now > &deadline {
                    return Ok(None);
                }
                Ok(Some(at.clone()))
            }
            Schedule::Repeat { interval } => {
                // Anchor on the slot that just fired, not on `now`, so the
                // tick-loop's polling jitter never accumulates into drift.
                let base = match (ctx.just_ran, ctx.prev_next_fire) {
                    (true, Some(prev)) => prev,
                    _ => ctx.now,
                };
                Ok(Some(base.checked_add(interval.clone()).map_err(|e| {
                    SkedgeError::BadSchedule(format!("repeat interval overflow: {e}"))
                })?))
            }
            Schedule::DayClass { kind, slots } => next_day_class(*kind, slots, ctx),
            Schedule::Monthly {
                day_of_month,
                strict,
                slots,
            } => next_monthly(*day_of_month, *strict, slots, ctx),
        }
    }
}

fn next_day_class(kind: DayKind, slots: &[Time], ctx: &NextCtx) -> Result<Option<Zoned>> {
    let today = ctx.now.date();
    let today_candidates: Vec<Zoned> = candidate_slots(today, slots, ctx.tz)?;
    // If we haven't run yet today and a later slot today still qualifies,
    // use it. A slot already just in the past is still fair game within
    // the startup grace window, so a schedule booted a few minutes late
    // still fires once today instead of waiting a full day.
    if !ctx.just_ran && kind.matches(today, ctx.calendar) {
        let cutoff = grace_cutoff(ctx)?;
        if let Some(z) = today_candidates.into_iter().find(|z| z >= &cutoff) {
            return Ok(Some(z));
        }
    }
    let mut day = today.tomorrow().map_err(|e| {
        SkedgeError::BadSchedule(format!("date overflow computing next day: {e}"))
    })?;
    // EOM variants only ever land on one day per month; everything else
    // is checked daily. Bound the search so a bad predicate can't loop
    // forever.
    for _ in 0..400 {
        if kind.matches(day, ctx.calendar) {
            let candidates = candidate_slots(day, slots, ctx.tz)?;
            if let Some(z) = candidates.into_iter().next() {
                return Ok(Some(z));
            }
        }
        day = day
            .tomorrow()
            .map_err(|e| SkedgeError::BadSchedule(format!("date overflow: {e}")))?;
    }
    Err(SkedgeError::BadSchedule(
        "could not find a matching day within 400 days".into(),
    ))
}

fn candidate_slots(day: Date, slots: &[Time], tz: &TimeZone) -> Result<Vec<Zoned>> {
    let slots: &[Time] = if slots.is_empty() {
        std::slice::from_ref(&TIME_MIDNIGHT)
    } else {
        slots
    };
    let mut out = Vec::with_capacity(slots.len());
    for t in slots {
        let zdt = day
            .at(t.hour(), t.minute(), t.second(), 0)
            .to_zoned(tz.clone())
            .map_err(|e| SkedgeError::BadSchedule(format!("invalid local time: {e}")))?;
        out.push(zdt);
    }
    out.sort();
    Ok(out)
}

const TIME_MIDNIGHT: Time = Time::midnight();

/// The earliest instant a freshly-scheduled (non-rerun) slot may land on:
/// `now` itself once a job has already run, or `now - startup_grace` for
/// the initial scheduling pass, so a slot that lies just in the past at
/// boot still fires once instead of being skipped a full cycle.
fn grace_cutoff(ctx: &NextCtx) -> Result<Zoned> {
    if ctx.just_ran {
        return Ok(ctx.now.clone());
    }
    let grace = i64::from(ctx.startup_grace_mins).minutes();
    ctx.now
        .checked_sub(grace)
        .map_err(|e| SkedgeError::BadSchedule(format!("startup grace underflow: {e}")))
}

fn next_monthly(day_of_month: i8, strict: bool, slots: &[Time], ctx: &NextCtx) -> Result<Option<Zoned>> {
    // A month we just fired in is never a candidate again - start the
    // search from next month instead of re-finding today's slot.
    let mut candidate_month = if ctx.just_ran {
        first_of_next_month(ctx.now.date())?
    } else {
        ctx.now.date()
    };
    let cutoff = grace_cutoff(ctx)?;
    for _ in 0..36 {
        let target_day = effective_day(candidate_month, day_of_month, strict);
        if let Some(target_day) = target_day {
            let candidates = candidate_slots(target_day, slots, ctx.tz)?;
            if let Some(z) = candidates.into_iter().find(|z| z >= &cutoff) {
                return Ok(Some(z));
            }
        }
        candidate_month = first_of_next_month(candidate_month)?;
    }
    Err(SkedgeError::BadSchedule(
        "could not find a monthly run within 36 months".into(),
    ))
}

/// `None` when `strict` and this month is too short for `day_of_month`.
fn effective_day(month_anchor: Date, day_of_month: i8, strict: bool) -> Option<Date> {
    let days_in = days_in_month(month_anchor);
    if day_of_month <= days_in {
        Some(Date::new(month_anchor.year(), month_anchor.month(), day_of_month).ok()?)
    } else if strict {
        None
    } else {
        Some(month_anchor.last_of_month())
    }
}

fn first_of_next_month(d: Date) -> Result<Date> {
    let next = d
        .last_of_month()
        .tomorrow()
        .map_err(|e| SkedgeError::BadSchedule(format!("date overflow: {e}")))?;
    Ok(next)
}
