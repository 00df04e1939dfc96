// Varied usage examples against the new job/schedule API.

use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use jiff::civil;
use jiff::ToSpan as _;
use skedge::{Callable, DayKind, FnCallable, Job, Kwargs, Scheduler};

fn greet(kwargs: &Kwargs) -> anyhow::Result<()> {
    let now = jiff::Zoned::now();
    println!("Hello, it's {now}! kwargs: {kwargs:?}");
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut scheduler = Scheduler::new().without_persistence();

    let callable: Arc<dyn Callable> = Arc::new(FnCallable::new("greet", greet));

    // Every day at 10:30.
    scheduler.schedule(
        Job::builder("daily-greet", callable.clone())
            .day_class(DayKind::Day, vec![civil::time(10, 30, 0, 0)])
            .build()?,
    )?;

    // Only on weekdays, twice a day.
    scheduler.schedule(
        Job::builder("weekday-greet", callable.clone())
            .day_class(
                DayKind::Weekday,
                vec![civil::time(9, 0, 0, 0), civil::time(17, 0, 0, 0)],
            )
            .build()?,
    )?;

    // Last business day of the month.
    scheduler.schedule(
        Job::builder("month-end-greet", callable.clone())
            .day_class(DayKind::EomBusinessday, vec![civil::time(16, 0, 0, 0)])
            .build()?,
    )?;

    // Quiet, parallel-eligible repeating job.
    scheduler.schedule(
        Job::builder("heartbeat", callable)
            .repeat_every(30.seconds())
            .silently()
            .do_parallel()
            .build()?,
    )?;

    println!("Starting at {}", jiff::Zoned::now());
    loop {
        if let Err(e) = scheduler.check() {
            eprintln!("Error: {e}");
        }
        sleep(Duration::from_secs(1));
    }
}
