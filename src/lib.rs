//! # skedge
//!
//! An embeddable task scheduler for long-running processes: named
//! callables paired with flexible wall-clock schedules, captured run
//! records, pluggable persistence, and a JSON monitoring/control surface
//! an embedder can wire into whatever HTTP framework it already uses.
//!
//! ```rust
//! use std::sync::Arc;
//! use skedge::{Callable, DayKind, FnCallable, Job, Kwargs, Scheduler};
//!
//! fn say_hello(_: &Kwargs) -> anyhow::Result<()> {
//!     println!("hello");
//!     Ok(())
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let callable: Arc<dyn Callable> = Arc::new(FnCallable::new("say_hello", say_hello));
//! let job = Job::builder("say_hello", callable)
//!     .day_class(DayKind::Day, vec![])
//!     .build()?;
//!
//! let mut scheduler = Scheduler::new().without_persistence();
//! scheduler.schedule(job)?;
//! scheduler.check()?;
//! # Ok(())
//! # }
//! ```

pub mod calendar;
pub mod callable;
pub mod error;
pub mod job;
pub mod monitor;
pub mod record;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod time;

pub use calendar::{HolidayCalendar, NoHolidays};
pub use callable::{render_short, ArgValue, Callable, FnCallable, Kwargs};
pub use error::{Result, SkedgeError};
pub use job::{ErrorHandler, Job, JobBuilder};
pub use monitor::{ApiToken, MonitorApi, ReadOnlyMonitorApi};
pub use record::{RunRecord, StdoutCapture};
pub use schedule::{DayKind, NextCtx, Schedule};
pub use scheduler::Scheduler;
pub use store::fs::FilesystemStore;
pub use store::sql::SqlStore;
pub use store::{AppIdentity, PersistedJobState, StateStore};
pub use time::{Clock, Real, Timekeeper};
