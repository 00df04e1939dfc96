//! Wall-clock abstraction. Production code uses [`Real`]; tests (and
//! embedders testing their own schedules) drive [`mock::Mock`] forward by
//! hand instead of sleeping.

use jiff::{tz::TimeZone, Zoned};

/// Anything that can report "now".
pub trait Timekeeper: std::fmt::Debug {
    fn now(&self) -> Zoned;

    /// Advance a mock clock. Panics if called on [`Clock::Real`].
    fn add_duration(&mut self, span: jiff::Span);
}

/// Either the real system clock or a mock one under test.
#[derive(Debug)]
pub enum Clock {
    Real(Real),
    Mock(mock::Mock),
}

impl Default for Clock {
    fn default() -> Self {
        Clock::Real(Real)
    }
}

impl Timekeeper for Clock {
    fn now(&self) -> Zoned {
        match self {
            Clock::Real(r) => r.now(),
            Clock::Mock(m) => m.now(),
        }
    }

    fn add_duration(&mut self, span: jiff::Span) {
        match self {
            Clock::Real(_) => unreachable!("cannot advance the real clock"),
            Clock::Mock(m) => m.add_duration(span),
        }
    }
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct Real;

impl Real {
    #[must_use]
    pub fn now(&self) -> Zoned {
        Zoned::now()
    }

    #[must_use]
    pub fn now_in(&self, tz: &TimeZone) -> Zoned {
        Zoned::now().with_time_zone(tz.clone())
    }
}

/// A mock clock, public so embedders can drive schedules deterministically
/// in their own tests, not just ours.
pub mod mock {
    use jiff::{civil, Zoned};

    /// Fixed starting instant used across the test suite.
    #[must_use]
    pub fn start() -> Zoned {
        civil::date(2024, 1, 1)
            .at(12, 0, 0, 0)
            .intz("America/New_York")
            .expect("valid fixed zone")
    }

    #[derive(Debug, Clone)]
    pub struct Mock {
        stamp: Zoned,
    }

    impl Default for Mock {
        fn default() -> Self {
            Self { stamp: start() }
        }
    }

    impl Mock {
        #[must_use]
        pub fn new(stamp: Zoned) -> Self {
            Self { stamp }
        }

        #[must_use]
        pub fn now(&self) -> Zoned {
            self.stamp.clone()
        }

        pub fn add_duration(&mut self, span: jiff::Span) {
            self.stamp = self.stamp.checked_add(span).expect("mock clock overflow");
        }
    }
}
