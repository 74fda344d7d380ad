use std::cell::Cell;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};

/// Source of wall-clock and monotonic time.
///
/// Every date decision (created stamps, completion dates, relative dates,
/// retention) goes through `now`; timers use `instant`.
pub trait Clock {
    fn now(&self) -> DateTime<Local>;

    fn instant(&self) -> Instant;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        self.now().with_timezone(&Utc)
    }

    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to. Wall and monotonic time advance together.
#[derive(Debug)]
pub struct FixedClock {
    wall: Cell<DateTime<Local>>,
    mono: Cell<Instant>,
}

impl FixedClock {
    pub fn new(wall: DateTime<Local>) -> Self {
        FixedClock {
            wall: Cell::new(wall),
            mono: Cell::new(Instant::now()),
        }
    }

    /// Local time on the given date and hour. Falls back to the Unix epoch
    /// for impossible dates.
    pub fn at(date: NaiveDate, hour: u32) -> Self {
        let wall = date
            .and_hms_opt(hour, 0, 0)
            .and_then(|naive| Local.from_local_datetime(&naive).earliest())
            .unwrap_or_else(|| DateTime::<Utc>::default().with_timezone(&Local));
        Self::new(wall)
    }

    pub fn advance(&self, by: Duration) {
        self.mono.set(self.mono.get() + by);
        if let Ok(delta) = chrono::Duration::from_std(by) {
            self.wall.set(self.wall.get() + delta);
        }
    }

    pub fn advance_days(&self, days: u64) {
        self.advance(Duration::from_secs(days * 24 * 60 * 60));
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        self.wall.get()
    }

    fn instant(&self) -> Instant {
        self.mono.get()
    }
}
