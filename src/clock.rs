// Wall clock and local calendar dates

use chrono::{DateTime, Datelike, Days, FixedOffset, Local, Months, NaiveDate, NaiveTime, Offset, TimeDelta, TimeZone, Utc};

/// Source of the current instant and the local UTC offset
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    fn offset(&self) -> FixedOffset;

    fn today(&self) -> Today {
        Today::from_instant(self.now(), self.offset())
    }
}

/// The system clock in the machine's local timezone
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn offset(&self) -> FixedOffset {
        *Local::now().offset()
    }
}

/// A clock frozen at one instant, UTC unless told otherwise
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    now: DateTime<Utc>,
    offset: FixedOffset,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now, offset: Utc.fix() }
    }

    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}

/// Today's local date, plus the offset needed to place timestamps on the
/// local calendar. All due-date comparisons work on dates truncated this way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Today {
    date: NaiveDate,
    offset: FixedOffset,
}

impl Today {
    pub fn new(date: NaiveDate, offset: FixedOffset) -> Self {
        Self { date, offset }
    }

    pub fn from_instant(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            date: now.with_timezone(&offset).date_naive(),
            offset,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Local calendar date of a timestamp
    pub fn local_date(&self, ts: &DateTime<Utc>) -> NaiveDate {
        ts.with_timezone(&self.offset).date_naive()
    }

    /// Last day of the current week: today + (7 - days since Sunday)
    pub fn end_of_week(&self) -> NaiveDate {
        let since_sunday = self.date.weekday().num_days_from_sunday();
        self.date + Days::new(u64::from(7 - since_sunday))
    }

    /// Last day of the current month
    pub fn end_of_month(&self) -> NaiveDate {
        last_day_of_month(self.date.year(), self.date.month()).unwrap_or(self.date)
    }

    /// Local midnight of `date`, as a UTC instant
    pub fn start_of(&self, date: NaiveDate) -> DateTime<Utc> {
        let local = date.and_time(NaiveTime::MIN);
        let utc = local - TimeDelta::seconds(i64::from(self.offset.local_minus_utc()));
        Utc.from_utc_datetime(&utc)
    }
}

/// Last calendar day of the given month, `None` if the month is invalid
pub fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)?
        .checked_add_months(Months::new(1))?
        .pred_opt()
}
