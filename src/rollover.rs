//! Rollover deadlines for timed rotating files.
//!
//! Fixed units (seconds, minutes, hours, days) roll over on multiples of the
//! interval counted from the Unix epoch, so every process configured with
//! the same interval switches files at the same wall-clock instant no matter
//! when it started. Midnight and weekday units follow the calendar of the
//! configured timezone instead.

use chrono::{DateTime, Datelike, Days, Duration, Local, NaiveDate, NaiveDateTime, TimeZone, Utc, Weekday};
use std::str::FromStr;

use crate::error::SetupError;

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Rollover unit, parsed from `S`, `M`, `H`, `D`, `MIDNIGHT` or `W0`..`W6`
/// (Monday is `W0`). Long forms such as `days` are accepted too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum When {
    Seconds,
    Minutes,
    Hours,
    Days,
    Midnight,
    Weekday(Weekday),
}

impl When {
    fn unit_secs(&self) -> i64 {
        match self {
            When::Seconds => 1,
            When::Minutes => 60,
            When::Hours => 60 * 60,
            When::Days | When::Midnight => 24 * 60 * 60,
            When::Weekday(_) => 7 * 24 * 60 * 60,
        }
    }

    pub fn is_calendar(&self) -> bool {
        matches!(self, When::Midnight | When::Weekday(_))
    }

    /// `strftime` pattern appended to rotated file names.
    pub fn suffix_format(&self) -> &'static str {
        match self {
            When::Seconds => "%Y-%m-%d_%H-%M-%S",
            When::Minutes => "%Y-%m-%d_%H-%M",
            When::Hours => "%Y-%m-%d_%H",
            When::Days | When::Midnight | When::Weekday(_) => "%Y-%m-%d",
        }
    }
}

impl FromStr for When {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.as_str() {
            "S" | "SECOND" | "SECONDS" => return Ok(When::Seconds),
            "M" | "MINUTE" | "MINUTES" => return Ok(When::Minutes),
            "H" | "HOUR" | "HOURS" => return Ok(When::Hours),
            "D" | "DAY" | "DAYS" => return Ok(When::Days),
            "MIDNIGHT" => return Ok(When::Midnight),
            _ => {}
        }
        let day = upper
            .strip_prefix('W')
            .and_then(|d| d.parse::<usize>().ok())
            .and_then(|d| WEEKDAYS.get(d).copied());
        match day {
            Some(day) => Ok(When::Weekday(day)),
            None => Err(SetupError::InvalidRotation(s.to_string())),
        }
    }
}

/// When a timed rotating file closes its current period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloverSchedule {
    when: When,
    interval: u32,
    utc: bool,
}

impl RolloverSchedule {
    /// `interval` multiplies the unit; calendar units roll at the next
    /// boundary whatever the count. `utc` selects the calendar used for
    /// midnight/weekday boundaries and for file suffixes (local time
    /// otherwise).
    pub fn new(when: When, interval: u32, utc: bool) -> Result<Self, SetupError> {
        if interval == 0 {
            return Err(SetupError::InvalidRotation("interval must be at least 1".to_string()));
        }
        Ok(Self { when, interval, utc })
    }

    pub fn parse(when: &str, interval: u32, utc: bool) -> Result<Self, SetupError> {
        Self::new(when.parse()?, interval, utc)
    }

    pub fn when(&self) -> When {
        self.when
    }

    /// Length of one period.
    pub fn period(&self) -> Duration {
        Duration::seconds(self.when.unit_secs() * i64::from(self.interval))
    }

    /// First boundary strictly after `now`.
    pub fn next_rollover(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if self.when.is_calendar() {
            return if self.utc {
                self.next_calendar_boundary(now)
            } else {
                self.next_calendar_boundary(now.with_timezone(&Local))
            };
        }

        let period = self.period().num_seconds();
        let next = (now.timestamp().div_euclid(period) + 1) * period;
        Utc.timestamp_opt(next, 0).single().unwrap_or(now + self.period())
    }

    fn next_calendar_boundary<Tz: TimeZone>(&self, now: DateTime<Tz>) -> DateTime<Utc> {
        let mut days = 1u32;
        if let When::Weekday(target) = self.when {
            let tomorrow = now.weekday().succ().num_days_from_monday();
            days += (target.num_days_from_monday() + 7 - tomorrow) % 7;
        }
        let fallback = now.with_timezone(&Utc) + Duration::days(i64::from(days));
        match now.date_naive().checked_add_days(Days::new(u64::from(days))) {
            Some(date) => start_of_day(&now.timezone(), date).unwrap_or(fallback),
            None => fallback,
        }
    }

    /// Start of the period containing `now`: the last boundary at or
    /// before it. Calendar units ignore the interval here as well.
    pub fn period_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if self.when.is_calendar() {
            return if self.utc {
                self.calendar_period_start(now)
            } else {
                self.calendar_period_start(now.with_timezone(&Local))
            };
        }

        let period = self.period().num_seconds();
        let start = now.timestamp().div_euclid(period) * period;
        Utc.timestamp_opt(start, 0).single().unwrap_or(now)
    }

    fn calendar_period_start<Tz: TimeZone>(&self, now: DateTime<Tz>) -> DateTime<Utc> {
        let mut days_back = 0u32;
        if let When::Weekday(target) = self.when {
            days_back = (now.weekday().num_days_from_monday() + 7 - target.num_days_from_monday()) % 7;
        }
        let fallback = now.with_timezone(&Utc);
        match now.date_naive().checked_sub_days(Days::new(u64::from(days_back))) {
            Some(date) => start_of_day(&now.timezone(), date)
                .map(|start| start.min(fallback))
                .unwrap_or(fallback),
            None => fallback,
        }
    }

    /// Suffix for the file holding the period that started at `period_start`.
    pub fn suffix(&self, period_start: DateTime<Utc>) -> String {
        let fmt = self.when.suffix_format();
        if self.utc {
            period_start.format(fmt).to_string()
        } else {
            period_start.with_timezone(&Local).format(fmt).to_string()
        }
    }

    /// Whether `candidate` looks like a suffix this schedule produces.
    pub fn is_suffix(&self, candidate: &str) -> bool {
        let fmt = self.when.suffix_format();
        match self.when {
            When::Days | When::Midnight | When::Weekday(_) => {
                NaiveDate::parse_from_str(candidate, fmt).is_ok()
            }
            When::Hours => NaiveDateTime::parse_from_str(&format!("{candidate}-00-00"), "%Y-%m-%d_%H-%M-%S").is_ok(),
            When::Minutes => NaiveDateTime::parse_from_str(&format!("{candidate}-00"), "%Y-%m-%d_%H-%M-%S").is_ok(),
            When::Seconds => NaiveDateTime::parse_from_str(candidate, fmt).is_ok(),
        }
    }
}

/// First instant of `date` in `tz`. A DST gap can swallow local midnight;
/// the first valid instant after it is used then.
fn start_of_day<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> Option<DateTime<Utc>> {
    let midnight = date.and_hms_opt(0, 0, 0)?;
    tz.from_local_datetime(&midnight)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(midnight + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
}
