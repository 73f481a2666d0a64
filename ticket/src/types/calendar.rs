//! Calendar arithmetic for a single (leap) year.
//!
//! Everything is reduced to integers early:
//! - [`Date`] is a day ordinal counted from 01-01.
//! - [`Clock`] is minutes since midnight of the day a train leaves its first
//!   station, so it can run past 24:00 for long routes.
//! - [`DateTime`] is absolute minutes since 01-01 00:00.
//!
//! Comparisons and differences are then plain integer operations and never
//! need month carry logic.

// Month indices are bounded by 12.
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]

use std::fmt;
use std::ops::Sub;
use std::str::FromStr;

use crate::storage::codec::{CodecError, FixedCodec, read_i32, write_i32};

/// Days per month. February always has 29 days.
pub const MONTH_DAYS: [i32; 12] = [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Days in the calendar year.
pub const YEAR_DAYS: i32 = 366;

/// Minutes per day.
pub const DAY_MINUTES: i32 = 1440;

/// A calendar day, stored as an ordinal (01-01 is 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Date(i32);

impl Date {
    /// Build a date from a 1-based month and day.
    pub fn from_month_day(month: i32, day: i32) -> Result<Self, CalendarError> {
        if !(1..=12).contains(&month) {
            return Err(CalendarError::InvalidDate(format!("{month:02}-{day:02}")));
        }
        let month_index = (month - 1) as usize;
        if day < 1 || day > MONTH_DAYS[month_index] {
            return Err(CalendarError::InvalidDate(format!("{month:02}-{day:02}")));
        }
        let before: i32 = MONTH_DAYS[..month_index].iter().sum();
        Ok(Self(before + day - 1))
    }

    #[must_use]
    pub const fn from_ordinal(ordinal: i32) -> Self {
        Self(ordinal)
    }

    #[must_use]
    pub const fn ordinal(self) -> i32 {
        self.0
    }

    /// Month and day, both 1-based. Ordinals outside the year wrap around.
    #[must_use]
    pub fn month_day(self) -> (i32, i32) {
        let mut rest = self.0.rem_euclid(YEAR_DAYS);
        for (index, days) in MONTH_DAYS.iter().enumerate() {
            if rest < *days {
                return (index as i32 + 1, rest + 1);
            }
            rest -= days;
        }
        (12, 31)
    }

    #[must_use]
    pub const fn add_days(self, days: i32) -> Self {
        Self(self.0 + days)
    }

    /// Signed number of days from `earlier` to `self`.
    #[must_use]
    pub const fn days_since(self, earlier: Self) -> i32 {
        self.0 - earlier.0
    }
}

impl FromStr for Date {
    type Err = CalendarError;

    /// Parse `mm-dd`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CalendarError::InvalidDate(s.to_string());
        let (month, day) = s.split_once('-').ok_or_else(invalid)?;
        let month = month.parse::<i32>().map_err(|_| invalid())?;
        let day = day.parse::<i32>().map_err(|_| invalid())?;
        Self::from_month_day(month, day)
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (month, day) = self.month_day();
        write!(f, "{month:02}-{day:02}")
    }
}

/// Minutes since midnight of a train's departure day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Clock(i32);

impl Clock {
    #[must_use]
    pub const fn from_minutes(minutes: i32) -> Self {
        Self(minutes)
    }

    #[must_use]
    pub const fn minutes(self) -> i32 {
        self.0
    }

    /// Whole days elapsed since the departure day.
    #[must_use]
    pub const fn days(self) -> i32 {
        self.0.div_euclid(DAY_MINUTES)
    }

    #[must_use]
    pub const fn plus(self, minutes: i32) -> Self {
        Self(self.0 + minutes)
    }
}

impl FromStr for Clock {
    type Err = CalendarError;

    /// Parse `hh:mm`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CalendarError::InvalidTime(s.to_string());
        let (hour, minute) = s.split_once(':').ok_or_else(invalid)?;
        let hour = hour.parse::<i32>().map_err(|_| invalid())?;
        let minute = minute.parse::<i32>().map_err(|_| invalid())?;
        if !(0..24).contains(&hour) || !(0..60).contains(&minute) {
            return Err(invalid());
        }
        Ok(Self(hour * 60 + minute))
    }
}

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let of_day = self.0.rem_euclid(DAY_MINUTES);
        write!(f, "{:02}:{:02}", of_day / 60, of_day % 60)
    }
}

/// An absolute instant, in minutes since 01-01 00:00.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DateTime(i32);

impl DateTime {
    /// The instant at `clock` for a train that left its first station on `start`.
    #[must_use]
    pub const fn new(start: Date, clock: Clock) -> Self {
        Self(start.0 * DAY_MINUTES + clock.0)
    }

    #[must_use]
    pub const fn minutes(self) -> i32 {
        self.0
    }

    #[must_use]
    pub const fn date(self) -> Date {
        Date(self.0.div_euclid(DAY_MINUTES))
    }

    /// The earliest departure day whose `clock` instant is not before `self`.
    #[must_use]
    pub const fn earliest_start(self, clock: Clock) -> Date {
        let needed = self.0 - clock.0;
        // Ceiling division for a positive divisor.
        Date(-(-needed).div_euclid(DAY_MINUTES))
    }
}

impl Sub for DateTime {
    type Output = i32;

    fn sub(self, rhs: Self) -> i32 {
        self.0 - rhs.0
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let time = Clock(self.0.rem_euclid(DAY_MINUTES));
        write!(f, "{} {time}", self.date())
    }
}

macro_rules! impl_i32_codec {
    ($($ty:ty),*) => {
        $(
            impl FixedCodec for $ty {
                const WIDTH: usize = 4;

                fn encode(&self, buf: &mut [u8]) {
                    write_i32(buf, 0, self.0);
                }

                fn decode(buf: &[u8]) -> Result<Self, CodecError> {
                    Ok(Self(read_i32(buf, 0)))
                }
            }
        )*
    };
}

impl_i32_codec!(Date, Clock, DateTime);

/// Errors produced while parsing calendar values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    InvalidDate(String),
    InvalidTime(String),
}

impl fmt::Display for CalendarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDate(s) => write!(f, "invalid date: {s:?}"),
            Self::InvalidTime(s) => write!(f, "invalid time: {s:?}"),
        }
    }
}

impl std::error::Error for CalendarError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> Date {
        s.parse().expect("valid date")
    }

    #[test]
    fn test_date_ordinals() {
        assert_eq!(date("01-01").ordinal(), 0);
        assert_eq!(date("02-29").ordinal(), 59);
        assert_eq!(date("03-01").ordinal(), 60);
        assert_eq!(date("12-31").ordinal(), YEAR_DAYS - 1);
    }

    #[test]
    fn test_date_display_and_carry() {
        assert_eq!(date("06-30").add_days(1).to_string(), "07-01");
        assert_eq!(date("08-31").add_days(-31).to_string(), "07-31");
        assert_eq!(date("12-31").add_days(1).to_string(), "01-01");
        assert_eq!(date("08-17").days_since(date("06-01")), 77);
    }

    #[test]
    fn test_invalid_dates() {
        assert!("13-01".parse::<Date>().is_err());
        assert!("06-31".parse::<Date>().is_err());
        assert!("0601".parse::<Date>().is_err());
        assert!("ab-cd".parse::<Date>().is_err());
    }

    #[test]
    fn test_clock_parse_and_days() {
        let clock: Clock = "23:30".parse().expect("valid time");
        assert_eq!(clock.minutes(), 23 * 60 + 30);
        assert_eq!(clock.days(), 0);

        let later = clock.plus(45);
        assert_eq!(later.days(), 1);
        assert_eq!(later.to_string(), "00:15");

        assert!("24:00".parse::<Clock>().is_err());
        assert!("12:60".parse::<Clock>().is_err());
    }

    #[test]
    fn test_datetime_rolls_over_midnight() {
        let start = date("06-30");
        let arrival = DateTime::new(start, "22:00".parse::<Clock>().expect("time").plus(180));
        assert_eq!(arrival.to_string(), "07-01 01:00");
        assert_eq!(arrival - DateTime::new(start, Clock::from_minutes(0)), 25 * 60);
    }

    #[test]
    fn test_earliest_start() {
        let clock: Clock = "08:00".parse().expect("time");
        let noon = DateTime::new(date("07-10"), Clock::from_minutes(12 * 60));

        // 08:00 on 07-10 has already passed at noon, so the next day.
        assert_eq!(noon.earliest_start(clock), date("07-11"));

        // Exactly on time is acceptable.
        let eight = DateTime::new(date("07-10"), clock);
        assert_eq!(eight.earliest_start(clock), date("07-10"));

        // A leg whose station is reached a day after departure.
        let overnight = clock.plus(DAY_MINUTES);
        assert_eq!(noon.earliest_start(overnight), date("07-10"));
        assert_eq!(eight.earliest_start(overnight), date("07-09"));
    }
}
