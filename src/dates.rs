use chrono::{DateTime, Datelike, Duration, FixedOffset, Local, NaiveDate, SecondsFormat};

/// Inclusive range of calendar days used to filter stored entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn from_single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn from_bounds(start: NaiveDate, end: NaiveDate) -> Result<Self, String> {
        if start > end {
            return Err("Start date cannot be after end date.".to_string());
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn label(&self) -> String {
        if self.start == self.end {
            self.start.format("%Y-%m-%d").to_string()
        } else {
            format!(
                "{} → {}",
                self.start.format("%Y-%m-%d"),
                self.end.format("%Y-%m-%d")
            )
        }
    }
}

/// Chart windows ending today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Period {
    #[default]
    All,
    ThisWeek,
    ThisMonth,
    Last30Days,
}

impl Period {
    pub fn next(self) -> Self {
        match self {
            Period::All => Period::ThisWeek,
            Period::ThisWeek => Period::ThisMonth,
            Period::ThisMonth => Period::Last30Days,
            Period::Last30Days => Period::All,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Period::All => "all time",
            Period::ThisWeek => "this week",
            Period::ThisMonth => "this month",
            Period::Last30Days => "last 30 days",
        }
    }

    pub fn range(self, today: NaiveDate) -> Option<DateRange> {
        let start = match self {
            Period::All => return None,
            Period::ThisWeek => start_of_week(today),
            Period::ThisMonth => start_of_month(today),
            Period::Last30Days => today - Duration::days(29),
        };
        Some(DateRange { start, end: today })
    }
}

pub fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| "Invalid date format. Use YYYY-MM-DD.".to_string())
}

pub fn now_local() -> DateTime<FixedOffset> {
    Local::now().fixed_offset()
}

/// Storage format for timestamps: RFC 3339 with seconds and a numeric offset,
/// so the first ten characters are always the local calendar day.
pub fn format_timestamp(value: &DateTime<FixedOffset>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, false)
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<FixedOffset>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value)
}

/// Midnight in the local zone for a calendar day, e.g. for entries pulled by date.
pub fn local_midnight(date: NaiveDate) -> DateTime<FixedOffset> {
    let naive = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    naive
        .and_local_timezone(Local)
        .earliest()
        .map(|value| value.fixed_offset())
        .unwrap_or_else(|| naive.and_utc().fixed_offset())
}

pub fn format_clock(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    let (minutes, secs) = (total / 60, total % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    format!("{hours:02}:{minutes:02}:{secs:02}")
}

pub fn start_of_week(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

pub fn start_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parse_date_valid() {
        let date = parse_date(" 2026-02-03 ").unwrap();
        assert_eq!(date, day(2026, 2, 3));
    }

    #[test]
    fn parse_date_invalid() {
        assert!(parse_date("02-03-2026").is_err());
    }

    #[test]
    fn bounds_reject_inverted_range() {
        assert!(DateRange::from_bounds(day(2026, 1, 10), day(2026, 1, 1)).is_err());
        let range = DateRange::from_bounds(day(2026, 1, 1), day(2026, 1, 10)).unwrap();
        assert_eq!(range.label(), "2026-01-01 → 2026-01-10");
        assert_eq!(range.start(), day(2026, 1, 1));
        assert_eq!(DateRange::from_single(day(2026, 1, 1)).label(), "2026-01-01");
    }

    #[test]
    fn timestamps_keep_local_day_prefix() {
        let value = parse_timestamp("2026-02-03T23:30:00+02:00").unwrap();
        let stored = format_timestamp(&value);
        assert_eq!(stored, "2026-02-03T23:30:00+02:00");
        assert_eq!(&stored[..10], "2026-02-03");
    }

    #[test]
    fn local_midnight_keeps_date() {
        assert_eq!(local_midnight(day(2026, 2, 3)).date_naive(), day(2026, 2, 3));
    }

    #[test]
    fn clock_format() {
        assert_eq!(format_clock(0.0), "00:00:00");
        assert_eq!(format_clock(3725.9), "01:02:05");
        assert_eq!(format_clock(-5.0), "00:00:00");
    }

    #[test]
    fn week_and_month_starts() {
        assert_eq!(start_of_week(day(2026, 2, 1)), day(2026, 1, 26));
        assert_eq!(start_of_week(day(2026, 2, 2)), day(2026, 2, 2));
        assert_eq!(start_of_month(day(2026, 2, 17)), day(2026, 2, 1));
    }

    #[test]
    fn periods_end_today() {
        let today = day(2026, 2, 17);
        assert_eq!(Period::All.range(today), None);
        assert_eq!(Period::ThisWeek.range(today).unwrap().start(), day(2026, 2, 16));
        assert_eq!(Period::ThisMonth.range(today).unwrap().start(), day(2026, 2, 1));
        let last = Period::Last30Days.range(today).unwrap();
        assert_eq!(last.start(), day(2026, 1, 19));
        assert_eq!(last.end(), today);
        assert_eq!(Period::Last30Days.next(), Period::All);
    }
}
