use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

use crate::database::{Database, EntryFilter, StoreError};
use crate::dates::{start_of_month, start_of_week};
use crate::models::TimeEntry;
use crate::rounding::{RoundingConfig, quarter_hours_up};

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("No data for the selected work packages.")]
    NoData,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurationUnit {
    #[default]
    Seconds,
    Minutes,
    Hours,
}

impl DurationUnit {
    pub fn convert(self, seconds: f64) -> f64 {
        match self {
            DurationUnit::Seconds => seconds,
            DurationUnit::Minutes => seconds / 60.0,
            DurationUnit::Hours => seconds / 3600.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DurationUnit::Seconds => "seconds",
            DurationUnit::Minutes => "minutes",
            DurationUnit::Hours => "hours",
        }
    }

    pub fn next(self) -> Self {
        match self {
            DurationUnit::Seconds => DurationUnit::Minutes,
            DurationUnit::Minutes => DurationUnit::Hours,
            DurationUnit::Hours => DurationUnit::Seconds,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Bucket {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl Bucket {
    pub fn key(self, date: NaiveDate) -> NaiveDate {
        match self {
            Bucket::Daily => date,
            Bucket::Weekly => start_of_week(date),
            Bucket::Monthly => start_of_month(date),
        }
    }

    pub fn format(self, key: NaiveDate) -> String {
        match self {
            Bucket::Daily => key.format("%m-%d").to_string(),
            Bucket::Weekly => format!("W{}", key.format("%V")),
            Bucket::Monthly => key.format("%b %y").to_string(),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Bucket::Daily => "daily",
            Bucket::Weekly => "weekly",
            Bucket::Monthly => "monthly",
        }
    }

    pub fn next(self) -> Self {
        match self {
            Bucket::Daily => Bucket::Weekly,
            Bucket::Weekly => Bucket::Monthly,
            Bucket::Monthly => Bucket::Daily,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AverageDuration {
    pub work_package: String,
    pub value: f64,
    pub entries: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyBucket {
    pub start: NaiveDate,
    pub label: String,
    pub counts: BTreeMap<String, u32>,
}

impl FrequencyBucket {
    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DailyRow {
    pub entry: TimeEntry,
    pub rounded_hours: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyReport {
    pub date: Option<NaiveDate>,
    pub rows: Vec<DailyRow>,
    pub total_hours: f64,
}

pub fn average_durations(
    db: &Database,
    filter: &EntryFilter,
    unit: DurationUnit,
) -> Result<Vec<AverageDuration>, ReportError> {
    let rows = db.average_duration_per_work_package(filter)?;
    if rows.is_empty() {
        return Err(ReportError::NoData);
    }
    Ok(rows
        .into_iter()
        .map(|row| AverageDuration {
            work_package: row.work_package,
            value: unit.convert(row.average_secs),
            entries: row.entries,
        })
        .collect())
}

/// Counts entries per bucket and work package, oldest bucket first.
pub fn work_package_frequency(
    entries: &[TimeEntry],
    bucket: Bucket,
) -> Result<Vec<FrequencyBucket>, ReportError> {
    let mut grouped: BTreeMap<NaiveDate, BTreeMap<String, u32>> = BTreeMap::new();
    for entry in entries {
        let key = bucket.key(entry.date());
        *grouped
            .entry(key)
            .or_default()
            .entry(entry.work_package.clone())
            .or_insert(0) += 1;
    }

    if grouped.is_empty() {
        return Err(ReportError::NoData);
    }

    Ok(grouped
        .into_iter()
        .map(|(start, counts)| FrequencyBucket {
            start,
            label: bucket.format(start),
            counts,
        })
        .collect())
}

/// Work packages present in a frequency report, in a stable order for legends.
pub fn frequency_series(buckets: &[FrequencyBucket]) -> Vec<String> {
    buckets
        .iter()
        .flat_map(|bucket| bucket.counts.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn daily_entries(
    db: &Database,
    date: NaiveDate,
    rounding: &RoundingConfig,
) -> Result<DailyReport, ReportError> {
    let rows: Vec<DailyRow> = db
        .entries_for_day(date)?
        .into_iter()
        .map(|entry| DailyRow {
            rounded_hours: rounding.hours(entry.duration_secs),
            entry,
        })
        .collect();
    let total_hours = rows.iter().map(|row| row.rounded_hours).sum();
    Ok(DailyReport {
        date: Some(date),
        rows,
        total_hours,
    })
}

/// Expected hours for a pair, from its history, rounded up to a quarter hour.
pub fn forecast(db: &Database, project: &str, work_package: &str) -> Result<Option<f64>, ReportError> {
    let average = db.average_duration_for(project, work_package)?;
    Ok(average
        .filter(|secs| *secs > 0.0)
        .map(quarter_hours_up))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::parse_timestamp;
    use crate::models::NewTimeEntry;

    fn seed(db: &Database, project: &str, package: &str, start: &str, secs: f64) -> TimeEntry {
        let started_at = parse_timestamp(start).unwrap();
        db.insert_entry(&NewTimeEntry {
            project: project.to_string(),
            work_package: package.to_string(),
            started_at,
            ended_at: started_at,
            duration_secs: secs,
            remote_id: None,
            remote_issue_id: None,
        })
        .unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn averages_convert_units() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "A", "Dev", "2026-02-03T09:00:00+01:00", 1800.0);
        seed(&db, "A", "Dev", "2026-02-04T09:00:00+01:00", 5400.0);

        let hours = average_durations(&db, &EntryFilter::default(), DurationUnit::Hours).unwrap();
        assert_eq!(hours.len(), 1);
        assert_eq!(hours[0].value, 1.0);
        assert_eq!(hours[0].entries, 2);

        let minutes = average_durations(&db, &EntryFilter::default(), DurationUnit::Minutes).unwrap();
        assert_eq!(minutes[0].value, 60.0);
    }

    #[test]
    fn averages_without_matches_report_no_data() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "A", "Dev", "2026-02-03T09:00:00+01:00", 1800.0);
        let filter = EntryFilter {
            work_packages: vec!["Meeting".to_string()],
            ..EntryFilter::default()
        };
        assert!(matches!(
            average_durations(&db, &filter, DurationUnit::Seconds),
            Err(ReportError::NoData)
        ));
    }

    #[test]
    fn frequency_counts_per_day_and_package() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "A", "Dev", "2026-02-03T09:00:00+01:00", 60.0);
        seed(&db, "A", "Dev", "2026-02-03T11:00:00+01:00", 60.0);
        seed(&db, "A", "Meeting", "2026-02-03T14:00:00+01:00", 60.0);
        seed(&db, "A", "Dev", "2026-02-05T09:00:00+01:00", 60.0);
        let entries = db.all_entries().unwrap();

        let daily = work_package_frequency(&entries, Bucket::Daily).unwrap();
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0].start, day(2026, 2, 3));
        assert_eq!(daily[0].counts["Dev"], 2);
        assert_eq!(daily[0].counts["Meeting"], 1);
        assert_eq!(daily[0].total(), 3);
        assert_eq!(daily[1].counts["Dev"], 1);

        let weekly = work_package_frequency(&entries, Bucket::Weekly).unwrap();
        assert_eq!(weekly.len(), 1);
        assert_eq!(weekly[0].start, day(2026, 2, 2));
        assert_eq!(frequency_series(&weekly), vec!["Dev", "Meeting"]);
    }

    #[test]
    fn frequency_of_nothing_is_no_data() {
        assert!(matches!(
            work_package_frequency(&[], Bucket::Monthly),
            Err(ReportError::NoData)
        ));
    }

    #[test]
    fn daily_view_rounds_each_entry_up() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "A", "Dev", "2026-02-03T09:00:00+01:00", 46.0 * 60.0);
        seed(&db, "A", "Dev", "2026-02-03T11:00:00+01:00", 45.0 * 60.0);
        seed(&db, "A", "Dev", "2026-02-04T09:00:00+01:00", 60.0);

        let report = daily_entries(&db, day(2026, 2, 3), &RoundingConfig::default()).unwrap();

        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.rows[0].rounded_hours, 1.0);
        assert_eq!(report.rows[1].rounded_hours, 0.75);
        assert_eq!(report.total_hours, 1.75);
    }

    #[test]
    fn forecast_uses_history() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(forecast(&db, "A", "Dev").unwrap(), None);
        seed(&db, "A", "Dev", "2026-02-03T09:00:00+01:00", 1800.0);
        seed(&db, "A", "Dev", "2026-02-04T09:00:00+01:00", 2000.0);
        assert_eq!(forecast(&db, "A", "Dev").unwrap(), Some(0.75));
    }

    #[test]
    fn bucket_labels() {
        assert_eq!(Bucket::Daily.format(day(2026, 2, 3)), "02-03");
        assert_eq!(Bucket::Weekly.format(day(2026, 2, 2)), "W06");
        assert_eq!(Bucket::Monthly.format(day(2026, 2, 1)), "Feb 26");
    }
}
