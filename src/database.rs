use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::dates::{DateRange, format_timestamp, parse_timestamp};
use crate::models::{NewTimeEntry, TimeEntry};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS time_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project TEXT NOT NULL,
    work_package TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT NOT NULL,
    duration_secs REAL NOT NULL,
    remote_id INTEGER UNIQUE,
    remote_issue_id INTEGER
);
";

const ENTRY_COLUMNS: &str =
    "id, project, work_package, started_at, ended_at, duration_secs, remote_id, remote_issue_id";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("entry {0} not found")]
    NotFound(i64),
}

/// Narrows entry queries. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryFilter {
    pub range: Option<DateRange>,
    pub project: Option<String>,
    pub work_packages: Vec<String>,
}

impl EntryFilter {
    pub fn for_range(range: DateRange) -> Self {
        Self {
            range: Some(range),
            ..Self::default()
        }
    }

    fn where_clause(&self) -> (String, Vec<Box<dyn ToSql>>) {
        let mut conditions: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(range) = self.range {
            values.push(Box::new(range.start().format("%Y-%m-%d").to_string()));
            values.push(Box::new(range.end().format("%Y-%m-%d").to_string()));
            conditions.push(format!(
                "substr(started_at, 1, 10) BETWEEN ?{} AND ?{}",
                values.len() - 1,
                values.len()
            ));
        }

        if let Some(project) = &self.project {
            values.push(Box::new(project.clone()));
            conditions.push(format!("project = ?{}", values.len()));
        }

        if !self.work_packages.is_empty() {
            let mut placeholders = Vec::with_capacity(self.work_packages.len());
            for package in &self.work_packages {
                values.push(Box::new(package.clone()));
                placeholders.push(format!("?{}", values.len()));
            }
            conditions.push(format!("work_package IN ({})", placeholders.join(", ")));
        }

        if conditions.is_empty() {
            (String::new(), values)
        } else {
            (format!(" WHERE {}", conditions.join(" AND ")), values)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AverageRow {
    pub work_package: String,
    pub average_secs: f64,
    pub entries: u32,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let db = Self { conn };
        db.migrate()?;
        info!(path = %path.display(), "database opened");
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn insert_entry(&self, entry: &NewTimeEntry) -> Result<TimeEntry, StoreError> {
        self.conn.execute(
            "INSERT INTO time_entries
                (project, work_package, started_at, ended_at, duration_secs, remote_id, remote_issue_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.project,
                entry.work_package,
                format_timestamp(&entry.started_at),
                format_timestamp(&entry.ended_at),
                entry.duration_secs,
                entry.remote_id,
                entry.remote_issue_id,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(
            id,
            project = %entry.project,
            work_package = %entry.work_package,
            duration_secs = entry.duration_secs,
            "time entry stored"
        );
        Ok(TimeEntry {
            id,
            project: entry.project.clone(),
            work_package: entry.work_package.clone(),
            started_at: entry.started_at,
            ended_at: entry.ended_at,
            duration_secs: entry.duration_secs,
            remote_id: entry.remote_id,
            remote_issue_id: entry.remote_issue_id,
        })
    }

    pub fn entry(&self, id: i64) -> Result<TimeEntry, StoreError> {
        self.conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM time_entries WHERE id = ?1"),
                params![id],
                map_entry_row,
            )
            .optional()?
            .ok_or(StoreError::NotFound(id))
    }

    pub fn entries(&self, filter: &EntryFilter) -> Result<Vec<TimeEntry>, StoreError> {
        let (clause, values) = filter.where_clause();
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM time_entries{clause} ORDER BY started_at, id");
        let mut stmt = self.conn.prepare(&sql)?;
        let params: Vec<&dyn ToSql> = values.iter().map(|value| value.as_ref()).collect();
        let rows = stmt.query_map(params.as_slice(), map_entry_row)?;
        let entries = rows.collect::<Result<Vec<_>, _>>()?;
        debug!(count = entries.len(), "entries queried");
        Ok(entries)
    }

    pub fn all_entries(&self) -> Result<Vec<TimeEntry>, StoreError> {
        self.entries(&EntryFilter::default())
    }

    pub fn entries_for_day(&self, day: NaiveDate) -> Result<Vec<TimeEntry>, StoreError> {
        self.entries(&EntryFilter::for_range(DateRange::from_single(day)))
    }

    pub fn latest_entry(&self) -> Result<Option<TimeEntry>, StoreError> {
        let entry = self
            .conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM time_entries ORDER BY id DESC LIMIT 1"),
                [],
                map_entry_row,
            )
            .optional()?;
        Ok(entry)
    }

    pub fn find_by_remote_id(&self, remote_id: i64) -> Result<Option<TimeEntry>, StoreError> {
        let entry = self
            .conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM time_entries WHERE remote_id = ?1"),
                params![remote_id],
                map_entry_row,
            )
            .optional()?;
        Ok(entry)
    }

    /// Overwrites every column of an existing row. Used by sync reconciliation.
    pub fn update_entry(&self, entry: &TimeEntry) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE time_entries
             SET project = ?2, work_package = ?3, started_at = ?4, ended_at = ?5,
                 duration_secs = ?6, remote_id = ?7, remote_issue_id = ?8
             WHERE id = ?1",
            params![
                entry.id,
                entry.project,
                entry.work_package,
                format_timestamp(&entry.started_at),
                format_timestamp(&entry.ended_at),
                entry.duration_secs,
                entry.remote_id,
                entry.remote_issue_id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(entry.id));
        }
        debug!(id = entry.id, "time entry overwritten");
        Ok(())
    }

    pub fn set_remote_ids(&self, id: i64, remote_id: i64, remote_issue_id: i64) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE time_entries SET remote_id = ?2, remote_issue_id = ?3 WHERE id = ?1",
            params![id, remote_id, remote_issue_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    pub fn average_duration_per_work_package(&self, filter: &EntryFilter) -> Result<Vec<AverageRow>, StoreError> {
        let (clause, values) = filter.where_clause();
        let sql = format!(
            "SELECT work_package, AVG(duration_secs), COUNT(*) FROM time_entries{clause}
             GROUP BY work_package ORDER BY work_package"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let params: Vec<&dyn ToSql> = values.iter().map(|value| value.as_ref()).collect();
        let rows = stmt.query_map(params.as_slice(), |row| {
            Ok(AverageRow {
                work_package: row.get(0)?,
                average_secs: row.get(1)?,
                entries: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Average duration in seconds for one pair, `None` without history.
    pub fn average_duration_for(&self, project: &str, work_package: &str) -> Result<Option<f64>, StoreError> {
        let average: Option<f64> = self.conn.query_row(
            "SELECT AVG(duration_secs) FROM time_entries WHERE project = ?1 AND work_package = ?2",
            params![project, work_package],
            |row| row.get(0),
        )?;
        Ok(average)
    }
}

fn map_entry_row(row: &Row<'_>) -> rusqlite::Result<TimeEntry> {
    Ok(TimeEntry {
        id: row.get(0)?,
        project: row.get(1)?,
        work_package: row.get(2)?,
        started_at: timestamp_column(row, 3)?,
        ended_at: timestamp_column(row, 4)?,
        duration_secs: row.get(5)?,
        remote_id: row.get(6)?,
        remote_issue_id: row.get(7)?,
    })
}

fn timestamp_column(row: &Row<'_>, index: usize) -> rusqlite::Result<chrono::DateTime<chrono::FixedOffset>> {
    let raw: String = row.get(index)?;
    parse_timestamp(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_entry(project: &str, package: &str, start: &str, secs: f64) -> NewTimeEntry {
        let started_at = parse_timestamp(start).unwrap();
        NewTimeEntry {
            project: project.to_string(),
            work_package: package.to_string(),
            started_at,
            ended_at: started_at + chrono::Duration::milliseconds((secs * 1000.0) as i64),
            duration_secs: secs,
            remote_id: None,
            remote_issue_id: None,
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn insert_and_read_back() {
        let db = Database::open_in_memory().unwrap();
        let stored = db
            .insert_entry(&new_entry("A", "Dev", "2026-02-03T09:00:00+01:00", 1800.25))
            .unwrap();

        let loaded = db.entry(stored.id).unwrap();
        assert_eq!(loaded, stored);
        assert_eq!(loaded.duration_secs, 1800.25);
        assert_eq!(db.all_entries().unwrap().len(), 1);
    }

    #[test]
    fn open_on_disk_creates_schema_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entries.db");
        {
            let db = Database::open(&path).unwrap();
            db.insert_entry(&new_entry("A", "Dev", "2026-02-03T09:00:00+01:00", 60.0))
                .unwrap();
        }
        let reopened = Database::open(&path).unwrap();
        assert_eq!(reopened.all_entries().unwrap().len(), 1);
    }

    #[test]
    fn entries_for_day_uses_local_date() {
        let db = Database::open_in_memory().unwrap();
        db.insert_entry(&new_entry("A", "Dev", "2026-02-03T23:30:00+01:00", 60.0))
            .unwrap();
        db.insert_entry(&new_entry("A", "Dev", "2026-02-04T00:10:00+01:00", 60.0))
            .unwrap();

        assert_eq!(db.entries_for_day(day(2026, 2, 3)).unwrap().len(), 1);
        assert_eq!(db.entries_for_day(day(2026, 2, 4)).unwrap().len(), 1);
        assert!(db.entries_for_day(day(2026, 2, 5)).unwrap().is_empty());
    }

    #[test]
    fn filters_combine() {
        let db = Database::open_in_memory().unwrap();
        db.insert_entry(&new_entry("A", "Dev", "2026-02-01T09:00:00+01:00", 60.0))
            .unwrap();
        db.insert_entry(&new_entry("A", "Meeting", "2026-02-02T09:00:00+01:00", 60.0))
            .unwrap();
        db.insert_entry(&new_entry("B", "Dev", "2026-02-03T09:00:00+01:00", 60.0))
            .unwrap();

        let filter = EntryFilter {
            range: Some(DateRange::from_bounds(day(2026, 2, 1), day(2026, 2, 2)).unwrap()),
            project: Some("A".to_string()),
            work_packages: vec!["Dev".to_string(), "Meeting".to_string()],
        };
        assert_eq!(db.entries(&filter).unwrap().len(), 2);

        let only_dev = EntryFilter {
            work_packages: vec!["Dev".to_string()],
            ..EntryFilter::default()
        };
        assert_eq!(db.entries(&only_dev).unwrap().len(), 2);
        let only_b = EntryFilter {
            project: Some("B".to_string()),
            ..EntryFilter::default()
        };
        assert_eq!(db.entries(&only_b).unwrap().len(), 1);
    }

    #[test]
    fn averages_group_by_work_package() {
        let db = Database::open_in_memory().unwrap();
        db.insert_entry(&new_entry("A", "Dev", "2026-02-01T09:00:00+01:00", 600.0))
            .unwrap();
        db.insert_entry(&new_entry("A", "Dev", "2026-02-02T09:00:00+01:00", 1200.0))
            .unwrap();
        db.insert_entry(&new_entry("B", "Meeting", "2026-02-03T09:00:00+01:00", 300.0))
            .unwrap();

        let rows = db
            .average_duration_per_work_package(&EntryFilter::default())
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].work_package, "Dev");
        assert_eq!(rows[0].average_secs, 900.0);
        assert_eq!(rows[0].entries, 2);

        assert_eq!(db.average_duration_for("A", "Dev").unwrap(), Some(900.0));
        assert_eq!(db.average_duration_for("A", "Meeting").unwrap(), None);
    }

    #[test]
    fn remote_ids_are_unique_and_findable() {
        let db = Database::open_in_memory().unwrap();
        let first = db
            .insert_entry(&new_entry("A", "Dev", "2026-02-01T09:00:00+01:00", 600.0))
            .unwrap();
        db.set_remote_ids(first.id, 77, 12).unwrap();

        let found = db.find_by_remote_id(77).unwrap().unwrap();
        assert_eq!(found.id, first.id);
        assert_eq!(found.remote_issue_id, Some(12));

        let mut duplicate = new_entry("A", "Dev", "2026-02-01T10:00:00+01:00", 60.0);
        duplicate.remote_id = Some(77);
        assert!(db.insert_entry(&duplicate).is_err());
    }

    #[test]
    fn update_overwrites_and_reports_missing_rows() {
        let db = Database::open_in_memory().unwrap();
        let mut entry = db
            .insert_entry(&new_entry("A", "Dev", "2026-02-01T09:00:00+01:00", 600.0))
            .unwrap();
        entry.duration_secs = 900.0;
        db.update_entry(&entry).unwrap();
        assert_eq!(db.entry(entry.id).unwrap().duration_secs, 900.0);

        entry.id = 999;
        assert!(matches!(db.update_entry(&entry), Err(StoreError::NotFound(999))));
        assert!(matches!(db.entry(999), Err(StoreError::NotFound(999))));
    }
}
