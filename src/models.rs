use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Project {
    pub id: String,
    pub name: String,
}

impl Project {
    pub fn named(name: &str) -> Self {
        let name = name.trim().to_string();
        Self {
            id: name.clone(),
            name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WorkPackage {
    pub id: String,
    pub name: String,
    pub project: String,
}

impl WorkPackage {
    pub fn named(project: &str, name: &str) -> Self {
        let name = name.trim().to_string();
        Self {
            id: name.clone(),
            name,
            project: project.to_string(),
        }
    }

    /// Work package backed by a Redmine issue, e.g. `4711: Fix login`.
    pub fn from_ticket(project: &str, issue_id: u64, subject: &str) -> Self {
        Self {
            id: issue_id.to_string(),
            name: format!("{issue_id}: {subject}"),
            project: project.to_string(),
        }
    }
}

/// A completed entry as stored in the local database.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeEntry {
    pub id: i64,
    pub project: String,
    pub work_package: String,
    pub started_at: DateTime<FixedOffset>,
    pub ended_at: DateTime<FixedOffset>,
    pub duration_secs: f64,
    pub remote_id: Option<i64>,
    pub remote_issue_id: Option<i64>,
}

impl TimeEntry {
    pub fn date(&self) -> NaiveDate {
        self.started_at.date_naive()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTimeEntry {
    pub project: String,
    pub work_package: String,
    pub started_at: DateTime<FixedOffset>,
    pub ended_at: DateTime<FixedOffset>,
    pub duration_secs: f64,
    pub remote_id: Option<i64>,
    pub remote_issue_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerStatus {
    Stopped,
    Running,
    Paused,
}

impl TimerStatus {
    pub fn label(self) -> &'static str {
        match self {
            TimerStatus::Stopped => "Stopped",
            TimerStatus::Running => "Running",
            TimerStatus::Paused => "Paused",
        }
    }
}

/// Crash-recovery snapshot of the running session, kept in the config file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SessionBackup {
    pub project: String,
    pub work_package: String,
    pub elapsed_secs: f64,
    pub saved_at: String,
    #[serde(default)]
    pub running: bool,
}
