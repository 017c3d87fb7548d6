use chrono::{NaiveDate, TimeDelta};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::config::{Config, Credentials, RedmineSettings};
use crate::database::{Database, StoreError};
use crate::dates::local_midnight;
use crate::models::{NewTimeEntry, Project, TimeEntry, WorkPackage};
use crate::redmine::{
    Issue, IssueQuery, NewIssue, NewRemoteTimeEntry, RedmineApi, RedmineClient, RedmineError,
    RemoteProject, RemoteTimeEntry, TimeEntryQuery, User,
};
use crate::reporting::forecast;
use crate::rounding::{billable_from_hours, billable_hours};

const TICKET_MARKER: &str = " - Ticket ";
const HOURS_TOLERANCE: f64 = 0.01;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RedmineError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("No Redmine credentials. Connect first.")]
    MissingCredentials,
    #[error("No backup project configured.")]
    NoBackupProject,
    #[error("Backup project '{0}' does not exist on the server.")]
    BackupProjectNotFound(String),
    #[error("Background worker stopped unexpectedly.")]
    WorkerStopped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushOutcome {
    pub issue_id: u64,
    pub remote_id: u64,
    pub created_issue: bool,
    pub updated_remote: bool,
    pub hours: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub projects: Vec<Project>,
    pub work_packages: Vec<WorkPackage>,
}

impl SyncReport {
    pub fn summary(&self) -> String {
        format!(
            "Pulled: {} new, {} updated, {} unchanged, {} skipped.",
            self.inserted, self.updated, self.unchanged, self.skipped
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogImport {
    pub projects: Vec<Project>,
    pub work_packages: Vec<WorkPackage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TicketSummary {
    pub project: String,
    pub issue_id: u64,
    pub subject: String,
    pub status: String,
    pub estimated_hours: Option<f64>,
    pub spent_hours: f64,
    pub entries: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mismatch {
    MissingRemote {
        entry_id: i64,
        remote_id: i64,
    },
    HoursDiffer {
        entry_id: i64,
        remote_id: i64,
        local_hours: f64,
        remote_hours: f64,
    },
    OverEstimate {
        issue_id: u64,
        estimated_hours: f64,
        spent_hours: f64,
    },
}

impl Mismatch {
    pub fn describe(&self) -> String {
        match self {
            Mismatch::MissingRemote { entry_id, remote_id } => {
                format!("entry {entry_id}: remote time entry {remote_id} is gone")
            }
            Mismatch::HoursDiffer {
                entry_id,
                remote_id,
                local_hours,
                remote_hours,
            } => format!(
                "entry {entry_id}: {local_hours:.2} h locally, {remote_hours:.2} h on remote entry {remote_id}"
            ),
            Mismatch::OverEstimate {
                issue_id,
                estimated_hours,
                spent_hours,
            } => format!("ticket #{issue_id}: {spent_hours:.2} h spent of {estimated_hours:.2} h estimated"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsistencyReport {
    pub tickets: Vec<TicketSummary>,
    pub mismatches: Vec<Mismatch>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }

    pub fn lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .tickets
            .iter()
            .map(|ticket| {
                let estimate = ticket
                    .estimated_hours
                    .map(|hours| format!("{hours:.2}"))
                    .unwrap_or_else(|| "-".to_string());
                format!(
                    "{} #{} {} [{}] est {} / spent {:.2} ({} entries)",
                    ticket.project,
                    ticket.issue_id,
                    ticket.subject,
                    ticket.status,
                    estimate,
                    ticket.spent_hours,
                    ticket.entries
                )
            })
            .collect();
        if self.is_consistent() {
            lines.push("No mismatches.".to_string());
        } else {
            lines.extend(self.mismatches.iter().map(|mismatch| format!("! {}", mismatch.describe())));
        }
        lines
    }
}

pub fn client(settings: &RedmineSettings, credentials: Option<Credentials>) -> Result<RedmineClient, SyncError> {
    let credentials = credentials
        .or_else(|| Credentials::resolve(settings))
        .ok_or(SyncError::MissingCredentials)?;
    Ok(RedmineClient::new(&settings.url, credentials)?)
}

/// Checks the credentials against the server and returns the account.
pub fn connect(api: &impl RedmineApi) -> Result<User, SyncError> {
    let user = api.current_user()?;
    info!(login = %user.login, "connected to Redmine");
    Ok(user)
}

pub fn ticket_subject(project: &str, work_package: &str) -> String {
    format!("{project}{TICKET_MARKER}{work_package}")
}

/// Splits `"<project> - Ticket <work package>"` back into its parts.
pub fn parse_ticket_subject(subject: &str) -> Option<(&str, &str)> {
    let (project, work_package) = subject.rsplit_once(TICKET_MARKER)?;
    let (project, work_package) = (project.trim(), work_package.trim());
    if project.is_empty() || work_package.is_empty() {
        return None;
    }
    Some((project, work_package))
}

fn find_backup_project(api: &impl RedmineApi, settings: &RedmineSettings) -> Result<RemoteProject, SyncError> {
    let wanted = settings.backup_project.trim();
    if wanted.is_empty() {
        return Err(SyncError::NoBackupProject);
    }
    api.projects()?
        .into_iter()
        .find(|project| is_named(project, wanted))
        .ok_or_else(|| SyncError::BackupProjectNotFound(wanted.to_string()))
}

fn is_named(project: &RemoteProject, name: &str) -> bool {
    project.name == name || project.identifier == name
}

/// Books one local entry on its ticket in the backup project.
pub fn push_entry(
    api: &impl RedmineApi,
    db: &Database,
    settings: &RedmineSettings,
    entry: &TimeEntry,
) -> Result<PushOutcome, SyncError> {
    let backup = find_backup_project(api, settings)?;
    let subject = ticket_subject(&entry.project, &entry.work_package);
    let hours = billable_hours(entry.duration_secs);

    let existing = api
        .issues(&IssueQuery {
            project_id: Some(backup.id),
            subject: Some(subject.clone()),
            assigned_to_me: false,
        })?
        .into_iter()
        .find(|issue| issue.subject == subject);

    let (issue, created_issue) = match existing {
        Some(issue) => (issue, false),
        None => {
            let estimated_hours = forecast(db, &entry.project, &entry.work_package)
                .ok()
                .flatten()
                .unwrap_or(hours);
            let issue = api.create_issue(&NewIssue {
                project_id: backup.id,
                subject: subject.clone(),
                description: format!(
                    "Time booked for work package '{}' of project '{}'.",
                    entry.work_package, entry.project
                ),
                estimated_hours,
            })?;
            info!(issue = issue.id, %subject, "created ticket");
            (issue, true)
        }
    };

    let mut booking = NewRemoteTimeEntry {
        issue_id: issue.id,
        spent_on: entry.date().format("%Y-%m-%d").to_string(),
        hours,
        comments: if created_issue {
            "Initial time entry".to_string()
        } else {
            "Additional time entry".to_string()
        },
    };

    let mut updated_remote = false;
    let mut remote_id = None;
    if let Some(known) = entry.remote_id.and_then(|id| u64::try_from(id).ok()) {
        booking.comments = "Updated time entry".to_string();
        match api.update_time_entry(known, &booking) {
            Ok(()) => {
                updated_remote = true;
                remote_id = Some(known);
            }
            Err(RedmineError::NotFound(_)) => {
                warn!(remote_id = known, "remote time entry vanished, booking again");
                booking.comments = "Additional time entry".to_string();
            }
            Err(err) => return Err(err.into()),
        }
    }

    let remote_id = match remote_id {
        Some(id) => id,
        None => api.create_time_entry(&booking)?.id,
    };

    db.set_remote_ids(entry.id, remote_id as i64, issue.id as i64)?;
    info!(entry = entry.id, remote_id, issue = issue.id, hours, "entry pushed");

    Ok(PushOutcome {
        issue_id: issue.id,
        remote_id,
        created_issue,
        updated_remote,
        hours,
    })
}

/// Maps a remote ticket to the local (project, work package) pair it stands for.
fn local_pair(issue: &Issue, backup_id: Option<u64>) -> Option<(String, WorkPackage)> {
    if backup_id == Some(issue.project.id) {
        let (project, work_package) = parse_ticket_subject(&issue.subject)?;
        return Some((project.to_string(), WorkPackage::named(project, work_package)));
    }
    let project = issue.project.name.clone();
    let package = WorkPackage::from_ticket(&project, issue.id, &issue.subject);
    Some((project, package))
}

/// Id of the configured backup project, matched by name or identifier.
fn backup_project_id(api: &impl RedmineApi, settings: &RedmineSettings) -> Result<Option<u64>, SyncError> {
    match find_backup_project(api, settings) {
        Ok(project) => Ok(Some(project.id)),
        Err(SyncError::NoBackupProject) => Ok(None),
        Err(SyncError::BackupProjectNotFound(name)) => {
            warn!(%name, "backup project not on the server, tickets map to their own projects");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Upserts the current user's remote time entries into the local store.
pub fn pull_time_entries(
    api: &impl RedmineApi,
    db: &Database,
    config: &Config,
) -> Result<SyncReport, SyncError> {
    let remote = api.time_entries(&TimeEntryQuery::mine())?;
    let backup_id = backup_project_id(api, &config.redmine)?;
    let mut issues: HashMap<u64, Option<Issue>> = HashMap::new();
    let mut report = SyncReport::default();
    let mut seen_projects = HashSet::new();
    let mut seen_packages = HashSet::new();

    for remote_entry in &remote {
        let Some(issue_ref) = remote_entry.issue else {
            report.skipped += 1;
            continue;
        };
        let issue = match issues.get(&issue_ref.id) {
            Some(cached) => cached.clone(),
            None => {
                let fetched = match api.issue(issue_ref.id) {
                    Ok(issue) => Some(issue),
                    Err(RedmineError::NotFound(_)) => None,
                    Err(err) => return Err(err.into()),
                };
                issues.insert(issue_ref.id, fetched.clone());
                fetched
            }
        };
        let Some((project, package)) = issue.as_ref().and_then(|issue| local_pair(issue, backup_id)) else {
            debug!(remote_id = remote_entry.id, "no local pair for remote entry");
            report.skipped += 1;
            continue;
        };
        let Ok(spent_on) = NaiveDate::parse_from_str(&remote_entry.spent_on, "%Y-%m-%d") else {
            warn!(remote_id = remote_entry.id, spent_on = %remote_entry.spent_on, "unreadable date");
            report.skipped += 1;
            continue;
        };

        if config.project(&project).is_none() && seen_projects.insert(project.clone()) {
            report.projects.push(Project::named(&project));
        }
        if config.work_package(&project, &package.id).is_none()
            && seen_packages.insert((project.clone(), package.id.clone()))
        {
            report.work_packages.push(package.clone());
        }

        match reconcile(db, remote_entry, issue_ref.id, &project, &package.id, spent_on)? {
            Reconciled::Inserted => report.inserted += 1,
            Reconciled::Updated => report.updated += 1,
            Reconciled::Unchanged => report.unchanged += 1,
        }
    }

    info!(
        inserted = report.inserted,
        updated = report.updated,
        unchanged = report.unchanged,
        skipped = report.skipped,
        "pull finished"
    );
    Ok(report)
}

enum Reconciled {
    Inserted,
    Updated,
    Unchanged,
}

fn reconcile(
    db: &Database,
    remote: &RemoteTimeEntry,
    issue_id: u64,
    project: &str,
    work_package: &str,
    spent_on: NaiveDate,
) -> Result<Reconciled, SyncError> {
    let remote_hours = billable_from_hours(remote.hours);
    let duration_secs = remote_hours * 3600.0;
    let span = TimeDelta::milliseconds((duration_secs * 1000.0).round() as i64);

    match db.find_by_remote_id(remote.id as i64)? {
        Some(mut local) => {
            // Compare at booking precision; the raw local duration is finer than what was pushed.
            let hours_changed = (billable_hours(local.duration_secs) - remote_hours).abs() > HOURS_TOLERANCE;
            let date_moved = local.date() != spent_on;
            if !hours_changed && !date_moved {
                return Ok(Reconciled::Unchanged);
            }
            let shift = TimeDelta::days((spent_on - local.date()).num_days());
            local.started_at += shift;
            if hours_changed {
                local.duration_secs = duration_secs;
                local.ended_at = local.started_at + span;
            } else {
                local.ended_at += shift;
            }
            local.remote_issue_id = Some(issue_id as i64);
            db.update_entry(&local)?;
            debug!(id = local.id, remote_id = remote.id, "local entry overwritten from remote");
            Ok(Reconciled::Updated)
        }
        None => {
            let started_at = local_midnight(spent_on);
            db.insert_entry(&NewTimeEntry {
                project: project.to_string(),
                work_package: work_package.to_string(),
                started_at,
                ended_at: started_at + span,
                duration_secs,
                remote_id: Some(remote.id as i64),
                remote_issue_id: Some(issue_id as i64),
            })?;
            Ok(Reconciled::Inserted)
        }
    }
}

/// Remote projects (except the backup project) with their tickets as work packages.
/// Returns `None` when the catalog was imported before and `force` is off.
pub fn import_catalog(
    api: &impl RedmineApi,
    config: &Config,
    force: bool,
) -> Result<Option<CatalogImport>, SyncError> {
    if config.redmine.catalog_imported && !force {
        return Ok(None);
    }
    let backup = config.redmine.backup_project.trim();
    let mut import = CatalogImport::default();

    for remote in api.projects()? {
        if !backup.is_empty() && is_named(&remote, backup) {
            continue;
        }
        let project = Project::named(&remote.name);
        let query = IssueQuery {
            assigned_to_me: config.redmine.assigned_only,
            ..IssueQuery::in_project(remote.id)
        };
        for issue in api.issues(&query)? {
            // Redmine lists subproject issues too.
            if issue.project.id != remote.id {
                continue;
            }
            import
                .work_packages
                .push(WorkPackage::from_ticket(&project.id, issue.id, &issue.subject));
        }
        import.projects.push(project);
    }

    info!(
        projects = import.projects.len(),
        work_packages = import.work_packages.len(),
        "catalog fetched"
    );
    Ok(Some(import))
}

/// Read-only comparison of local bookings and remote tickets.
pub fn verify(api: &impl RedmineApi, db: &Database, config: &Config) -> Result<ConsistencyReport, SyncError> {
    let mut report = ConsistencyReport::default();
    let backup = config.redmine.backup_project.trim();
    let mut wanted: Vec<&str> = config.projects.iter().map(|project| project.name.as_str()).collect();
    if !backup.is_empty() {
        wanted.push(backup);
    }

    for remote in api.projects()? {
        if !wanted.iter().any(|name| is_named(&remote, name)) {
            continue;
        }
        for issue in api.issues(&IssueQuery::in_project(remote.id))? {
            if issue.project.id != remote.id {
                continue;
            }
            let entries = api.time_entries(&TimeEntryQuery::for_issue(issue.id))?;
            let spent_hours: f64 = entries.iter().map(|entry| entry.hours).sum();
            if let Some(estimated_hours) = issue.estimated_hours {
                if spent_hours > estimated_hours + HOURS_TOLERANCE {
                    report.mismatches.push(Mismatch::OverEstimate {
                        issue_id: issue.id,
                        estimated_hours,
                        spent_hours,
                    });
                }
            }
            report.tickets.push(TicketSummary {
                project: remote.name.clone(),
                issue_id: issue.id,
                subject: issue.subject.clone(),
                status: issue.status.as_ref().map(|status| status.name.clone()).unwrap_or_default(),
                estimated_hours: issue.estimated_hours,
                spent_hours,
                entries: entries.len(),
            });
        }
    }

    let remote_hours: BTreeMap<u64, f64> = api
        .time_entries(&TimeEntryQuery::mine())?
        .into_iter()
        .map(|entry| (entry.id, entry.hours))
        .collect();
    for entry in db.all_entries()? {
        let Some(remote_id) = entry.remote_id else {
            continue;
        };
        let local_hours = billable_hours(entry.duration_secs);
        match remote_hours.get(&(remote_id as u64)) {
            None => report.mismatches.push(Mismatch::MissingRemote {
                entry_id: entry.id,
                remote_id,
            }),
            Some(&remote) if (remote - local_hours).abs() > HOURS_TOLERANCE => {
                report.mismatches.push(Mismatch::HoursDiffer {
                    entry_id: entry.id,
                    remote_id,
                    local_hours,
                    remote_hours: remote,
                });
            }
            Some(_) => {}
        }
    }

    info!(
        tickets = report.tickets.len(),
        mismatches = report.mismatches.len(),
        "verify finished"
    );
    Ok(report)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dates::parse_timestamp;
    use crate::redmine::{IssueRef, NamedRef};
    use std::cell::{Cell, RefCell};

    /// In-memory Redmine with just enough behaviour for the sync flows.
    pub(crate) struct FakeRedmine {
        pub projects: Vec<RemoteProject>,
        pub issues: RefCell<Vec<Issue>>,
        pub entries: RefCell<Vec<RemoteTimeEntry>>,
        pub reject_login: bool,
        next_id: Cell<u64>,
    }

    impl FakeRedmine {
        pub(crate) fn new() -> Self {
            Self {
                projects: vec![
                    RemoteProject {
                        id: 1,
                        name: "Backup".to_string(),
                        identifier: "backup".to_string(),
                    },
                    RemoteProject {
                        id: 2,
                        name: "Website".to_string(),
                        identifier: "website".to_string(),
                    },
                ],
                issues: RefCell::new(Vec::new()),
                entries: RefCell::new(Vec::new()),
                reject_login: false,
                next_id: Cell::new(100),
            }
        }

        fn next_id(&self) -> u64 {
            let id = self.next_id.get();
            self.next_id.set(id + 1);
            id
        }

        fn project_ref(&self, id: u64) -> NamedRef {
            let name = self
                .projects
                .iter()
                .find(|project| project.id == id)
                .map(|project| project.name.clone())
                .unwrap_or_default();
            NamedRef { id, name }
        }

        pub(crate) fn add_issue(&self, project_id: u64, subject: &str, estimated_hours: Option<f64>) -> u64 {
            let id = self.next_id();
            self.issues.borrow_mut().push(Issue {
                id,
                project: self.project_ref(project_id),
                subject: subject.to_string(),
                status: Some(NamedRef {
                    id: 1,
                    name: "New".to_string(),
                }),
                estimated_hours,
                assigned_to: None,
            });
            id
        }

        pub(crate) fn add_entry(&self, issue_id: Option<u64>, hours: f64, spent_on: &str) -> u64 {
            let id = self.next_id();
            let project_id = issue_id
                .and_then(|issue_id| {
                    self.issues
                        .borrow()
                        .iter()
                        .find(|issue| issue.id == issue_id)
                        .map(|issue| issue.project.id)
                })
                .unwrap_or(2);
            self.entries.borrow_mut().push(RemoteTimeEntry {
                id,
                project: self.project_ref(project_id),
                issue: issue_id.map(|id| IssueRef { id }),
                hours,
                spent_on: spent_on.to_string(),
                comments: None,
            });
            id
        }
    }

    impl RedmineApi for FakeRedmine {
        fn current_user(&self) -> Result<User, RedmineError> {
            if self.reject_login {
                return Err(RedmineError::Unauthorized);
            }
            Ok(User {
                id: 7,
                login: "jane".to_string(),
            })
        }

        fn projects(&self) -> Result<Vec<RemoteProject>, RedmineError> {
            Ok(self.projects.clone())
        }

        fn issues(&self, query: &IssueQuery) -> Result<Vec<Issue>, RedmineError> {
            Ok(self
                .issues
                .borrow()
                .iter()
                .filter(|issue| query.project_id.is_none_or(|id| issue.project.id == id))
                .filter(|issue| query.subject.as_ref().is_none_or(|subject| &issue.subject == subject))
                .filter(|issue| !query.assigned_to_me || issue.assigned_to.as_ref().is_some_and(|user| user.id == 7))
                .cloned()
                .collect())
        }

        fn issue(&self, id: u64) -> Result<Issue, RedmineError> {
            self.issues
                .borrow()
                .iter()
                .find(|issue| issue.id == id)
                .cloned()
                .ok_or_else(|| RedmineError::NotFound(format!("issues/{id}.json")))
        }

        fn create_issue(&self, issue: &NewIssue) -> Result<Issue, RedmineError> {
            let id = self.add_issue(issue.project_id, &issue.subject, Some(issue.estimated_hours));
            self.issue(id)
        }

        fn time_entries(&self, query: &TimeEntryQuery) -> Result<Vec<RemoteTimeEntry>, RedmineError> {
            Ok(self
                .entries
                .borrow()
                .iter()
                .filter(|entry| {
                    query
                        .issue_id
                        .is_none_or(|id| entry.issue.map(|issue| issue.id) == Some(id))
                })
                .cloned()
                .collect())
        }

        fn create_time_entry(&self, entry: &NewRemoteTimeEntry) -> Result<RemoteTimeEntry, RedmineError> {
            let id = self.add_entry(Some(entry.issue_id), entry.hours, &entry.spent_on);
            let mut entries = self.entries.borrow_mut();
            let created = entries
                .iter_mut()
                .find(|remote| remote.id == id)
                .ok_or_else(|| RedmineError::NotFound("time_entries.json".to_string()))?;
            created.comments = Some(entry.comments.clone());
            Ok(created.clone())
        }

        fn update_time_entry(&self, id: u64, entry: &NewRemoteTimeEntry) -> Result<(), RedmineError> {
            let mut entries = self.entries.borrow_mut();
            let remote = entries
                .iter_mut()
                .find(|remote| remote.id == id)
                .ok_or_else(|| RedmineError::NotFound(format!("time_entries/{id}.json")))?;
            remote.hours = entry.hours;
            remote.spent_on = entry.spent_on.clone();
            remote.comments = Some(entry.comments.clone());
            Ok(())
        }
    }

    fn settings() -> RedmineSettings {
        RedmineSettings {
            url: "https://redmine.example.org".to_string(),
            backup_project: "Backup".to_string(),
            ..RedmineSettings::default()
        }
    }

    fn config() -> Config {
        Config {
            redmine: settings(),
            ..Config::default()
        }
    }

    fn local_entry(db: &Database, secs: f64) -> TimeEntry {
        let started_at = parse_timestamp("2026-02-03T09:00:00+01:00").unwrap();
        db.insert_entry(&NewTimeEntry {
            project: "Project A".to_string(),
            work_package: "Meeting".to_string(),
            started_at,
            ended_at: started_at,
            duration_secs: secs,
            remote_id: None,
            remote_issue_id: None,
        })
        .unwrap()
    }

    #[test]
    fn connect_reports_rejected_credentials() {
        let mut api = FakeRedmine::new();
        assert_eq!(connect(&api).unwrap().login, "jane");
        api.reject_login = true;
        assert!(matches!(
            connect(&api),
            Err(SyncError::Remote(RedmineError::Unauthorized))
        ));
    }

    #[test]
    fn ticket_subject_round_trips() {
        let subject = ticket_subject("Project A", "Meeting");
        assert_eq!(subject, "Project A - Ticket Meeting");
        assert_eq!(parse_ticket_subject(&subject), Some(("Project A", "Meeting")));
        assert_eq!(parse_ticket_subject("Landing page"), None);
    }

    #[test]
    fn push_creates_ticket_then_reuses_it() {
        let api = FakeRedmine::new();
        let db = Database::open_in_memory().unwrap();
        let first = local_entry(&db, 46.0 * 60.0);
        let second = local_entry(&db, 60.0);

        let pushed = push_entry(&api, &db, &settings(), &first).unwrap();
        assert!(pushed.created_issue);
        assert_eq!(pushed.hours, 1.0);

        let again = push_entry(&api, &db, &settings(), &second).unwrap();
        assert!(!again.created_issue);
        assert_eq!(again.issue_id, pushed.issue_id);
        assert_eq!(again.hours, 0.25);

        let entries = api.entries.borrow();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].comments.as_deref(), Some("Initial time entry"));
        assert_eq!(entries[1].comments.as_deref(), Some("Additional time entry"));
        assert_eq!(api.issues.borrow().len(), 1);

        let stored = db.entry(first.id).unwrap();
        assert_eq!(stored.remote_id, Some(pushed.remote_id as i64));
        assert_eq!(stored.remote_issue_id, Some(pushed.issue_id as i64));
    }

    #[test]
    fn push_updates_known_remote_entry() {
        let api = FakeRedmine::new();
        let db = Database::open_in_memory().unwrap();
        let entry = local_entry(&db, 900.0);
        let first = push_entry(&api, &db, &settings(), &entry).unwrap();

        let mut stored = db.entry(entry.id).unwrap();
        stored.duration_secs = 3600.0;
        db.update_entry(&stored).unwrap();
        let second = push_entry(&api, &db, &settings(), &stored).unwrap();

        assert!(second.updated_remote);
        assert_eq!(second.remote_id, first.remote_id);
        let entries = api.entries.borrow();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].hours, 1.0);
    }

    #[test]
    fn push_needs_backup_project() {
        let api = FakeRedmine::new();
        let db = Database::open_in_memory().unwrap();
        let entry = local_entry(&db, 900.0);

        let missing = RedmineSettings {
            backup_project: "Archive".to_string(),
            ..settings()
        };
        assert!(matches!(
            push_entry(&api, &db, &missing, &entry),
            Err(SyncError::BackupProjectNotFound(name)) if name == "Archive"
        ));
        assert!(matches!(
            push_entry(&api, &db, &RedmineSettings::default(), &entry),
            Err(SyncError::NoBackupProject)
        ));
        assert_eq!(db.entry(entry.id).unwrap().remote_id, None);
    }

    #[test]
    fn pull_maps_tickets_and_is_idempotent() {
        let api = FakeRedmine::new();
        let backup_issue = api.add_issue(1, "Project A - Ticket Meeting", None);
        let site_issue = api.add_issue(2, "Landing page", None);
        api.add_entry(Some(backup_issue), 0.5, "2026-02-03");
        api.add_entry(Some(site_issue), 1.1, "2026-02-04");
        api.add_entry(None, 2.0, "2026-02-04");
        let db = Database::open_in_memory().unwrap();
        let config = config();

        let report = pull_time_entries(&api, &db, &config).unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.projects, vec![Project::named("Website")]);
        assert_eq!(
            report.work_packages,
            vec![WorkPackage::from_ticket("Website", site_issue, "Landing page")]
        );

        let entries = db.all_entries().unwrap();
        assert_eq!(entries[0].project, "Project A");
        assert_eq!(entries[0].work_package, "Meeting");
        assert_eq!(entries[0].duration_secs, 1800.0);
        assert_eq!(entries[1].work_package, site_issue.to_string());
        assert_eq!(entries[1].duration_secs, 1.25 * 3600.0);

        let again = pull_time_entries(&api, &db, &config).unwrap();
        assert_eq!(again.inserted, 0);
        assert_eq!(again.unchanged, 2);
        assert_eq!(db.all_entries().unwrap().len(), 2);
    }

    #[test]
    fn pull_overwrites_changed_remote_entries() {
        let api = FakeRedmine::new();
        let issue = api.add_issue(1, "Project A - Ticket Meeting", None);
        let remote_id = api.add_entry(Some(issue), 0.5, "2026-02-03");
        let db = Database::open_in_memory().unwrap();
        pull_time_entries(&api, &db, &config()).unwrap();

        {
            let mut entries = api.entries.borrow_mut();
            entries[0].hours = 2.0;
            entries[0].spent_on = "2026-02-05".to_string();
        }
        let report = pull_time_entries(&api, &db, &config()).unwrap();

        assert_eq!(report.updated, 1);
        let local = db.find_by_remote_id(remote_id as i64).unwrap().unwrap();
        assert_eq!(local.duration_secs, 7200.0);
        assert_eq!(local.date(), NaiveDate::from_ymd_opt(2026, 2, 5).unwrap());
    }

    #[test]
    fn import_skips_backup_project_and_runs_once() {
        let api = FakeRedmine::new();
        api.add_issue(1, "Project A - Ticket Meeting", None);
        let issue = api.add_issue(2, "Landing page", None);
        let mut config = config();

        let import = import_catalog(&api, &config, false).unwrap().unwrap();
        assert_eq!(import.projects, vec![Project::named("Website")]);
        assert_eq!(import.work_packages[0].name, format!("{issue}: Landing page"));

        config.redmine.catalog_imported = true;
        assert_eq!(import_catalog(&api, &config, false).unwrap(), None);
        assert!(import_catalog(&api, &config, true).unwrap().is_some());
    }

    #[test]
    fn verify_flags_differences_without_writing() {
        let api = FakeRedmine::new();
        let db = Database::open_in_memory().unwrap();
        let pushed = local_entry(&db, 900.0);
        let gone = local_entry(&db, 900.0);
        push_entry(&api, &db, &settings(), &pushed).unwrap();
        push_entry(&api, &db, &settings(), &gone).unwrap();
        let gone = db.entry(gone.id).unwrap();
        {
            let mut entries = api.entries.borrow_mut();
            entries.retain(|entry| Some(entry.id as i64) != gone.remote_id);
            entries[0].hours = 3.0;
        }
        let before = db.all_entries().unwrap();

        let report = verify(&api, &db, &config()).unwrap();

        assert_eq!(report.tickets.len(), 1);
        assert_eq!(report.tickets[0].spent_hours, 3.0);
        assert!(report.mismatches.iter().any(|m| matches!(m, Mismatch::MissingRemote { entry_id, .. } if *entry_id == gone.id)));
        assert!(report.mismatches.iter().any(|m| matches!(m, Mismatch::HoursDiffer { entry_id, .. } if *entry_id == pushed.id)));
        assert!(report.mismatches.iter().any(|m| matches!(m, Mismatch::OverEstimate { .. })));
        assert!(!report.is_consistent());
        assert_eq!(db.all_entries().unwrap(), before);
    }

    #[test]
    fn pull_after_push_keeps_exact_local_duration() {
        let api = FakeRedmine::new();
        let db = Database::open_in_memory().unwrap();
        let entry = local_entry(&db, 46.0 * 60.0);
        push_entry(&api, &db, &settings(), &entry).unwrap();

        let report = pull_time_entries(&api, &db, &config()).unwrap();

        assert_eq!(report.unchanged, 1);
        assert_eq!(report.updated, 0);
        let after = db.entry(entry.id).unwrap();
        assert_eq!(after.duration_secs, 2760.0);
        assert_eq!(after.date(), entry.date());
    }

    #[test]
    fn pull_moves_date_without_rounding_duration() {
        let api = FakeRedmine::new();
        let db = Database::open_in_memory().unwrap();
        let entry = local_entry(&db, 46.0 * 60.0);
        push_entry(&api, &db, &settings(), &entry).unwrap();
        api.entries.borrow_mut()[0].spent_on = "2026-02-06".to_string();

        let report = pull_time_entries(&api, &db, &config()).unwrap();

        assert_eq!(report.updated, 1);
        let after = db.entry(entry.id).unwrap();
        assert_eq!(after.duration_secs, 2760.0);
        assert_eq!(after.date(), NaiveDate::from_ymd_opt(2026, 2, 6).unwrap());
    }

    #[test]
    fn pull_recognises_backup_project_by_identifier() {
        let api = FakeRedmine::new();
        let issue = api.add_issue(1, "Project A - Ticket Meeting", None);
        api.add_entry(Some(issue), 0.5, "2026-02-03");
        let db = Database::open_in_memory().unwrap();
        let mut config = config();
        config.redmine.backup_project = "backup".to_string();

        let report = pull_time_entries(&api, &db, &config).unwrap();

        assert_eq!(report.inserted, 1);
        assert!(report.projects.iter().all(|project| project.id != "Backup"));
        let entries = db.all_entries().unwrap();
        assert_eq!(entries[0].project, "Project A");
        assert_eq!(entries[0].work_package, "Meeting");
    }

    #[test]
    fn import_can_narrow_to_assigned_tickets() {
        let api = FakeRedmine::new();
        let mine = api.add_issue(2, "Landing page", None);
        api.add_issue(2, "Footer", None);
        api.issues.borrow_mut()[0].assigned_to = Some(NamedRef {
            id: 7,
            name: "Jane".to_string(),
        });
        let mut config = config();
        config.redmine.assigned_only = true;

        let import = import_catalog(&api, &config, false).unwrap().unwrap();

        assert_eq!(import.work_packages.len(), 1);
        assert_eq!(import.work_packages[0].name, format!("{mine}: Landing page"));
    }
}
