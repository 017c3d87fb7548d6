use chrono::{DateTime, FixedOffset};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::{Config, ConfigError, ConfigStore};
use crate::database::{Database, StoreError};
use crate::dates::{format_timestamp, now_local};
use crate::models::{NewTimeEntry, SessionBackup, TimeEntry, TimerStatus};

/// Time source for the timer, swappable in tests. Wall time stamps entries,
/// the monotonic instant measures them.
pub trait Clock {
    fn now(&self) -> DateTime<FixedOffset>;

    fn instant(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        now_local()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimerError {
    #[error("Select a project first.")]
    NoProjectSelected,
    #[error("Select a work package first.")]
    NoWorkPackageSelected,
    #[error("Unknown selection: {project} / {work_package}")]
    UnknownSelection { project: String, work_package: String },
    #[error("Timer is already running.")]
    AlreadyRunning,
    #[error("Timer is not running.")]
    NotRunning,
    #[error("Timer is not paused.")]
    NotPaused,
    #[error("No active session.")]
    NoSession,
    #[error("No time recorded yet.")]
    NothingRecorded,
}

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error(transparent)]
    Timer(#[from] TimerError),
    #[error("Saving failed: {0}")]
    Store(#[from] StoreError),
    #[error("Entry saved, but the backup could not be cleared: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq)]
struct Session {
    project: String,
    work_package: String,
    started_at: DateTime<FixedOffset>,
    accumulated: Duration,
    running_since: Option<Instant>,
}

/// The one in-progress session, if any.
pub struct Timer<C: Clock = SystemClock> {
    clock: C,
    session: Option<Session>,
}

impl Default for Timer<SystemClock> {
    fn default() -> Self {
        Self::new(SystemClock)
    }
}

impl<C: Clock> Timer<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            session: None,
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn status(&self) -> TimerStatus {
        match &self.session {
            None => TimerStatus::Stopped,
            Some(session) if session.running_since.is_some() => TimerStatus::Running,
            Some(_) => TimerStatus::Paused,
        }
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn selection(&self) -> Option<(&str, &str)> {
        self.session
            .as_ref()
            .map(|session| (session.project.as_str(), session.work_package.as_str()))
    }

    pub fn elapsed(&self) -> Duration {
        match &self.session {
            Some(session) => session.accumulated + self.running_span(session),
            None => Duration::ZERO,
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        duration_secs(self.elapsed())
    }

    /// Starts a new session, or resumes a paused one with the given selection.
    pub fn start(
        &mut self,
        project: Option<&str>,
        work_package: Option<&str>,
        catalog: &Config,
    ) -> Result<(), TimerError> {
        let project = project
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(TimerError::NoProjectSelected)?;
        let work_package = work_package
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(TimerError::NoWorkPackageSelected)?;
        if !catalog.contains_pair(project, work_package) {
            return Err(TimerError::UnknownSelection {
                project: project.to_string(),
                work_package: work_package.to_string(),
            });
        }

        let now = self.clock.instant();
        match self.session.as_mut() {
            Some(session) if session.running_since.is_some() => Err(TimerError::AlreadyRunning),
            Some(session) => {
                session.project = project.to_string();
                session.work_package = work_package.to_string();
                session.running_since = Some(now);
                info!(project, work_package, "timer resumed");
                Ok(())
            }
            None => {
                self.session = Some(Session {
                    project: project.to_string(),
                    work_package: work_package.to_string(),
                    started_at: self.clock.now(),
                    accumulated: Duration::ZERO,
                    running_since: Some(now),
                });
                info!(project, work_package, "timer started");
                Ok(())
            }
        }
    }

    pub fn pause(&mut self) -> Result<(), TimerError> {
        let now = self.clock.instant();
        let session = self.session.as_mut().ok_or(TimerError::NotRunning)?;
        let since = session.running_since.take().ok_or(TimerError::NotRunning)?;
        session.accumulated += now.saturating_duration_since(since);
        info!(elapsed_secs = duration_secs(session.accumulated), "timer paused");
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), TimerError> {
        let now = self.clock.instant();
        let session = self.session.as_mut().ok_or(TimerError::NoSession)?;
        if session.running_since.is_some() {
            return Err(TimerError::NotPaused);
        }
        session.running_since = Some(now);
        info!("timer resumed");
        Ok(())
    }

    pub fn toggle(&mut self) -> Result<TimerStatus, TimerError> {
        match self.status() {
            TimerStatus::Running => self.pause()?,
            TimerStatus::Paused => self.resume()?,
            TimerStatus::Stopped => return Err(TimerError::NoSession),
        }
        Ok(self.status())
    }

    /// Pauses the session and describes it as an entry. The session stays
    /// until [`Timer::discard`] so a failed insert loses nothing.
    pub fn prepare_entry(&mut self) -> Result<NewTimeEntry, TimerError> {
        if self.status() == TimerStatus::Running {
            self.pause()?;
        }
        let session = self.session.as_ref().ok_or(TimerError::NoSession)?;
        if session.accumulated.is_zero() {
            return Err(TimerError::NothingRecorded);
        }
        let ended_at = self.clock.now();
        Ok(NewTimeEntry {
            project: session.project.clone(),
            work_package: session.work_package.clone(),
            started_at: session.started_at,
            ended_at,
            duration_secs: duration_secs(session.accumulated),
            remote_id: None,
            remote_issue_id: None,
        })
    }

    pub fn discard(&mut self) {
        if self.session.take().is_some() {
            info!("session cleared");
        }
    }

    pub fn snapshot(&self) -> Option<SessionBackup> {
        let session = self.session.as_ref()?;
        Some(SessionBackup {
            project: session.project.clone(),
            work_package: session.work_package.clone(),
            elapsed_secs: self.elapsed_secs(),
            saved_at: format_timestamp(&self.clock.now()),
            running: session.running_since.is_some(),
        })
    }

    /// Rebuilds a paused session from a backup.
    pub fn restore(&mut self, backup: &SessionBackup) {
        let millis = if backup.elapsed_secs.is_finite() {
            (backup.elapsed_secs.max(0.0) * 1000.0).round() as u64
        } else {
            0
        };
        let accumulated = Duration::from_millis(millis);
        let offset = chrono::Duration::from_std(accumulated).unwrap_or_else(|_| chrono::Duration::zero());
        self.session = Some(Session {
            project: backup.project.clone(),
            work_package: backup.work_package.clone(),
            started_at: self.clock.now() - offset,
            accumulated,
            running_since: None,
        });
        info!(elapsed_secs = backup.elapsed_secs, "session restored from backup");
    }

    fn running_span(&self, session: &Session) -> Duration {
        session
            .running_since
            .map(|since| self.clock.instant().saturating_duration_since(since))
            .unwrap_or(Duration::ZERO)
    }
}

/// Persists the current session as exactly one entry, then clears the
/// session and the config backup.
pub fn save_session<C: Clock>(
    timer: &mut Timer<C>,
    db: &Database,
    config: &mut ConfigStore,
) -> Result<TimeEntry, SaveError> {
    let entry = timer.prepare_entry()?;
    if !config.config().contains_pair(&entry.project, &entry.work_package) {
        return Err(TimerError::UnknownSelection {
            project: entry.project,
            work_package: entry.work_package,
        }
        .into());
    }

    let stored = db.insert_entry(&entry)?;
    timer.discard();
    if let Err(err) = config.clear_backup() {
        warn!("backup not cleared after save: {err}");
        return Err(err.into());
    }
    Ok(stored)
}

fn duration_secs(value: Duration) -> f64 {
    value.as_millis() as f64 / 1000.0
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::CONFIG_FILE;
    use crate::dates::parse_timestamp;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Clock that only moves when told to.
    #[derive(Clone)]
    pub(crate) struct ManualClock {
        wall: Rc<Cell<DateTime<FixedOffset>>>,
        base: Instant,
        offset: Rc<Cell<Duration>>,
    }

    impl ManualClock {
        pub(crate) fn at(value: &str) -> Self {
            Self {
                wall: Rc::new(Cell::new(parse_timestamp(value).unwrap())),
                base: Instant::now(),
                offset: Rc::new(Cell::new(Duration::ZERO)),
            }
        }

        pub(crate) fn advance(&self, seconds: u64) {
            self.wall
                .set(self.wall.get() + chrono::Duration::seconds(seconds as i64));
            self.offset.set(self.offset.get() + Duration::from_secs(seconds));
        }

        /// Moves only the wall clock, like an NTP correction.
        pub(crate) fn set_wall_back(&self, seconds: i64) {
            self.wall.set(self.wall.get() - chrono::Duration::seconds(seconds));
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<FixedOffset> {
            self.wall.get()
        }

        fn instant(&self) -> Instant {
            self.base + self.offset.get()
        }
    }

    fn manual_timer() -> (Timer<ManualClock>, ManualClock) {
        let clock = ManualClock::at("2026-02-03T09:00:00+01:00");
        (Timer::new(clock.clone()), clock)
    }

    #[test]
    fn start_without_selection_leaves_no_session() {
        let (mut timer, _) = manual_timer();
        let config = Config::default();

        assert_eq!(
            timer.start(None, Some("Meeting"), &config),
            Err(TimerError::NoProjectSelected)
        );
        assert_eq!(
            timer.start(Some("Project A"), Some("  "), &config),
            Err(TimerError::NoWorkPackageSelected)
        );
        assert!(matches!(
            timer.start(Some("Project A"), Some("Nope"), &config),
            Err(TimerError::UnknownSelection { .. })
        ));
        assert!(!timer.has_session());
        assert_eq!(timer.status(), TimerStatus::Stopped);
    }

    #[test]
    fn start_twice_fails_while_running() {
        let (mut timer, _) = manual_timer();
        let config = Config::default();
        timer.start(Some("Project A"), Some("Meeting"), &config).unwrap();
        assert_eq!(
            timer.start(Some("Project A"), Some("Meeting"), &config),
            Err(TimerError::AlreadyRunning)
        );
    }

    #[test]
    fn pause_and_resume_preserve_elapsed_time() {
        let (mut timer, clock) = manual_timer();
        let config = Config::default();
        timer.start(Some("Project A"), Some("Meeting"), &config).unwrap();
        clock.advance(90);
        timer.pause().unwrap();
        assert_eq!(timer.elapsed_secs(), 90.0);

        clock.advance(600);
        assert_eq!(timer.elapsed_secs(), 90.0);
        assert_eq!(timer.status(), TimerStatus::Paused);

        timer.resume().unwrap();
        clock.advance(30);
        assert_eq!(timer.elapsed_secs(), 120.0);
        assert_eq!(timer.pause(), Ok(()));
        assert_eq!(timer.pause(), Err(TimerError::NotRunning));
    }

    #[test]
    fn wall_clock_corrections_do_not_shrink_elapsed() {
        let (mut timer, clock) = manual_timer();
        let config = Config::default();
        timer.start(Some("Project A"), Some("Meeting"), &config).unwrap();
        clock.advance(60);
        clock.set_wall_back(3600);
        assert_eq!(timer.elapsed_secs(), 60.0);
        clock.advance(1);
        assert_eq!(timer.elapsed_secs(), 61.0);
    }

    #[test]
    fn start_on_paused_session_resumes() {
        let (mut timer, clock) = manual_timer();
        let config = Config::default();
        timer.start(Some("Project A"), Some("Meeting"), &config).unwrap();
        clock.advance(60);
        timer.pause().unwrap();
        timer.start(Some("Project B"), Some("Design"), &config).unwrap();
        clock.advance(60);

        assert_eq!(timer.elapsed_secs(), 120.0);
        assert_eq!(timer.selection(), Some(("Project B", "Design")));
    }

    #[test]
    fn toggle_switches_state() {
        let (mut timer, _) = manual_timer();
        assert_eq!(timer.toggle(), Err(TimerError::NoSession));
        timer
            .start(Some("Project A"), Some("Meeting"), &Config::default())
            .unwrap();
        assert_eq!(timer.toggle(), Ok(TimerStatus::Paused));
        assert_eq!(timer.toggle(), Ok(TimerStatus::Running));
    }

    #[test]
    fn zero_duration_is_not_recorded() {
        let (mut timer, _) = manual_timer();
        timer
            .start(Some("Project A"), Some("Meeting"), &Config::default())
            .unwrap();
        assert_eq!(timer.prepare_entry(), Err(TimerError::NothingRecorded));
        assert!(timer.has_session());
    }

    #[test]
    fn snapshot_and_restore() {
        let (mut timer, clock) = manual_timer();
        timer
            .start(Some("Project A"), Some("Meeting"), &Config::default())
            .unwrap();
        clock.advance(125);
        let backup = timer.snapshot().unwrap();
        assert_eq!(backup.elapsed_secs, 125.0);
        assert!(backup.running);

        let (mut restored, restored_clock) = manual_timer();
        restored.restore(&backup);
        restored_clock.advance(1000);
        assert_eq!(restored.status(), TimerStatus::Paused);
        assert_eq!(restored.elapsed_secs(), 125.0);
    }

    #[test]
    fn save_produces_exactly_one_entry_and_clears_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ConfigStore::load(dir.path().join(CONFIG_FILE)).unwrap();
        let db = Database::open_in_memory().unwrap();
        let (mut timer, clock) = manual_timer();

        timer
            .start(Some("Project A"), Some("Meeting"), config.config())
            .unwrap();
        clock.advance(1500);
        config.set_backup(timer.snapshot().unwrap()).unwrap();
        let elapsed = timer.elapsed_secs();

        let stored = save_session(&mut timer, &db, &mut config).unwrap();

        let all = db.all_entries().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], stored);
        assert_eq!(stored.duration_secs, elapsed);
        assert_eq!(stored.duration_secs, 1500.0);
        assert!(!timer.has_session());
        assert!(config.config().backup.is_none());
    }

    #[test]
    fn save_rejects_pairs_removed_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ConfigStore::load(dir.path().join(CONFIG_FILE)).unwrap();
        let db = Database::open_in_memory().unwrap();
        let (mut timer, clock) = manual_timer();
        timer
            .start(Some("Project A"), Some("Meeting"), config.config())
            .unwrap();
        clock.advance(60);
        config
            .update(|cfg| {
                cfg.remove_project("Project A");
            })
            .unwrap();

        let result = save_session(&mut timer, &db, &mut config);

        assert!(matches!(result, Err(SaveError::Timer(TimerError::UnknownSelection { .. }))));
        assert!(timer.has_session());
        assert!(db.all_entries().unwrap().is_empty());
    }

    #[test]
    fn failed_insert_keeps_session_and_backup() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ConfigStore::load(dir.path().join(CONFIG_FILE)).unwrap();
        let db_path = dir.path().join("entries.db");
        let db = Database::open(&db_path).unwrap();
        let (mut timer, clock) = manual_timer();
        timer
            .start(Some("Project A"), Some("Meeting"), config.config())
            .unwrap();
        clock.advance(600);
        config.set_backup(timer.snapshot().unwrap()).unwrap();
        rusqlite::Connection::open(&db_path)
            .unwrap()
            .execute("DROP TABLE time_entries", [])
            .unwrap();

        let result = save_session(&mut timer, &db, &mut config);

        assert!(matches!(result, Err(SaveError::Store(_))));
        assert!(timer.has_session());
        assert_eq!(timer.elapsed_secs(), 600.0);
        assert!(config.config().backup.is_some());
    }
}
