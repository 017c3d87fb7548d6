use anyhow::Context;
use chrono::NaiveDate;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::widgets::ListState;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::{CONFIG_FILE, Config, ConfigStore, Credentials, DATABASE_FILE};
use crate::database::{Database, EntryFilter};
use crate::dates::{Period, now_local};
use crate::export::export_entries;
use crate::jobs::{JobContext, JobResult, JobRunner, RemoteJob, RemoteOutcome};
use crate::models::{Project, SessionBackup, TimerStatus, WorkPackage};
use crate::redmine::RedmineError;
use crate::reporting::{
    self, AverageDuration, Bucket, DailyReport, DurationUnit, FrequencyBucket, ReportError,
};
use crate::sync::SyncError;
use crate::timer::{self, Clock, SystemClock, Timer};

pub const MAX_LOGIN_ATTEMPTS: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Dashboard,
    Manage,
    Charts,
    Today,
    Login,
    BackupPrompt,
    ClosePrompt,
    Report,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Projects,
    WorkPackages,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartView {
    Averages,
    Frequency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginField {
    Username,
    Password,
    Remember,
}

impl LoginField {
    fn next(self) -> Self {
        match self {
            LoginField::Username => LoginField::Password,
            LoginField::Password => LoginField::Remember,
            LoginField::Remember => LoginField::Username,
        }
    }

    fn previous(self) -> Self {
        match self {
            LoginField::Username => LoginField::Remember,
            LoginField::Password => LoginField::Username,
            LoginField::Remember => LoginField::Password,
        }
    }
}

#[derive(Debug, Default)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    pub remember: bool,
    pub field: Option<LoginField>,
    pub failures: u8,
    pub message: Option<String>,
}

impl LoginForm {
    pub fn locked(&self) -> bool {
        self.failures >= MAX_LOGIN_ATTEMPTS
    }

    pub fn active_field(&self) -> LoginField {
        self.field.unwrap_or(LoginField::Username)
    }
}

pub struct App<C: Clock = SystemClock> {
    pub should_quit: bool,
    pub mode: Mode,
    pub show_help: bool,
    pub status: Option<String>,
    pub focus: Focus,
    pub project_state: ListState,
    pub package_state: ListState,
    pub manage_input: Option<String>,
    pub chart_view: ChartView,
    pub duration_unit: DurationUnit,
    pub bucket: Bucket,
    pub chart_project_only: bool,
    pub chart_period: Period,
    pub chart_packages: BTreeSet<String>,
    pub chart_cursor: usize,
    pub averages: Vec<AverageDuration>,
    pub frequency: Vec<FrequencyBucket>,
    pub chart_message: Option<String>,
    pub day: NaiveDate,
    pub daily: DailyReport,
    pub report_title: String,
    pub report_lines: Vec<String>,
    pub report_scroll: u16,
    pub login: LoginForm,
    pub forecast_hours: Option<f64>,
    pub connected_as: Option<String>,
    timer: Timer<C>,
    config: ConfigStore,
    db: Database,
    db_path: PathBuf,
    data_dir: PathBuf,
    jobs: JobRunner,
    credentials: Option<Credentials>,
    pending_backup: Option<SessionBackup>,
    login_pending: bool,
    last_backup: Option<Instant>,
    toast: Option<Toast>,
}

impl App<SystemClock> {
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        Self::with_clock(data_dir, SystemClock)
    }
}

impl<C: Clock> App<C> {
    pub fn with_clock(data_dir: &Path, clock: C) -> anyhow::Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("creating data directory {}", data_dir.display()))?;
        let config = ConfigStore::load(data_dir.join(CONFIG_FILE)).context("loading configuration")?;
        let db_path = data_dir.join(DATABASE_FILE);
        let db = Database::open(&db_path).context("opening the local database")?;

        let pending_backup = config.config().backup.clone();
        let mode = if pending_backup.is_some() {
            Mode::BackupPrompt
        } else {
            Mode::Dashboard
        };
        let connected_as = config.config().redmine.user.clone();
        let login = LoginForm {
            username: connected_as.clone().unwrap_or_default(),
            ..LoginForm::default()
        };

        let mut app = App {
            should_quit: false,
            mode,
            show_help: false,
            status: None,
            focus: Focus::Projects,
            project_state: ListState::default(),
            package_state: ListState::default(),
            manage_input: None,
            chart_view: ChartView::Averages,
            duration_unit: DurationUnit::default(),
            bucket: Bucket::default(),
            chart_project_only: false,
            chart_period: Period::default(),
            chart_packages: BTreeSet::new(),
            chart_cursor: 0,
            averages: Vec::new(),
            frequency: Vec::new(),
            chart_message: None,
            day: now_local().date_naive(),
            daily: DailyReport::default(),
            report_title: String::new(),
            report_lines: Vec::new(),
            report_scroll: 0,
            login,
            forecast_hours: None,
            connected_as,
            timer: Timer::new(clock),
            config,
            db,
            db_path,
            data_dir: data_dir.to_path_buf(),
            jobs: JobRunner::default(),
            credentials: None,
            pending_backup,
            login_pending: false,
            last_backup: None,
            toast: None,
        };
        app.clamp_selection();
        app.refresh_forecast();
        Ok(app)
    }

    pub fn config(&self) -> &Config {
        self.config.config()
    }

    pub fn timer(&self) -> &Timer<C> {
        &self.timer
    }

    pub fn pending_backup(&self) -> Option<&SessionBackup> {
        self.pending_backup.as_ref()
    }

    pub fn projects(&self) -> &[Project] {
        &self.config.config().projects
    }

    pub fn packages(&self) -> Vec<&WorkPackage> {
        match self.selected_project() {
            Some(project) => self.config.config().work_packages_for(&project.id).collect(),
            None => Vec::new(),
        }
    }

    pub fn selected_project(&self) -> Option<&Project> {
        self.project_state
            .selected()
            .and_then(|index| self.config.config().projects.get(index))
    }

    pub fn selected_package(&self) -> Option<&WorkPackage> {
        let index = self.package_state.selected()?;
        self.packages().get(index).copied()
    }

    /// Called once per loop iteration.
    pub fn tick(&mut self) {
        self.poll_jobs();
        self.auto_backup();
    }

    pub fn handle_key_event(&mut self, key: KeyEvent) {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.request_quit();
            return;
        }

        if self.show_help {
            match key.code {
                KeyCode::Char('h') | KeyCode::Esc => self.show_help = false,
                KeyCode::Char('q') => self.request_quit(),
                _ => {}
            }
            return;
        }

        match self.mode {
            Mode::Dashboard => self.handle_dashboard_input(key),
            Mode::Manage => self.handle_manage_input(key),
            Mode::Charts => self.handle_charts_input(key),
            Mode::Today => self.handle_today_input(key),
            Mode::Login => self.handle_login_input(key),
            Mode::BackupPrompt => self.handle_backup_prompt(key),
            Mode::ClosePrompt => self.handle_close_prompt(key),
            Mode::Report => self.handle_report_input(key),
        }
    }

    fn handle_dashboard_input(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') => self.request_quit(),
            KeyCode::Char('h') => self.show_help = true,
            KeyCode::Char('s') => self.start_timer(),
            KeyCode::Char('p') | KeyCode::Char(' ') => self.toggle_timer(),
            KeyCode::Enter => {
                self.save_current_session();
            }
            KeyCode::Char('d') => self.discard_session(),
            KeyCode::Char('x') => self.export(),
            KeyCode::Char('c') => self.open_charts(),
            KeyCode::Char('t') => self.open_today(),
            KeyCode::Char('m') => {
                self.manage_input = None;
                self.mode = Mode::Manage;
            }
            KeyCode::Char('l') => self.open_login(),
            KeyCode::Char('y') => self.submit(RemoteJob::Pull),
            KeyCode::Char('i') => self.submit(RemoteJob::Import { force: false }),
            KeyCode::Char('I') => self.submit(RemoteJob::Import { force: true }),
            KeyCode::Char('v') => self.submit(RemoteJob::Verify),
            KeyCode::Char('u') => self.push_latest(),
            KeyCode::Up => self.move_selection(false),
            KeyCode::Down => self.move_selection(true),
            KeyCode::Left | KeyCode::BackTab => self.focus = Focus::Projects,
            KeyCode::Right | KeyCode::Tab => self.focus = Focus::WorkPackages,
            _ => {}
        }
    }

    fn handle_manage_input(&mut self, key: KeyEvent) {
        if let Some(input) = self.manage_input.as_mut() {
            match key.code {
                KeyCode::Enter => self.commit_manage_input(),
                KeyCode::Esc => self.manage_input = None,
                KeyCode::Backspace => {
                    input.pop();
                }
                KeyCode::Char(ch) if !ch.is_control() => input.push(ch),
                _ => {}
            }
            return;
        }

        match key.code {
            KeyCode::Char('q') => self.request_quit(),
            KeyCode::Esc | KeyCode::Char('m') => self.mode = Mode::Dashboard,
            KeyCode::Char('a') => {
                if self.focus == Focus::WorkPackages && self.selected_project().is_none() {
                    self.set_toast("Select a project first.", true);
                } else {
                    self.manage_input = Some(String::new());
                }
            }
            KeyCode::Char('r') | KeyCode::Delete => self.remove_selected(),
            KeyCode::Up => self.move_selection(false),
            KeyCode::Down => self.move_selection(true),
            KeyCode::Left | KeyCode::BackTab => self.focus = Focus::Projects,
            KeyCode::Right | KeyCode::Tab => self.focus = Focus::WorkPackages,
            _ => {}
        }
    }

    fn handle_charts_input(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') => self.request_quit(),
            KeyCode::Esc | KeyCode::Char('c') => self.mode = Mode::Dashboard,
            KeyCode::Tab => {
                self.chart_view = match self.chart_view {
                    ChartView::Averages => ChartView::Frequency,
                    ChartView::Frequency => ChartView::Averages,
                };
            }
            KeyCode::Char('u') => {
                self.duration_unit = self.duration_unit.next();
                self.refresh_charts();
            }
            KeyCode::Char('b') => {
                self.bucket = self.bucket.next();
                self.refresh_charts();
            }
            KeyCode::Char('f') => {
                self.chart_project_only = !self.chart_project_only;
                self.refresh_charts();
            }
            KeyCode::Char('r') => {
                self.chart_period = self.chart_period.next();
                self.refresh_charts();
            }
            KeyCode::Up | KeyCode::Down => {
                let len = self.packages().len();
                if len > 0 {
                    let mut state = ListState::default().with_selected(Some(self.chart_cursor));
                    step(&mut state, len, key.code == KeyCode::Down);
                    self.chart_cursor = state.selected().unwrap_or(0);
                }
            }
            KeyCode::Char(' ') => {
                let Some(package) = self.packages().get(self.chart_cursor).map(|package| package.id.clone()) else {
                    return;
                };
                if !self.chart_packages.remove(&package) {
                    self.chart_packages.insert(package);
                }
                self.refresh_charts();
            }
            KeyCode::Char('a') => {
                self.chart_packages.clear();
                self.refresh_charts();
            }
            _ => {}
        }
    }

    fn handle_today_input(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') => self.request_quit(),
            KeyCode::Esc | KeyCode::Char('t') => self.mode = Mode::Dashboard,
            KeyCode::Left => {
                if let Some(day) = self.day.pred_opt() {
                    self.day = day;
                    self.refresh_daily();
                }
            }
            KeyCode::Right => {
                if let Some(day) = self.day.succ_opt() {
                    self.day = day;
                    self.refresh_daily();
                }
            }
            _ => {}
        }
    }

    fn handle_login_input(&mut self, key: KeyEvent) {
        if self.jobs.is_busy() {
            if key.code == KeyCode::Esc {
                self.mode = Mode::Dashboard;
            }
            return;
        }

        let field = self.login.active_field();
        match key.code {
            KeyCode::Esc => {
                self.login.password.clear();
                self.mode = Mode::Dashboard;
            }
            KeyCode::Tab | KeyCode::Down => self.login.field = Some(field.next()),
            KeyCode::BackTab | KeyCode::Up => self.login.field = Some(field.previous()),
            KeyCode::Enter => self.submit_login(),
            KeyCode::Backspace => match field {
                LoginField::Username => {
                    self.login.username.pop();
                }
                LoginField::Password => {
                    self.login.password.pop();
                }
                LoginField::Remember => {}
            },
            KeyCode::Char(' ') if field == LoginField::Remember => {
                self.login.remember = !self.login.remember;
            }
            KeyCode::Char(ch) if !ch.is_control() => match field {
                LoginField::Username => self.login.username.push(ch),
                LoginField::Password => self.login.password.push(ch),
                LoginField::Remember => {}
            },
            _ => {}
        }
    }

    fn handle_backup_prompt(&mut self, key: KeyEvent) {
        let Some(backup) = self.pending_backup.clone() else {
            self.mode = Mode::Dashboard;
            return;
        };
        match key.code {
            KeyCode::Char('r') | KeyCode::Enter => {
                self.timer.restore(&backup);
                if backup.running {
                    if let Err(err) = self.timer.resume() {
                        warn!("restored session not resumed: {err}");
                    }
                }
                self.select_pair(&backup.project, &backup.work_package);
                self.pending_backup = None;
                self.mode = Mode::Dashboard;
                self.write_backup();
                self.set_toast("Session restored.", false);
            }
            KeyCode::Char('s') => {
                self.timer.restore(&backup);
                self.pending_backup = None;
                self.mode = Mode::Dashboard;
                self.save_current_session();
            }
            KeyCode::Char('d') => {
                self.pending_backup = None;
                self.mode = Mode::Dashboard;
                match self.config.clear_backup() {
                    Ok(()) => self.set_toast("Backup deleted.", false),
                    Err(err) => self.set_toast(format!("Backup not deleted: {err}"), true),
                }
            }
            _ => {}
        }
    }

    fn handle_close_prompt(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('s') | KeyCode::Enter => {
                self.mode = Mode::Dashboard;
                if self.save_current_session() {
                    self.should_quit = true;
                }
            }
            KeyCode::Char('d') => {
                self.discard_session();
                self.should_quit = true;
            }
            KeyCode::Char('c') | KeyCode::Esc => self.mode = Mode::Dashboard,
            _ => {}
        }
    }

    fn handle_report_input(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') => self.request_quit(),
            KeyCode::Esc | KeyCode::Enter => self.mode = Mode::Dashboard,
            KeyCode::Up => self.report_scroll = self.report_scroll.saturating_sub(1),
            KeyCode::Down => {
                let max = self.report_lines.len().saturating_sub(1) as u16;
                self.report_scroll = (self.report_scroll + 1).min(max);
            }
            _ => {}
        }
    }

    fn request_quit(&mut self) {
        if self.timer.has_session() {
            self.mode = Mode::ClosePrompt;
        } else {
            self.should_quit = true;
        }
    }

    fn start_timer(&mut self) {
        let project = self.selected_project().map(|project| project.id.clone());
        let package = self.selected_package().map(|package| package.id.clone());
        match self
            .timer
            .start(project.as_deref(), package.as_deref(), self.config.config())
        {
            Ok(()) => {
                self.write_backup();
                self.set_toast("Timer started.", false);
            }
            Err(err) => self.set_toast(err.to_string(), true),
        }
    }

    fn toggle_timer(&mut self) {
        match self.timer.toggle() {
            Ok(status) => {
                self.write_backup();
                self.set_toast(format!("Timer {}.", status.label().to_lowercase()), false);
            }
            Err(err) => self.set_toast(err.to_string(), true),
        }
    }

    fn save_current_session(&mut self) -> bool {
        match timer::save_session(&mut self.timer, &self.db, &mut self.config) {
            Ok(entry) => {
                self.last_backup = None;
                let hours = self.config.config().rounding.hours(entry.duration_secs);
                let label = self
                    .config
                    .config()
                    .work_package_label(&entry.project, &entry.work_package);
                self.set_toast(format!("Saved {hours:.2}h on {} / {label}.", entry.project), false);
                self.refresh_forecast();
                if self.config.config().redmine.push_on_save && self.has_credentials() {
                    self.submit(RemoteJob::Push { entry_id: entry.id });
                }
                true
            }
            Err(err) => {
                warn!("session not saved: {err}");
                self.set_toast(err.to_string(), true);
                false
            }
        }
    }

    fn discard_session(&mut self) {
        if !self.timer.has_session() {
            self.set_toast("No active session.", true);
            return;
        }
        self.timer.discard();
        self.last_backup = None;
        match self.config.clear_backup() {
            Ok(()) => self.set_toast("Session discarded.", false),
            Err(err) => self.set_toast(format!("Backup not cleared: {err}"), true),
        }
    }

    fn auto_backup(&mut self) {
        if self.timer.status() != TimerStatus::Running {
            return;
        }
        let interval = Duration::from_secs(self.config.config().backup_interval_secs.max(1));
        let now = self.timer.clock().instant();
        if self
            .last_backup
            .is_some_and(|last| now.saturating_duration_since(last) < interval)
        {
            return;
        }
        self.write_backup();
    }

    fn write_backup(&mut self) {
        let Some(snapshot) = self.timer.snapshot() else {
            return;
        };
        match self.config.set_backup(snapshot) {
            Ok(()) => self.last_backup = Some(self.timer.clock().instant()),
            Err(err) => {
                error!("backup failed: {err}");
                self.set_toast(format!("Backup failed: {err}"), true);
            }
        }
    }

    fn export(&mut self) {
        let path = self.config.config().export_path(&self.data_dir);
        match export_entries(&self.db, &EntryFilter::default(), self.config.config(), &path) {
            Ok(rows) => self.set_toast(format!("Exported {rows} entries to {}.", path.display()), false),
            Err(err) => self.set_toast(err.to_string(), true),
        }
    }

    fn open_charts(&mut self) {
        let available: BTreeSet<String> = self.packages().iter().map(|package| package.id.clone()).collect();
        self.chart_packages.retain(|package| available.contains(package));
        self.chart_cursor = self.chart_cursor.min(available.len().saturating_sub(1));
        self.mode = Mode::Charts;
        self.refresh_charts();
    }

    /// Work packages are picked from the selected project's list.
    fn chart_filter(&self) -> EntryFilter {
        let project = match self.selected_project() {
            Some(project) if self.chart_project_only => Some(project.id.clone()),
            _ => None,
        };
        EntryFilter {
            range: self.chart_period.range(self.timer.clock().now().date_naive()),
            project,
            work_packages: self.chart_packages.iter().cloned().collect(),
        }
    }

    /// Legend text for a work package id in the current chart.
    pub fn chart_series_label(&self, work_package: &str) -> String {
        match self.selected_project() {
            Some(project) if self.chart_project_only => self.config().work_package_label(&project.id, work_package),
            _ => work_package.to_string(),
        }
    }

    fn refresh_charts(&mut self) {
        let filter = self.chart_filter();
        self.chart_message = None;

        self.averages = match reporting::average_durations(&self.db, &filter, self.duration_unit) {
            Ok(rows) => rows,
            Err(ReportError::NoData) => Vec::new(),
            Err(err) => {
                self.chart_message = Some(err.to_string());
                Vec::new()
            }
        };

        let frequency = self
            .db
            .entries(&filter)
            .map_err(ReportError::from)
            .and_then(|entries| reporting::work_package_frequency(&entries, self.bucket));
        self.frequency = match frequency {
            Ok(buckets) => buckets,
            Err(ReportError::NoData) => Vec::new(),
            Err(err) => {
                self.chart_message = Some(err.to_string());
                Vec::new()
            }
        };
    }

    fn open_today(&mut self) {
        self.day = now_local().date_naive();
        self.mode = Mode::Today;
        self.refresh_daily();
    }

    fn refresh_daily(&mut self) {
        match reporting::daily_entries(&self.db, self.day, &self.config.config().rounding) {
            Ok(report) => self.daily = report,
            Err(err) => {
                self.daily = DailyReport::default();
                self.set_toast(err.to_string(), true);
            }
        }
    }

    fn refresh_forecast(&mut self) {
        let pair = self
            .selected_project()
            .zip(self.selected_package())
            .map(|(project, package)| (project.id.clone(), package.id.clone()));
        self.forecast_hours = match pair {
            Some((project, package)) => reporting::forecast(&self.db, &project, &package).unwrap_or_else(|err| {
                warn!("forecast unavailable: {err}");
                None
            }),
            None => None,
        };
    }

    fn commit_manage_input(&mut self) {
        let name = self.manage_input.take().unwrap_or_default().trim().to_string();
        if name.is_empty() {
            self.set_toast("Name must not be empty.", true);
            return;
        }

        let mut added = false;
        let result = match self.focus {
            Focus::Projects => {
                let project = Project::named(&name);
                self.config.update(|config| added = config.add_project(project))
            }
            Focus::WorkPackages => {
                let Some(project) = self.selected_project().map(|project| project.id.clone()) else {
                    self.set_toast("Select a project first.", true);
                    return;
                };
                let package = WorkPackage::named(&project, &name);
                self.config.update(|config| added = config.add_work_package(package))
            }
        };

        match result {
            Err(err) => self.set_toast(format!("Not saved: {err}"), true),
            Ok(()) if !added => self.set_toast(format!("'{name}' already exists."), true),
            Ok(()) => {
                info!(name, "catalog entry added");
                self.set_toast(format!("Added '{name}'."), false);
            }
        }
        self.clamp_selection();
        self.refresh_forecast();
    }

    fn remove_selected(&mut self) {
        let Some(project) = self.selected_project().map(|project| project.id.clone()) else {
            return;
        };
        let active = self.timer.selection().map(|(p, w)| (p.to_string(), w.to_string()));

        let result = match self.focus {
            Focus::Projects => {
                if active.as_ref().is_some_and(|(p, _)| *p == project) {
                    self.set_toast("Project is used by the current session.", true);
                    return;
                }
                self.config.update(|config| {
                    config.remove_project(&project);
                })
            }
            Focus::WorkPackages => {
                let Some(package) = self.selected_package().map(|package| package.id.clone()) else {
                    return;
                };
                if active.as_ref().is_some_and(|(p, w)| *p == project && *w == package) {
                    self.set_toast("Work package is used by the current session.", true);
                    return;
                }
                self.config.update(|config| {
                    config.remove_work_package(&project, &package);
                })
            }
        };

        match result {
            Ok(()) => self.set_toast("Removed.", false),
            Err(err) => self.set_toast(format!("Not saved: {err}"), true),
        }
        self.clamp_selection();
        self.refresh_forecast();
    }

    fn open_login(&mut self) {
        if self.login.locked() {
            self.set_toast("Login disabled after 3 failed attempts.", true);
            return;
        }
        if !self.config.config().redmine.is_configured() {
            self.set_toast(
                format!("Set redmine.url in {} first.", self.config.path().display()),
                true,
            );
            return;
        }
        self.login.field = Some(LoginField::Username);
        self.login.message = None;
        self.mode = Mode::Login;
    }

    fn submit_login(&mut self) {
        let username = self.login.username.trim().to_string();
        if username.is_empty() {
            self.login.message = Some("Username is required.".to_string());
            return;
        }
        let credentials = Credentials::new(username, self.login.password.clone());
        let remember = self.login.remember;
        if self.start_job(RemoteJob::Connect { remember }, credentials) {
            self.login.message = Some("Connecting...".to_string());
        }
    }

    fn has_credentials(&self) -> bool {
        self.credentials.is_some() || Credentials::resolve(&self.config.config().redmine).is_some()
    }

    fn push_latest(&mut self) {
        match self.db.latest_entry() {
            Ok(Some(entry)) => self.submit(RemoteJob::Push { entry_id: entry.id }),
            Ok(None) => self.set_toast("No saved entries yet.", true),
            Err(err) => self.set_toast(err.to_string(), true),
        }
    }

    fn submit(&mut self, job: RemoteJob) {
        if let Some(running) = self.jobs.current() {
            self.set_toast(format!("{running}... please wait."), true);
            return;
        }
        let settings = &self.config.config().redmine;
        if !settings.is_configured() {
            self.set_toast("Redmine URL is not configured.", true);
            return;
        }
        let credentials = self
            .credentials
            .clone()
            .or_else(|| Credentials::resolve(settings));
        match credentials {
            Some(credentials) => {
                self.start_job(job, credentials);
            }
            None => self.open_login(),
        }
    }

    fn start_job(&mut self, job: RemoteJob, credentials: Credentials) -> bool {
        let label = job.label();
        let context = JobContext {
            config: self.config.config().clone(),
            credentials,
            database: self.db_path.clone(),
        };
        let login = matches!(job, RemoteJob::Connect { .. });
        if self.jobs.submit(job, context) {
            self.login_pending = login;
            self.status = Some(format!("{label}..."));
            true
        } else {
            self.set_toast("A remote job is already running.", true);
            false
        }
    }

    fn poll_jobs(&mut self) {
        let Some(JobResult { label, result }) = self.jobs.poll() else {
            return;
        };
        self.status = None;
        let login = std::mem::take(&mut self.login_pending);
        match result {
            Ok(outcome) => self.apply_outcome(outcome),
            Err(err) => self.handle_job_error(label, err, login),
        }
    }

    fn apply_outcome(&mut self, outcome: RemoteOutcome) {
        match outcome {
            RemoteOutcome::Connected {
                user,
                credentials,
                remember,
            } => {
                self.login.failures = 0;
                self.login.password.clear();
                self.login.message = None;
                self.mode = Mode::Dashboard;
                self.connected_as = Some(user.login.clone());
                self.credentials = Some(credentials.clone());
                let encoded = remember.then(|| credentials.encode());
                let login = user.login.clone();
                if let Err(err) = self.config.update(|config| {
                    config.redmine.user = Some(login);
                    if encoded.is_some() {
                        config.redmine.credentials = encoded;
                    }
                }) {
                    self.set_toast(format!("Connected, but settings not saved: {err}"), true);
                } else {
                    self.set_toast(format!("Connected as {}.", user.login), false);
                }
                if !self.config.config().redmine.catalog_imported {
                    self.start_job(RemoteJob::Import { force: false }, credentials);
                }
            }
            RemoteOutcome::Pulled(report) => {
                let merged = self.merge_catalog(&report.projects, &report.work_packages, false);
                let mut message = report.summary();
                if merged > 0 {
                    message.push_str(&format!(" {merged} catalog additions."));
                }
                self.set_toast(message, false);
                self.refresh_forecast();
            }
            RemoteOutcome::Imported(Some(import)) => {
                let merged = self.merge_catalog(&import.projects, &import.work_packages, true);
                self.set_toast(format!("Imported {merged} projects and work packages."), false);
            }
            RemoteOutcome::Imported(None) => {
                self.set_toast("Catalog already imported. Press I to import again.", false);
            }
            RemoteOutcome::Verified(report) => {
                self.report_title = if report.is_consistent() {
                    "Verify: consistent".to_string()
                } else {
                    format!("Verify: {} mismatches", report.mismatches.len())
                };
                self.report_lines = report.lines();
                self.report_scroll = 0;
                self.mode = Mode::Report;
            }
            RemoteOutcome::Pushed { entry_id, outcome } => {
                let verb = if outcome.updated_remote { "Updated" } else { "Booked" };
                let ticket = if outcome.created_issue { "new ticket" } else { "ticket" };
                self.set_toast(
                    format!(
                        "{verb} entry {entry_id} on {ticket} #{} ({:.2}h).",
                        outcome.issue_id, outcome.hours
                    ),
                    false,
                );
            }
        }
    }

    fn merge_catalog(&mut self, projects: &[Project], packages: &[WorkPackage], imported: bool) -> usize {
        let mut merged = 0;
        let result = self.config.update(|config| {
            merged = config.merge_catalog(projects, packages);
            if imported {
                config.redmine.catalog_imported = true;
            }
        });
        if let Err(err) = result {
            self.set_toast(format!("Catalog not saved: {err}"), true);
            return 0;
        }
        self.clamp_selection();
        merged
    }

    /// `login` is set when the failed job was a login attempt, whichever mode is shown now.
    fn handle_job_error(&mut self, label: &str, err: SyncError, login: bool) {
        let unauthorized = matches!(err, SyncError::Remote(RedmineError::Unauthorized));
        if login {
            let in_form = self.mode == Mode::Login;
            if unauthorized {
                self.login.failures += 1;
                self.login.password.clear();
                if self.login.locked() {
                    self.mode = Mode::Dashboard;
                    self.set_toast("Login failed 3 times. Restart to try again.", true);
                    return;
                }
                let message = format!("Invalid credentials ({}/{MAX_LOGIN_ATTEMPTS}).", self.login.failures);
                if !in_form {
                    self.set_toast(message.clone(), true);
                }
                self.login.message = Some(message);
            } else {
                if !in_form {
                    self.set_toast(format!("{label} failed: {err}"), true);
                }
                self.login.message = Some(err.to_string());
            }
            return;
        }

        if unauthorized {
            self.credentials = None;
            self.set_toast("Redmine rejected the credentials. Press l to log in.", true);
        } else {
            self.set_toast(format!("{label} failed: {err}"), true);
        }
    }

    fn select_pair(&mut self, project: &str, package: &str) {
        let project_index = self.projects().iter().position(|candidate| candidate.id == project);
        if let Some(index) = project_index {
            self.project_state.select(Some(index));
            let package_index = self.packages().iter().position(|candidate| candidate.id == package);
            self.package_state.select(package_index.or(Some(0)));
        }
        self.clamp_selection();
        self.refresh_forecast();
    }

    fn move_selection(&mut self, forward: bool) {
        match self.focus {
            Focus::Projects => {
                let len = self.projects().len();
                step(&mut self.project_state, len, forward);
                let has_packages = !self.packages().is_empty();
                self.package_state.select(has_packages.then_some(0));
            }
            Focus::WorkPackages => {
                let len = self.packages().len();
                step(&mut self.package_state, len, forward);
            }
        }
        self.refresh_forecast();
    }

    fn clamp_selection(&mut self) {
        let projects = self.projects().len();
        clamp(&mut self.project_state, projects);
        let packages = self.packages().len();
        clamp(&mut self.package_state, packages);
    }

    pub fn visible_status(&self) -> Option<String> {
        if let Some(label) = self.jobs.current() {
            return Some(format!("{label}..."));
        }
        self.status.clone()
    }

    pub fn active_toast(&mut self) -> Option<ToastView> {
        let toast = self.toast.as_ref()?;
        if toast.created_at.elapsed() > Duration::from_secs(3) {
            self.toast = None;
            return None;
        }
        Some(ToastView {
            message: toast.message.clone(),
            is_error: toast.is_error,
        })
    }

    fn set_toast(&mut self, message: impl Into<String>, is_error: bool) {
        self.toast = Some(Toast {
            message: message.into(),
            created_at: Instant::now(),
            is_error,
        });
    }
}

fn step(state: &mut ListState, len: usize, forward: bool) {
    if len == 0 {
        state.select(None);
        return;
    }
    let selected = state.selected().unwrap_or(0);
    let next = if forward {
        if selected + 1 >= len { 0 } else { selected + 1 }
    } else if selected == 0 {
        len - 1
    } else {
        selected - 1
    };
    state.select(Some(next));
}

fn clamp(state: &mut ListState, len: usize) {
    match state.selected() {
        _ if len == 0 => state.select(None),
        None => state.select(Some(0)),
        Some(index) if index >= len => state.select(Some(len - 1)),
        Some(_) => {}
    }
}

struct Toast {
    message: String,
    created_at: Instant,
    is_error: bool,
}

pub struct ToastView {
    pub message: String,
    pub is_error: bool,
}
