use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::models::{Project, SessionBackup, WorkPackage};
use crate::rounding::RoundingConfig;

pub const CONFIG_FILE: &str = "config.json";
pub const DATABASE_FILE: &str = "zeiterfassung.db";
pub const EXPORT_FILE: &str = "zeiterfassung_export.xlsx";

const DEFAULT_PROJECTS: [&str; 2] = ["Project A", "Project B"];
const DEFAULT_WORK_PACKAGES: [&str; 5] =
    ["Development", "Meeting", "Design", "Testing", "Documentation"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("config could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("config could not be replaced: {0}")]
    Persist(#[from] tempfile::PersistError),
    #[error("no data directory available")]
    NoDataDir,
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    #[error("stored credentials are not valid base64")]
    Encoding,
    #[error("stored credentials are malformed")]
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub work_packages: Vec<WorkPackage>,
    #[serde(default)]
    pub redmine: RedmineSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<SessionBackup>,
    #[serde(default)]
    pub rounding: RoundingConfig,
    #[serde(default = "default_backup_interval_secs")]
    pub backup_interval_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RedmineSettings {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub backup_project: String,
    /// base64 of `username:password`. Obfuscation only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default)]
    pub catalog_imported: bool,
    #[serde(default)]
    pub push_on_save: bool,
    /// Import only tickets assigned to the connected user.
    #[serde(default)]
    pub assigned_only: bool,
}

impl RedmineSettings {
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

impl Default for Config {
    fn default() -> Self {
        let projects: Vec<Project> = DEFAULT_PROJECTS.iter().map(|name| Project::named(name)).collect();
        let work_packages = projects
            .iter()
            .flat_map(|project| {
                DEFAULT_WORK_PACKAGES
                    .iter()
                    .map(|name| WorkPackage::named(&project.id, name))
            })
            .collect();
        Self {
            projects,
            work_packages,
            redmine: RedmineSettings::default(),
            backup: None,
            rounding: RoundingConfig::default(),
            backup_interval_secs: default_backup_interval_secs(),
            export_path: None,
        }
    }
}

impl Config {
    pub fn project(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|project| project.id == id)
    }

    pub fn work_packages_for<'a>(&'a self, project: &'a str) -> impl Iterator<Item = &'a WorkPackage> + 'a {
        self.work_packages
            .iter()
            .filter(move |package| package.project == project)
    }

    pub fn work_package(&self, project: &str, id: &str) -> Option<&WorkPackage> {
        self.work_packages
            .iter()
            .find(|package| package.project == project && package.id == id)
    }

    pub fn contains_pair(&self, project: &str, work_package: &str) -> bool {
        self.project(project).is_some() && self.work_package(project, work_package).is_some()
    }

    /// Display name for a stored work package id, falling back to the id.
    pub fn work_package_label(&self, project: &str, id: &str) -> String {
        self.work_package(project, id)
            .map(|package| package.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn add_project(&mut self, project: Project) -> bool {
        if project.id.is_empty() || self.project(&project.id).is_some() {
            return false;
        }
        self.projects.push(project);
        true
    }

    /// Removes the project together with its work packages.
    pub fn remove_project(&mut self, id: &str) -> bool {
        let before = self.projects.len();
        self.projects.retain(|project| project.id != id);
        if self.projects.len() == before {
            return false;
        }
        self.work_packages.retain(|package| package.project != id);
        true
    }

    pub fn add_work_package(&mut self, package: WorkPackage) -> bool {
        if package.id.is_empty()
            || self.project(&package.project).is_none()
            || self.work_package(&package.project, &package.id).is_some()
        {
            return false;
        }
        self.work_packages.push(package);
        true
    }

    pub fn remove_work_package(&mut self, project: &str, id: &str) -> bool {
        let before = self.work_packages.len();
        self.work_packages
            .retain(|package| !(package.project == project && package.id == id));
        self.work_packages.len() != before
    }

    /// Adds unknown projects and packages; returns how many items were new.
    pub fn merge_catalog(&mut self, projects: &[Project], packages: &[WorkPackage]) -> usize {
        let mut added = 0;
        for project in projects {
            if self.add_project(project.clone()) {
                added += 1;
            }
        }
        for package in packages {
            if self.project(&package.project).is_none() {
                self.add_project(Project::named(&package.project));
                added += 1;
            }
            if self.add_work_package(package.clone()) {
                added += 1;
            }
        }
        self.projects.sort_by(|a, b| a.name.cmp(&b.name));
        added
    }

    pub fn export_path(&self, data_dir: &Path) -> PathBuf {
        self.export_path
            .clone()
            .unwrap_or_else(|| data_dir.join(EXPORT_FILE))
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"••••")
            .finish()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn encode(&self) -> String {
        STANDARD.encode(format!("{}:{}", self.username, self.password))
    }

    pub fn decode(encoded: &str) -> Result<Self, CredentialsError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| CredentialsError::Encoding)?;
        let decoded = String::from_utf8(bytes).map_err(|_| CredentialsError::Encoding)?;
        let (username, password) = decoded.split_once(':').ok_or(CredentialsError::Malformed)?;
        if username.is_empty() {
            return Err(CredentialsError::Malformed);
        }
        Ok(Self::new(username, password))
    }

    /// Environment first, then the stored value.
    pub fn resolve(settings: &RedmineSettings) -> Option<Self> {
        if let (Ok(username), Ok(password)) = (env::var("REDMINE_USERNAME"), env::var("REDMINE_PASSWORD")) {
            if !username.trim().is_empty() {
                return Some(Self::new(username.trim(), password));
            }
        }

        let stored = settings.credentials.as_deref()?;
        match Self::decode(stored) {
            Ok(credentials) => Some(credentials),
            Err(err) => {
                warn!("ignoring stored Redmine credentials: {err}");
                None
            }
        }
    }
}

/// Owns the config file. The in-memory document is only replaced after a
/// successful write, so readers always see what is on disk.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    current: Config,
}

impl ConfigStore {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        if !path.exists() {
            let store = Self {
                path,
                current: Config::default(),
            };
            write_atomic(&store.path, &store.current)?;
            info!(path = %store.path.display(), "created default config");
            return Ok(store);
        }

        let contents = fs::read_to_string(&path)?;
        let current = parse_config(&contents).unwrap_or_else(|err| {
            error!(path = %path.display(), "config unreadable, using defaults: {err}");
            Config::default()
        });
        debug!(path = %path.display(), "config loaded");
        Ok(Self { path, current })
    }

    pub fn config(&self) -> &Config {
        &self.current
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn update<F>(&mut self, change: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut Config),
    {
        let mut next = self.current.clone();
        change(&mut next);
        if next == self.current {
            return Ok(());
        }
        write_atomic(&self.path, &next)?;
        self.current = next;
        Ok(())
    }

    pub fn set_backup(&mut self, backup: SessionBackup) -> Result<(), ConfigError> {
        self.update(|config| config.backup = Some(backup))
    }

    pub fn clear_backup(&mut self) -> Result<(), ConfigError> {
        self.update(|config| config.backup = None)
    }
}

fn parse_config(contents: &str) -> Result<Config, serde_json::Error> {
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_json::from_str(contents)
}

fn write_atomic(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let json = serde_json::to_string_pretty(config)?;
    let mut file = NamedTempFile::new_in(&dir)?;
    file.write_all(json.as_bytes())?;
    file.flush()?;
    file.as_file().sync_all()?;
    file.persist(path)?;
    Ok(())
}

pub fn default_data_dir() -> Result<PathBuf, ConfigError> {
    let mut path = dirs::data_dir().ok_or(ConfigError::NoDataDir)?;
    path.push("zeiterfassung");
    Ok(path)
}

const fn default_backup_interval_secs() -> u64 {
    5
}
