use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use tracing::{error, info};

use crate::config::{Config, Credentials};
use crate::database::Database;
use crate::redmine::{RedmineApi, User};
use crate::sync::{
    self, CatalogImport, ConsistencyReport, PushOutcome, SyncError, SyncReport,
};

#[derive(Debug, Clone)]
pub enum RemoteJob {
    Connect { remember: bool },
    Pull,
    Import { force: bool },
    Verify,
    Push { entry_id: i64 },
}

impl RemoteJob {
    pub fn label(&self) -> &'static str {
        match self {
            RemoteJob::Connect { .. } => "Connecting",
            RemoteJob::Pull => "Pulling time entries",
            RemoteJob::Import { .. } => "Importing projects",
            RemoteJob::Verify => "Verifying",
            RemoteJob::Push { .. } => "Pushing entry",
        }
    }
}

#[derive(Debug)]
pub enum RemoteOutcome {
    Connected {
        user: User,
        credentials: Credentials,
        remember: bool,
    },
    Pulled(SyncReport),
    Imported(Option<CatalogImport>),
    Verified(ConsistencyReport),
    Pushed { entry_id: i64, outcome: PushOutcome },
}

/// Everything a worker needs, copied off the UI thread.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub config: Config,
    pub credentials: Credentials,
    pub database: PathBuf,
}

/// Runs one job against any Redmine implementation.
pub fn execute(
    api: &impl RedmineApi,
    db: &Database,
    config: &Config,
    credentials: &Credentials,
    job: &RemoteJob,
) -> Result<RemoteOutcome, SyncError> {
    match job {
        RemoteJob::Connect { remember } => {
            let user = sync::connect(api)?;
            Ok(RemoteOutcome::Connected {
                user,
                credentials: credentials.clone(),
                remember: *remember,
            })
        }
        RemoteJob::Pull => Ok(RemoteOutcome::Pulled(sync::pull_time_entries(api, db, config)?)),
        RemoteJob::Import { force } => Ok(RemoteOutcome::Imported(sync::import_catalog(api, config, *force)?)),
        RemoteJob::Verify => Ok(RemoteOutcome::Verified(sync::verify(api, db, config)?)),
        RemoteJob::Push { entry_id } => {
            let entry = db.entry(*entry_id)?;
            let outcome = sync::push_entry(api, db, &config.redmine, &entry)?;
            Ok(RemoteOutcome::Pushed {
                entry_id: *entry_id,
                outcome,
            })
        }
    }
}

fn run_remote(job: &RemoteJob, context: &JobContext) -> Result<RemoteOutcome, SyncError> {
    let client = sync::client(&context.config.redmine, Some(context.credentials.clone()))?;
    let db = Database::open(&context.database)?;
    execute(&client, &db, &context.config, &context.credentials, job)
}

pub struct JobResult {
    pub label: &'static str,
    pub result: Result<RemoteOutcome, SyncError>,
}

/// At most one background job at a time; results are picked up by `poll`.
#[derive(Default)]
pub struct JobRunner {
    pending: Option<(&'static str, Receiver<Result<RemoteOutcome, SyncError>>)>,
}

impl JobRunner {
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    pub fn current(&self) -> Option<&'static str> {
        self.pending.as_ref().map(|(label, _)| *label)
    }

    pub fn submit(&mut self, job: RemoteJob, context: JobContext) -> bool {
        let label = job.label();
        self.spawn(label, move || run_remote(&job, &context))
    }

    pub fn spawn<F>(&mut self, label: &'static str, work: F) -> bool
    where
        F: FnOnce() -> Result<RemoteOutcome, SyncError> + Send + 'static,
    {
        if self.is_busy() {
            return false;
        }
        let (sender, receiver) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("remote-job".to_string())
            .spawn(move || {
                let result = work();
                if let Err(err) = &result {
                    error!("{label} failed: {err}");
                }
                // The receiver is gone only when the app is shutting down.
                let _ = sender.send(result);
            });
        match spawned {
            Ok(_) => {
                info!(job = label, "job started");
                self.pending = Some((label, receiver));
                true
            }
            Err(err) => {
                error!("could not start worker thread: {err}");
                false
            }
        }
    }

    pub fn poll(&mut self) -> Option<JobResult> {
        let (label, receiver) = self.pending.as_ref()?;
        let label = *label;
        let result = match receiver.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => Err(SyncError::WorkerStopped),
        };
        self.pending = None;
        Some(JobResult { label, result })
    }
}
