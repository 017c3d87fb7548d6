use reqwest::StatusCode;
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Credentials;

const PAGE_SIZE: u32 = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RedmineError {
    #[error("Redmine rejected the credentials.")]
    Unauthorized,
    #[error("Redmine resource not found: {0}")]
    NotFound(String),
    #[error("Redmine rejected the request: {}", .0.join(", "))]
    Rejected(Vec<String>),
    #[error("Redmine server error: {0}")]
    ServerError(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Unexpected Redmine response: {0}")]
    Decode(String),
    #[error("Redmine is not configured: {0}")]
    NotConfigured(&'static str),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct User {
    pub id: u64,
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NamedRef {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteProject {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub identifier: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Issue {
    pub id: u64,
    pub project: NamedRef,
    pub subject: String,
    pub status: Option<NamedRef>,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub assigned_to: Option<NamedRef>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteTimeEntry {
    pub id: u64,
    pub project: NamedRef,
    #[serde(default)]
    pub issue: Option<IssueRef>,
    pub hours: f64,
    pub spent_on: String,
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct IssueRef {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewIssue {
    pub project_id: u64,
    pub subject: String,
    pub description: String,
    pub estimated_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewRemoteTimeEntry {
    pub issue_id: u64,
    pub spent_on: String,
    pub hours: f64,
    pub comments: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssueQuery {
    pub project_id: Option<u64>,
    /// Exact subject; filtered again client-side since Redmine matches substrings.
    pub subject: Option<String>,
    pub assigned_to_me: bool,
}

impl IssueQuery {
    pub fn in_project(project_id: u64) -> Self {
        Self {
            project_id: Some(project_id),
            ..Self::default()
        }
    }

    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("status_id", "*".to_string())];
        if let Some(project_id) = self.project_id {
            params.push(("project_id", project_id.to_string()));
        }
        if let Some(subject) = &self.subject {
            params.push(("subject", format!("~{subject}")));
        }
        if self.assigned_to_me {
            params.push(("assigned_to_id", "me".to_string()));
        }
        params
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeEntryQuery {
    pub issue_id: Option<u64>,
    pub mine: bool,
}

impl TimeEntryQuery {
    pub fn mine() -> Self {
        Self {
            issue_id: None,
            mine: true,
        }
    }

    pub fn for_issue(issue_id: u64) -> Self {
        Self {
            issue_id: Some(issue_id),
            mine: false,
        }
    }

    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(issue_id) = self.issue_id {
            params.push(("issue_id", issue_id.to_string()));
        }
        if self.mine {
            params.push(("user_id", "me".to_string()));
        }
        params
    }
}

/// The Redmine REST calls the sync flows rely on.
pub trait RedmineApi {
    fn current_user(&self) -> Result<User, RedmineError>;
    fn projects(&self) -> Result<Vec<RemoteProject>, RedmineError>;
    fn issues(&self, query: &IssueQuery) -> Result<Vec<Issue>, RedmineError>;
    fn issue(&self, id: u64) -> Result<Issue, RedmineError>;
    fn create_issue(&self, issue: &NewIssue) -> Result<Issue, RedmineError>;
    fn time_entries(&self, query: &TimeEntryQuery) -> Result<Vec<RemoteTimeEntry>, RedmineError>;
    fn create_time_entry(&self, entry: &NewRemoteTimeEntry) -> Result<RemoteTimeEntry, RedmineError>;
    fn update_time_entry(&self, id: u64, entry: &NewRemoteTimeEntry) -> Result<(), RedmineError>;
}

#[derive(Deserialize)]
struct UserEnvelope {
    user: User,
}

#[derive(Deserialize)]
struct IssueEnvelope {
    issue: Issue,
}

#[derive(Deserialize)]
struct TimeEntryEnvelope {
    time_entry: RemoteTimeEntry,
}

#[derive(Serialize)]
struct NewIssueEnvelope<'a> {
    issue: &'a NewIssue,
}

#[derive(Serialize)]
struct NewTimeEntryEnvelope<'a> {
    time_entry: &'a NewRemoteTimeEntry,
}

#[derive(Deserialize)]
struct ProjectsPage {
    #[serde(default)]
    projects: Vec<RemoteProject>,
    #[serde(default)]
    total_count: Option<u32>,
}

#[derive(Deserialize)]
struct IssuesPage {
    #[serde(default)]
    issues: Vec<Issue>,
    #[serde(default)]
    total_count: Option<u32>,
}

#[derive(Deserialize)]
struct TimeEntriesPage {
    #[serde(default)]
    time_entries: Vec<RemoteTimeEntry>,
    #[serde(default)]
    total_count: Option<u32>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<String>,
}

trait Page {
    type Item;

    fn into_parts(self) -> (Vec<Self::Item>, Option<u32>);
}

impl Page for ProjectsPage {
    type Item = RemoteProject;

    fn into_parts(self) -> (Vec<RemoteProject>, Option<u32>) {
        (self.projects, self.total_count)
    }
}

impl Page for IssuesPage {
    type Item = Issue;

    fn into_parts(self) -> (Vec<Issue>, Option<u32>) {
        (self.issues, self.total_count)
    }
}

impl Page for TimeEntriesPage {
    type Item = RemoteTimeEntry;

    fn into_parts(self) -> (Vec<RemoteTimeEntry>, Option<u32>) {
        (self.time_entries, self.total_count)
    }
}

#[derive(Clone)]
pub struct RedmineClient {
    client: Client,
    base: Url,
    credentials: Credentials,
}

impl RedmineClient {
    pub fn new(base_url: &str, credentials: Credentials) -> Result<Self, RedmineError> {
        let base = parse_base_url(base_url)?;
        let client = Client::builder()
            .user_agent(concat!("zeiterfassung/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| RedmineError::Network(err.to_string()))?;
        Ok(Self {
            client,
            base,
            credentials,
        })
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> Result<Url, RedmineError> {
        let mut url = self
            .base
            .join(path)
            .map_err(|err| RedmineError::Network(err.to_string()))?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Basic {}", self.credentials.encode()))
    }

    fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<T, RedmineError> {
        let url = self.url(path, params)?;
        debug!(%url, "GET");
        let response = self
            .authorized(self.client.get(url))
            .send()
            .map_err(|err| RedmineError::Network(err.to_string()))?;
        let response = check_status(response, path)?;
        response
            .json::<T>()
            .map_err(|err| RedmineError::Decode(err.to_string()))
    }

    fn get_all<P>(&self, path: &str, params: &[(&str, String)]) -> Result<Vec<P::Item>, RedmineError>
    where
        P: Page + DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut offset: u32 = 0;
        loop {
            let mut page_params = params.to_vec();
            page_params.push(("limit", PAGE_SIZE.to_string()));
            page_params.push(("offset", offset.to_string()));
            let page: P = self.get(path, &page_params)?;
            let (batch, total) = page.into_parts();
            let fetched = batch.len() as u32;
            items.extend(batch);
            offset += fetched;
            let done = match total {
                Some(total) => offset >= total,
                None => fetched < PAGE_SIZE,
            };
            if done || fetched == 0 {
                break;
            }
        }
        Ok(items)
    }

    fn send_json<B: Serialize>(&self, request: RequestBuilder, path: &str, body: &B) -> Result<Response, RedmineError> {
        let response = self
            .authorized(request)
            .json(body)
            .send()
            .map_err(|err| RedmineError::Network(err.to_string()))?;
        check_status(response, path)
    }
}

impl RedmineApi for RedmineClient {
    fn current_user(&self) -> Result<User, RedmineError> {
        let envelope: UserEnvelope = self.get("users/current.json", &[])?;
        Ok(envelope.user)
    }

    fn projects(&self) -> Result<Vec<RemoteProject>, RedmineError> {
        self.get_all::<ProjectsPage>("projects.json", &[])
    }

    fn issues(&self, query: &IssueQuery) -> Result<Vec<Issue>, RedmineError> {
        let mut issues = self.get_all::<IssuesPage>("issues.json", &query.params())?;
        if let Some(subject) = &query.subject {
            issues.retain(|issue| &issue.subject == subject);
        }
        Ok(issues)
    }

    fn issue(&self, id: u64) -> Result<Issue, RedmineError> {
        let envelope: IssueEnvelope = self.get(&format!("issues/{id}.json"), &[])?;
        Ok(envelope.issue)
    }

    fn create_issue(&self, issue: &NewIssue) -> Result<Issue, RedmineError> {
        let url = self.url("issues.json", &[])?;
        let response = self.send_json(self.client.post(url), "issues.json", &NewIssueEnvelope { issue })?;
        let envelope: IssueEnvelope = response
            .json()
            .map_err(|err| RedmineError::Decode(err.to_string()))?;
        Ok(envelope.issue)
    }

    fn time_entries(&self, query: &TimeEntryQuery) -> Result<Vec<RemoteTimeEntry>, RedmineError> {
        self.get_all::<TimeEntriesPage>("time_entries.json", &query.params())
    }

    fn create_time_entry(&self, entry: &NewRemoteTimeEntry) -> Result<RemoteTimeEntry, RedmineError> {
        let url = self.url("time_entries.json", &[])?;
        let response = self.send_json(
            self.client.post(url),
            "time_entries.json",
            &NewTimeEntryEnvelope { time_entry: entry },
        )?;
        let envelope: TimeEntryEnvelope = response
            .json()
            .map_err(|err| RedmineError::Decode(err.to_string()))?;
        Ok(envelope.time_entry)
    }

    fn update_time_entry(&self, id: u64, entry: &NewRemoteTimeEntry) -> Result<(), RedmineError> {
        let path = format!("time_entries/{id}.json");
        let url = self.url(&path, &[])?;
        self.send_json(self.client.put(url), &path, &NewTimeEntryEnvelope { time_entry: entry })?;
        Ok(())
    }
}

fn parse_base_url(value: &str) -> Result<Url, RedmineError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RedmineError::NotConfigured("server URL"));
    }
    // Url::join drops the last path segment unless the base ends with a slash.
    let normalized = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&normalized).map_err(|err| RedmineError::Network(format!("invalid server URL: {err}")))
}

fn check_status(response: Response, path: &str) -> Result<Response, RedmineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RedmineError::Unauthorized,
        StatusCode::NOT_FOUND => RedmineError::NotFound(path.to_string()),
        StatusCode::UNPROCESSABLE_ENTITY => {
            let errors = response
                .json::<ErrorBody>()
                .map(|body| body.errors)
                .unwrap_or_default();
            RedmineError::Rejected(errors)
        }
        status if status.is_server_error() => {
            RedmineError::ServerError(format!("{path}: {status}"))
        }
        status => RedmineError::Network(format!("{path}: {status}")),
    };
    warn!(%status, path, "Redmine request failed");
    Err(error)
}
