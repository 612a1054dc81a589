//! Backend-neutral domain models
//!
//! `cloud` and `server` hold the wire formats and convert into these.

pub mod cloud;
pub mod server;

use crate::lazy::LazyCommit;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    /// Workspace slug (cloud) or project key / `~user` (server).
    pub owner: String,
    /// Repository slug.
    pub name: String,
    pub display_name: String,
    pub project_key: Option<String>,
    pub project_name: Option<String>,
    pub is_private: bool,
    pub archived: bool,
    pub default_branch: Option<String>,
    pub description: Option<String>,
    pub html_url: Option<String>,
}

impl Repository {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Owner-level repository filter on listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryRole {
    Owner,
    Admin,
    Contributor,
    Member,
}

impl RepositoryRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Contributor => "contributor",
            Self::Member => "member",
        }
    }
}

impl std::str::FromStr for RepositoryRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "owner" => Ok(Self::Owner),
            "admin" => Ok(Self::Admin),
            "contributor" => Ok(Self::Contributor),
            "member" => Ok(Self::Member),
            other => Err(format!("unknown repository role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub hash: String,
    pub message: Option<String>,
    pub author: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub parents: Vec<String>,
}

impl Commit {
    pub fn new(hash: &str) -> Self {
        Self {
            hash: hash.to_string(),
            message: None,
            author: None,
            date: None,
            parents: Vec::new(),
        }
    }
}

/// Refs without an explicit flag are active.
pub(crate) fn active_by_default() -> bool {
    true
}

/// A branch with its head commit resolved on demand.
#[derive(Debug, Clone)]
pub struct Branch {
    pub name: String,
    pub active: bool,
    pub is_default: bool,
    pub commit: LazyCommit,
}

impl Branch {
    pub fn hash(&self) -> &str {
        self.commit.hash()
    }
}

/// A tag with its target commit resolved on demand.
#[derive(Debug, Clone)]
pub struct Tag {
    pub name: String,
    pub commit: LazyCommit,
}

impl Tag {
    pub fn hash(&self) -> &str {
        self.commit.hash()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PullRequestState {
    Open,
    Merged,
    Declined,
    Superseded,
}

/// One side of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub branch: String,
    pub commit_hash: String,
    /// `owner/name` of the repository holding the branch.
    pub repository: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: String,
    pub title: String,
    pub state: PullRequestState,
    pub author: Option<String>,
    pub source: PullRequestRef,
    pub destination: PullRequestRef,
    pub html_url: Option<String>,
    pub updated_on: Option<DateTime<Utc>>,
    /// Filled by the server merge probe when enabled.
    pub can_merge: Option<bool>,
    /// Filled by the server changes probe when enabled.
    pub has_changes: Option<bool>,
}

impl PullRequest {
    pub fn is_fork(&self) -> bool {
        self.source.repository != self.destination.repository
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    InProgress,
    Successful,
    Failed,
    Stopped,
}

/// Commit build status as posted by the CI side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStatus {
    pub hash: String,
    pub key: String,
    pub name: String,
    pub state: BuildState,
    pub url: String,
    pub description: Option<String>,
    pub refname: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamKind {
    Workspace,
    Project,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub key: String,
    pub display_name: String,
    pub kind: TeamKind,
}

/// Webhook flavours, each with its own wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookFlavor {
    Cloud,
    ServerNative,
    ServerPlugin,
}

/// A repository webhook as read from or written to a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookDescriptor {
    /// Backend id; empty until created.
    pub id: String,
    pub flavor: HookFlavor,
    /// Description (cloud), name (native) or title (plugin).
    pub description: String,
    pub url: String,
    pub active: bool,
    pub events: BTreeSet<String>,
    pub secret: Option<String>,
    /// Backend reports a secret without disclosing it.
    pub secret_set: bool,
    /// Plugin-only comma separated list.
    pub committers_to_ignore: Option<String>,
}

impl WebhookDescriptor {
    pub fn new(flavor: HookFlavor, description: &str, url: &str) -> Self {
        Self {
            id: String::new(),
            flavor,
            description: description.to_string(),
            url: url.to_string(),
            active: true,
            events: BTreeSet::new(),
            secret: None,
            secret_set: false,
            committers_to_ignore: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events = events.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_secret(mut self, secret: Option<String>) -> Self {
        self.secret_set = secret.is_some();
        self.secret = secret;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn with_committers_to_ignore(mut self, committers: Option<String>) -> Self {
        self.committers_to_ignore = committers;
        self
    }
}
