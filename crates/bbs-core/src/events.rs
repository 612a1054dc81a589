//! Normalized change notifications handed to the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Family of an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
    Ping,
}

/// Aggregate effect of an event on the heads it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Updated,
    Removed,
}

impl ChangeType {
    /// Reduce several ref changes to one type.
    ///
    /// Any creation wins, then any removal, otherwise the result is an update.
    /// An empty input is an update.
    pub fn reduce<I: IntoIterator<Item = ChangeType>>(changes: I) -> ChangeType {
        let mut removed = false;
        for change in changes {
            match change {
                ChangeType::Created => return ChangeType::Created,
                ChangeType::Removed => removed = true,
                ChangeType::Updated => {}
            }
        }
        if removed {
            ChangeType::Removed
        } else {
            ChangeType::Updated
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Removed => "removed",
        }
    }
}

/// Repository an event originates from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryRef {
    /// Workspace (cloud) or project key / `~user` (server).
    pub owner: String,
    /// Repository slug.
    pub name: String,
    /// Project key when the backend reports one.
    pub project_key: Option<String>,
}

impl RepositoryRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            project_key: None,
        }
    }

    pub fn with_project_key(mut self, key: impl Into<String>) -> Self {
        self.project_key = Some(key.into());
        self
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// A named line of development.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Head {
    Branch {
        name: String,
    },
    Tag {
        name: String,
    },
    PullRequest {
        id: String,
        title: String,
        source_branch: String,
        target_branch: String,
        /// `owner/name` of the source repository when it is a fork.
        source_repository: Option<String>,
    },
}

impl Head {
    pub fn name(&self) -> String {
        match self {
            Head::Branch { name } | Head::Tag { name } => name.clone(),
            Head::PullRequest { id, .. } => format!("PR-{}", id),
        }
    }
}

/// State of a head at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Revision {
    Commit { hash: String },
    PullRequest { source_hash: String, target_hash: String },
}

/// A head paired with its revision; `None` when the head is gone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeadRevision {
    pub head: Head,
    pub revision: Option<Revision>,
}

/// A translated webhook event.
///
/// Built once by a processor and consumed once by propagation; there are no
/// mutating accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    kind: EventKind,
    event_key: String,
    origin: String,
    repository: RepositoryRef,
    heads: Vec<HeadRevision>,
    change_type: ChangeType,
    received_at: DateTime<Utc>,
}

impl NormalizedEvent {
    pub fn new(
        kind: EventKind,
        event_key: impl Into<String>,
        origin: impl Into<String>,
        repository: RepositoryRef,
        heads: Vec<HeadRevision>,
        change_type: ChangeType,
    ) -> Self {
        Self {
            kind,
            event_key: event_key.into(),
            origin: origin.into(),
            repository,
            heads,
            change_type,
            received_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Vendor event key, e.g. `repo:push` or `pr:declined`.
    pub fn event_key(&self) -> &str {
        &self.event_key
    }

    /// Normalized server URL of the endpoint that sent the event.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn repository(&self) -> &RepositoryRef {
        &self.repository
    }

    pub fn heads(&self) -> &[HeadRevision] {
        &self.heads
    }

    pub fn change_type(&self) -> ChangeType {
        self.change_type
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}

/// Request to rescan every head of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexRequest {
    pub origin: String,
    pub repository: RepositoryRef,
}
