//! Bitbucket Cloud wire formats

use super::{
    active_by_default, BuildState, BuildStatus, Commit, HookFlavor, PullRequest, PullRequestRef,
    PullRequestState, Repository, Team, TeamKind, WebhookDescriptor,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Link {
    pub href: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Links {
    #[serde(default)]
    pub html: Option<Link>,
    #[serde(default)]
    pub avatar: Option<Link>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedKey {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceRef {
    pub slug: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MainBranch {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudRepository {
    pub slug: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub workspace: Option<WorkspaceRef>,
    #[serde(default)]
    pub project: Option<NamedKey>,
    #[serde(default)]
    pub mainbranch: Option<MainBranch>,
    #[serde(default)]
    pub links: Links,
}

impl CloudRepository {
    /// `fallback_owner` is used when the payload names no workspace.
    pub fn into_repository(self, fallback_owner: &str) -> Repository {
        let owner = self
            .workspace
            .map(|w| w.slug)
            .or_else(|| {
                self.full_name
                    .as_deref()
                    .and_then(|full| full.split_once('/'))
                    .map(|(owner, _)| owner.to_string())
            })
            .unwrap_or_else(|| fallback_owner.to_string());
        let (project_key, project_name) = match self.project {
            Some(project) => (project.key, project.name),
            None => (None, None),
        };

        Repository {
            owner,
            display_name: self.name.unwrap_or_else(|| self.slug.clone()),
            name: self.slug,
            project_key,
            project_name,
            is_private: self.is_private,
            archived: false,
            default_branch: self.mainbranch.map(|b| b.name),
            description: self.description.filter(|d| !d.is_empty()),
            html_url: self.links.html.and_then(|l| l.href),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudAuthor {
    #[serde(default)]
    pub raw: Option<String>,
    #[serde(default)]
    pub user: Option<CloudUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudUser {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
}

impl CloudUser {
    fn label(self) -> Option<String> {
        self.display_name.or(self.nickname)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitRef {
    pub hash: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudCommit {
    pub hash: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub author: Option<CloudAuthor>,
    #[serde(default)]
    pub parents: Vec<CommitRef>,
}

impl CloudCommit {
    /// Listings embed only a hash unless the commit was expanded.
    pub fn is_complete(&self) -> bool {
        self.date.is_some()
    }

    pub fn into_commit(self) -> Commit {
        Commit {
            hash: self.hash,
            message: self.message,
            author: self
                .author
                .and_then(|a| a.raw.or_else(|| a.user.and_then(CloudUser::label))),
            date: self.date,
            parents: self.parents.into_iter().map(|p| p.hash).collect(),
        }
    }
}

/// Branch or tag entry.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudRef {
    pub name: String,
    pub target: Option<CloudCommit>,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudBranchName {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudRepoName {
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudPullRequestEnd {
    #[serde(default)]
    pub branch: Option<CloudBranchName>,
    #[serde(default)]
    pub commit: Option<CommitRef>,
    #[serde(default)]
    pub repository: Option<CloudRepoName>,
}

impl CloudPullRequestEnd {
    fn into_ref(self) -> Option<PullRequestRef> {
        Some(PullRequestRef {
            branch: self.branch?.name?,
            commit_hash: self.commit?.hash,
            repository: self.repository?.full_name?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudPullRequest {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    pub state: PullRequestState,
    #[serde(default)]
    pub author: Option<CloudUser>,
    pub source: Option<CloudPullRequestEnd>,
    pub destination: Option<CloudPullRequestEnd>,
    #[serde(default)]
    pub links: Links,
    #[serde(default)]
    pub updated_on: Option<DateTime<Utc>>,
}

impl CloudPullRequest {
    /// `None` for orphans whose source or destination is incomplete.
    pub fn into_pull_request(self) -> Option<PullRequest> {
        Some(PullRequest {
            id: self.id.to_string(),
            title: self.title,
            state: self.state,
            author: self.author.and_then(CloudUser::label),
            source: self.source?.into_ref()?,
            destination: self.destination?.into_ref()?,
            html_url: self.links.html.and_then(|l| l.href),
            updated_on: self.updated_on,
            can_merge: None,
            has_changes: None,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CloudBuildStatus<'a> {
    pub key: &'a str,
    pub name: &'a str,
    pub state: &'static str,
    pub url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refname: Option<&'a str>,
}

impl<'a> CloudBuildStatus<'a> {
    pub fn new(status: &'a BuildStatus, key: &'a str, name: &'a str) -> Self {
        Self {
            key,
            name,
            state: match status.state {
                BuildState::InProgress => "INPROGRESS",
                BuildState::Successful => "SUCCESSFUL",
                BuildState::Failed => "FAILED",
                BuildState::Stopped => "STOPPED",
            },
            url: &status.url,
            description: status.description.as_deref(),
            refname: status.refname.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudWorkspace {
    pub slug: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl CloudWorkspace {
    pub fn into_team(self) -> Team {
        Team {
            display_name: self.name.unwrap_or_else(|| self.slug.clone()),
            key: self.slug,
            kind: TeamKind::Workspace,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudHook {
    #[serde(default, skip_serializing)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing)]
    pub secret_set: bool,
}

impl CloudHook {
    pub fn into_descriptor(self) -> WebhookDescriptor {
        WebhookDescriptor {
            id: self.uuid.unwrap_or_default(),
            flavor: HookFlavor::Cloud,
            description: self.description,
            url: self.url,
            active: self.active,
            events: self.events.into_iter().collect(),
            secret_set: self.secret_set || self.secret.is_some(),
            secret: self.secret,
            committers_to_ignore: None,
        }
    }
}

impl From<&WebhookDescriptor> for CloudHook {
    fn from(hook: &WebhookDescriptor) -> Self {
        Self {
            uuid: None,
            description: hook.description.clone(),
            url: hook.url.clone(),
            active: hook.active,
            events: hook.events.iter().cloned().collect(),
            secret: hook.secret.clone(),
            secret_set: false,
        }
    }
}
