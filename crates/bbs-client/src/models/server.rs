//! Bitbucket Server / Data Center wire formats

use super::{
    active_by_default, BuildState, BuildStatus, Commit, HookFlavor, PullRequest, PullRequestRef,
    PullRequestState, Repository, Team, TeamKind, WebhookDescriptor,
};
use bbs_core::ServerVersion;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
pub struct Href {
    pub href: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerLinks {
    #[serde(rename = "self", default)]
    pub self_links: Vec<Href>,
}

impl ServerLinks {
    fn first(self) -> Option<String> {
        self.self_links.into_iter().next().map(|l| l.href)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerUser {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerProject {
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub public: bool,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub owner: Option<ServerUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerRepository {
    pub slug: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub description: Option<String>,
    pub project: Option<ServerProject>,
    #[serde(default)]
    pub links: ServerLinks,
}

impl ServerRepository {
    pub fn owner(&self) -> Option<String> {
        let project = self.project.as_ref()?;
        if project.kind.as_deref() == Some("PERSONAL") {
            if let Some(slug) = project.owner.as_ref().and_then(|o| o.slug.clone()) {
                return Some(format!("~{}", slug));
            }
        }
        Some(project.key.clone())
    }

    pub fn into_repository(self, fallback_owner: &str) -> Repository {
        let owner = self.owner().unwrap_or_else(|| fallback_owner.to_string());
        let (project_key, project_name, project_public) = match self.project {
            Some(project) => (Some(project.key), project.name, project.public),
            None => (None, None, false),
        };

        Repository {
            owner,
            display_name: self.name.unwrap_or_else(|| self.slug.clone()),
            name: self.slug,
            project_key,
            project_name,
            is_private: !(self.public || project_public),
            archived: self.archived,
            default_branch: None,
            description: self.description.filter(|d| !d.is_empty()),
            html_url: self.links.first(),
        }
    }
}

/// Branch or tag entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRef {
    #[serde(default)]
    pub id: Option<String>,
    pub display_id: String,
    #[serde(default)]
    pub latest_commit: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCommit {
    pub id: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub author: Option<ServerCommitAuthor>,
    #[serde(default)]
    pub author_timestamp: Option<i64>,
    #[serde(default)]
    pub parents: Vec<ServerParent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCommitAuthor {
    pub name: String,
    #[serde(default)]
    pub email_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerParent {
    pub id: String,
}

pub(crate) fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

impl ServerCommit {
    pub fn into_commit(self) -> Commit {
        Commit {
            hash: self.id,
            message: self.message,
            author: self.author.map(|a| match a.email_address {
                Some(email) => format!("{} <{}>", a.name, email),
                None => a.name,
            }),
            date: self.author_timestamp.and_then(from_millis),
            parents: self.parents.into_iter().map(|p| p.id).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerRepoRef {
    pub slug: Option<String>,
    pub project: Option<ServerProject>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerPullRequestRef {
    #[serde(default)]
    pub display_id: Option<String>,
    #[serde(default)]
    pub latest_commit: Option<String>,
    #[serde(default)]
    pub repository: Option<ServerRepoRef>,
}

impl ServerPullRequestRef {
    fn into_ref(self) -> Option<PullRequestRef> {
        let repository = self.repository?;
        Some(PullRequestRef {
            branch: self.display_id?,
            commit_hash: self.latest_commit?,
            repository: format!("{}/{}", repository.project?.key, repository.slug?),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerParticipant {
    pub user: ServerUser,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerPullRequest {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    pub state: PullRequestState,
    #[serde(default)]
    pub author: Option<ServerParticipant>,
    pub from_ref: Option<ServerPullRequestRef>,
    pub to_ref: Option<ServerPullRequestRef>,
    #[serde(default)]
    pub links: ServerLinks,
    #[serde(default)]
    pub updated_date: Option<i64>,
}

impl ServerPullRequest {
    /// `None` for orphans whose source or destination is incomplete.
    pub fn into_pull_request(self) -> Option<PullRequest> {
        Some(PullRequest {
            id: self.id.to_string(),
            title: self.title,
            state: self.state,
            author: self
                .author
                .and_then(|a| a.user.display_name.or(a.user.name)),
            source: self.from_ref?.into_ref()?,
            destination: self.to_ref?.into_ref()?,
            html_url: self.links.first(),
            updated_on: self.updated_date.and_then(from_millis),
            can_merge: None,
            has_changes: None,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMergeability {
    pub can_merge: bool,
    #[serde(default)]
    pub conflicted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerBuildStatus<'a> {
    pub state: &'static str,
    pub key: &'a str,
    pub name: &'a str,
    pub url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
}

impl<'a> ServerBuildStatus<'a> {
    pub fn new(status: &'a BuildStatus, key: &'a str, name: &'a str, version: ServerVersion) -> Self {
        Self {
            state: match status.state {
                BuildState::InProgress => "INPROGRESS",
                BuildState::Successful => "SUCCESSFUL",
                BuildState::Failed => "FAILED",
                BuildState::Stopped if version >= ServerVersion::V8 => "CANCELLED",
                BuildState::Stopped => "FAILED",
            },
            key,
            name,
            url: &status.url,
            description: status.description.as_deref(),
        }
    }
}

/// Team lookup result: a project or a user.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerOwner {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl ServerOwner {
    pub fn into_team(self, owner: &str) -> Team {
        let kind = if owner.starts_with('~') {
            TeamKind::User
        } else {
            TeamKind::Project
        };
        Team {
            key: owner.to_string(),
            display_name: self
                .display_name
                .or(self.name)
                .or(self.key)
                .or(self.slug)
                .unwrap_or_else(|| owner.to_string()),
            kind,
        }
    }
}

/// Native webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeHook {
    #[serde(default, skip_serializing)]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub configuration: HashMap<String, String>,
}

impl NativeHook {
    pub fn into_descriptor(mut self) -> WebhookDescriptor {
        let secret = self.configuration.remove("secret").filter(|s| !s.is_empty());
        WebhookDescriptor {
            id: self.id.map(|id| id.to_string()).unwrap_or_default(),
            flavor: HookFlavor::ServerNative,
            description: self.name,
            url: self.url,
            active: self.active,
            events: self.events.into_iter().collect(),
            secret_set: secret.is_some(),
            secret,
            committers_to_ignore: None,
        }
    }
}

impl From<&WebhookDescriptor> for NativeHook {
    fn from(hook: &WebhookDescriptor) -> Self {
        let mut configuration = HashMap::new();
        if let Some(secret) = &hook.secret {
            configuration.insert("secret".to_string(), secret.clone());
        }
        Self {
            id: None,
            name: hook.description.clone(),
            url: hook.url.clone(),
            active: hook.active,
            events: hook.events.iter().cloned().collect(),
            configuration,
        }
    }
}

/// Plugin-backed webhook configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginHook {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default)]
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub committers_to_ignore: Option<String>,
}

impl PluginHook {
    pub fn into_descriptor(self) -> WebhookDescriptor {
        WebhookDescriptor {
            id: self.id.map(|id| id.to_string()).unwrap_or_default(),
            flavor: HookFlavor::ServerPlugin,
            description: self.title,
            url: self.url,
            active: self.enabled,
            events: Default::default(),
            secret: None,
            secret_set: false,
            committers_to_ignore: self.committers_to_ignore.filter(|c| !c.is_empty()),
        }
    }
}

impl From<&WebhookDescriptor> for PluginHook {
    fn from(hook: &WebhookDescriptor) -> Self {
        Self {
            id: hook.id.parse().ok(),
            title: hook.description.clone(),
            url: hook.url.clone(),
            enabled: hook.active,
            committers_to_ignore: hook.committers_to_ignore.clone(),
        }
    }
}
