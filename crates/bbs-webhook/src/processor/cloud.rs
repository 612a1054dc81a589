//! Bitbucket Cloud deliveries: `X-Event-Key` plus `X-Hook-UUID`, never a
//! vendor type header or a `server_url` parameter.

use super::{parse_body, Translation, WebhookProcessor};
use crate::request::{
    WebhookRequest, BITBUCKET_TYPE_HEADER, HOOK_UUID_HEADER, SERVER_URL_PARAM,
};
use crate::translate::{cloud_pull_request_change, cloud_ref_change, pull_request_head, ref_head};
use crate::{Result, WebhookError};
use bbs_client::models::cloud::CloudPullRequest;
use bbs_core::{
    ChangeType, EventKind, HeadRevision, NormalizedEvent, ReindexRequest, RepositoryRef,
    CLOUD_SERVER_URL,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Slug {
    slug: String,
}

#[derive(Debug, Deserialize)]
struct ProjectKey {
    key: String,
}

#[derive(Debug, Deserialize)]
struct CloudRepositoryPayload {
    full_name: String,
    #[serde(default)]
    workspace: Option<Slug>,
    #[serde(default)]
    project: Option<ProjectKey>,
}

impl CloudRepositoryPayload {
    fn into_ref(self) -> Result<RepositoryRef> {
        let (owner, name) = self.full_name.split_once('/').ok_or_else(|| {
            WebhookError::InvalidPayload(format!(
                "repository full name '{}' has no owner",
                self.full_name
            ))
        })?;
        let owner = self
            .workspace
            .map(|w| w.slug)
            .unwrap_or_else(|| owner.to_string());

        let repository = RepositoryRef::new(owner, name);
        Ok(match self.project {
            Some(project) => repository.with_project_key(project.key),
            None => repository,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Target {
    hash: String,
}

/// One side of a cloud-shaped ref change.
#[derive(Debug, Deserialize)]
pub(crate) struct RefState {
    #[serde(rename = "type", default)]
    kind: String,
    name: String,
    #[serde(default)]
    target: Option<Target>,
}

impl RefState {
    fn into_head(self, alive: bool) -> HeadRevision {
        let hash = if alive {
            self.target.as_ref().map(|t| t.hash.as_str())
        } else {
            None
        };
        ref_head(self.kind == "tag", &self.name, hash)
    }
}

/// Cloud-shaped ref change, shared with the plugin payloads.
#[derive(Debug, Deserialize)]
pub(crate) struct RefChange {
    #[serde(default)]
    new: Option<RefState>,
    #[serde(default)]
    old: Option<RefState>,
    #[serde(default)]
    created: bool,
    #[serde(default)]
    closed: bool,
}

impl RefChange {
    fn change_type(&self) -> ChangeType {
        cloud_ref_change(self.created, self.closed)
    }

    fn into_head(self) -> Option<HeadRevision> {
        match (self.new, self.old) {
            (Some(new), _) => Some(new.into_head(true)),
            (None, Some(old)) => Some(old.into_head(false)),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PushBody {
    #[serde(default)]
    pub(crate) changes: Vec<RefChange>,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    repository: CloudRepositoryPayload,
    #[serde(default)]
    push: PushBody,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    repository: CloudRepositoryPayload,
    pullrequest: CloudPullRequest,
}

/// Reduce cloud-shaped ref changes into one event, or a re-index when empty.
pub(crate) fn translate_push(
    changes: Vec<RefChange>,
    event_key: &str,
    origin: &str,
    repository: RepositoryRef,
) -> Translation {
    if changes.is_empty() {
        return Translation::Reindex(ReindexRequest {
            origin: origin.to_string(),
            repository,
        });
    }

    let change_type = ChangeType::reduce(changes.iter().map(RefChange::change_type));
    let heads = changes.into_iter().filter_map(RefChange::into_head).collect();
    Translation::Event(NormalizedEvent::new(
        EventKind::Push,
        event_key,
        origin,
        repository,
        heads,
        change_type,
    ))
}

/// Pull request event from a cloud-shaped pull request.
pub(crate) fn translate_pull_request(
    pull_request: CloudPullRequest,
    event_key: &str,
    origin: &str,
    repository: RepositoryRef,
) -> Result<Translation> {
    let Some(change_type) = cloud_pull_request_change(event_key) else {
        return Ok(Translation::Ignored(format!("unsupported event '{}'", event_key)));
    };
    let id = pull_request.id;
    let pull_request = pull_request.into_pull_request().ok_or_else(|| {
        WebhookError::InvalidPayload(format!("pull request {} is missing source or destination", id))
    })?;

    Ok(Translation::Event(NormalizedEvent::new(
        EventKind::PullRequest,
        event_key,
        origin,
        repository,
        vec![pull_request_head(&pull_request, change_type)],
        change_type,
    )))
}

fn cloud_match(request: &WebhookRequest, accepts: fn(&str) -> bool) -> Option<u8> {
    let event_key = request.event_key()?;
    if !accepts(event_key)
        || !request.has_header(HOOK_UUID_HEADER)
        || request.has_header(BITBUCKET_TYPE_HEADER)
        || request.param(SERVER_URL_PARAM).is_some()
    {
        return None;
    }
    Some(2)
}

fn event_key(request: &WebhookRequest) -> &str {
    request.event_key().unwrap_or_default()
}

pub struct CloudPushProcessor;

impl WebhookProcessor for CloudPushProcessor {
    fn name(&self) -> &'static str {
        "cloud-push"
    }

    fn matches(&self, request: &WebhookRequest) -> Option<u8> {
        cloud_match(request, |key| key == "repo:push")
    }

    fn server_url(&self, _request: &WebhookRequest) -> Result<String> {
        Ok(CLOUD_SERVER_URL.to_string())
    }

    fn translate(&self, request: &WebhookRequest, origin: &str) -> Result<Translation> {
        let payload: PushPayload = parse_body(request)?;
        Ok(translate_push(
            payload.push.changes,
            event_key(request),
            origin,
            payload.repository.into_ref()?,
        ))
    }
}

pub struct CloudPullRequestProcessor;

impl WebhookProcessor for CloudPullRequestProcessor {
    fn name(&self) -> &'static str {
        "cloud-pull-request"
    }

    fn matches(&self, request: &WebhookRequest) -> Option<u8> {
        cloud_match(request, |key| cloud_pull_request_change(key).is_some())
    }

    fn server_url(&self, _request: &WebhookRequest) -> Result<String> {
        Ok(CLOUD_SERVER_URL.to_string())
    }

    fn translate(&self, request: &WebhookRequest, origin: &str) -> Result<Translation> {
        let payload: PullRequestPayload = parse_body(request)?;
        translate_pull_request(
            payload.pullrequest,
            event_key(request),
            origin,
            payload.repository.into_ref()?,
        )
    }
}
