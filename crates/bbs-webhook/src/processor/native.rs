//! Bitbucket Server native webhooks.
//!
//! Deliveries carry `X-Request-Id` and the `server_url` parameter appended
//! to the callback URL at registration time.

use super::{parse_body, Translation, WebhookProcessor};
use crate::request::{WebhookRequest, BITBUCKET_TYPE_HEADER, REQUEST_ID_HEADER, SERVER_URL_PARAM};
use crate::translate::{native_pull_request_change, native_ref_change, pull_request_head, ref_head};
use crate::{Result, WebhookError};
use bbs_client::models::server::{ServerProject, ServerPullRequest, ServerRepository};
use bbs_core::{
    normalize_server_url, ChangeType, EventKind, NormalizedEvent, ReindexRequest, RepositoryRef,
};
use serde::Deserialize;

const PUSH_EVENTS: [&str; 2] = ["repo:refs_changed", "mirror:repo_synchronized"];
const PING_EVENT: &str = "diagnostics:ping";

/// Repository reference for a server project; personal projects are owned by `~user`.
pub(crate) fn project_repository(slug: &str, project: &ServerProject) -> RepositoryRef {
    let personal_owner = (project.kind.as_deref() == Some("PERSONAL"))
        .then(|| project.owner.as_ref().and_then(|o| o.slug.as_deref()))
        .flatten();
    let owner = match personal_owner {
        Some(user) => format!("~{}", user),
        None => project.key.clone(),
    };
    RepositoryRef::new(owner, slug).with_project_key(project.key.clone())
}

pub(crate) fn server_repository(repository: &ServerRepository) -> Result<RepositoryRef> {
    let project = repository.project.as_ref().ok_or_else(|| {
        WebhookError::InvalidPayload(format!("repository '{}' has no project", repository.slug))
    })?;
    Ok(project_repository(&repository.slug, project))
}

/// Normalized value of the `server_url` parameter.
pub(crate) fn server_url_param(request: &WebhookRequest) -> Option<Result<String>> {
    let raw = request.param(SERVER_URL_PARAM)?;
    Some(normalize_server_url(raw).map_err(|e| WebhookError::InvalidPayload(e.to_string())))
}

fn native_server_url(request: &WebhookRequest) -> Result<String> {
    server_url_param(request).unwrap_or_else(|| {
        Err(WebhookError::InvalidPayload(format!(
            "missing '{}' parameter",
            SERVER_URL_PARAM
        )))
    })
}

fn native_match(request: &WebhookRequest, accepts: fn(&str) -> bool) -> Option<u8> {
    let event_key = request.event_key()?;
    if !accepts(event_key)
        || !request.has_header(REQUEST_ID_HEADER)
        || request.has_header(BITBUCKET_TYPE_HEADER)
        || request.param(SERVER_URL_PARAM).is_none()
    {
        return None;
    }
    Some(3)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativeRef {
    display_id: String,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativeRefChange {
    #[serde(rename = "ref")]
    reference: NativeRef,
    #[serde(default)]
    to_hash: Option<String>,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct NativePushPayload {
    repository: ServerRepository,
    #[serde(default)]
    changes: Vec<NativeRefChange>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativePullRequestPayload {
    pull_request: ServerPullRequest,
}

pub struct NativePushProcessor;

impl WebhookProcessor for NativePushProcessor {
    fn name(&self) -> &'static str {
        "native-push"
    }

    fn matches(&self, request: &WebhookRequest) -> Option<u8> {
        native_match(request, |key| PUSH_EVENTS.contains(&key))
    }

    fn server_url(&self, request: &WebhookRequest) -> Result<String> {
        native_server_url(request)
    }

    fn translate(&self, request: &WebhookRequest, origin: &str) -> Result<Translation> {
        let payload: NativePushPayload = parse_body(request)?;
        let repository = server_repository(&payload.repository)?;

        if payload.changes.is_empty() {
            return Ok(Translation::Reindex(ReindexRequest {
                origin: origin.to_string(),
                repository,
            }));
        }

        let change_type =
            ChangeType::reduce(payload.changes.iter().map(|c| native_ref_change(&c.kind)));
        let heads = payload
            .changes
            .iter()
            .map(|change| {
                let hash = match native_ref_change(&change.kind) {
                    ChangeType::Removed => None,
                    _ => change.to_hash.as_deref(),
                };
                ref_head(
                    change.reference.kind.eq_ignore_ascii_case("TAG"),
                    &change.reference.display_id,
                    hash,
                )
            })
            .collect();

        Ok(Translation::Event(NormalizedEvent::new(
            EventKind::Push,
            request.event_key().unwrap_or_default(),
            origin,
            repository,
            heads,
            change_type,
        )))
    }
}

pub struct NativePullRequestProcessor;

impl WebhookProcessor for NativePullRequestProcessor {
    fn name(&self) -> &'static str {
        "native-pull-request"
    }

    fn matches(&self, request: &WebhookRequest) -> Option<u8> {
        native_match(request, |key| native_pull_request_change(key).is_some())
    }

    fn server_url(&self, request: &WebhookRequest) -> Result<String> {
        native_server_url(request)
    }

    fn translate(&self, request: &WebhookRequest, origin: &str) -> Result<Translation> {
        let event_key = request.event_key().unwrap_or_default();
        let Some(change_type) = native_pull_request_change(event_key) else {
            return Ok(Translation::Ignored(format!("unsupported event '{}'", event_key)));
        };

        let payload: NativePullRequestPayload = parse_body(request)?;
        let id = payload.pull_request.id;
        let repository = payload
            .pull_request
            .to_ref
            .as_ref()
            .and_then(|r| r.repository.as_ref())
            .and_then(|r| Some(project_repository(r.slug.as_deref()?, r.project.as_ref()?)))
            .ok_or_else(|| {
                WebhookError::InvalidPayload(format!(
                    "pull request {} has no target repository",
                    id
                ))
            })?;
        let pull_request = payload.pull_request.into_pull_request().ok_or_else(|| {
            WebhookError::InvalidPayload(format!("pull request {} has incomplete refs", id))
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
}

/// Connection test sent from the server's webhook settings page.
pub struct NativePingProcessor;

impl WebhookProcessor for NativePingProcessor {
    fn name(&self) -> &'static str {
        "native-ping"
    }

    fn matches(&self, request: &WebhookRequest) -> Option<u8> {
        native_match(request, |key| key == PING_EVENT)
    }

    fn server_url(&self, request: &WebhookRequest) -> Result<String> {
        native_server_url(request)
    }

    fn requires_signature(&self) -> bool {
        false
    }

    fn translate(&self, _request: &WebhookRequest, _origin: &str) -> Result<Translation> {
        Ok(Translation::Ping)
    }
}
