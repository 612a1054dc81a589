//! Deliveries from the server-side "Post Webhooks" plugin.
//!
//! The plugin speaks cloud event keys with a server repository shape and
//! tags requests with `X-Bitbucket-Type: server`.

use super::cloud::{translate_push, PushBody};
use super::native::{server_repository, server_url_param};
use super::{parse_body, Translation, WebhookProcessor};
use crate::request::{WebhookRequest, BITBUCKET_TYPE_HEADER, SERVER_URL_PARAM};
use crate::translate::{cloud_pull_request_change, pull_request_head};
use crate::{Result, WebhookError};
use bbs_client::models::server::ServerRepository;
use bbs_client::{PullRequest, PullRequestRef, PullRequestState};
use bbs_core::{normalize_server_url, EventKind, NormalizedEvent};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RepositoryOnly {
    repository: ServerRepository,
}

#[derive(Debug, Deserialize)]
struct PluginPushPayload {
    repository: ServerRepository,
    #[serde(default)]
    push: PushBody,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Hashed {
    hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PluginRepoName {
    #[serde(alias = "full_name")]
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct PluginPullRequestEnd {
    branch: Named,
    commit: Hashed,
    repository: PluginRepoName,
}

impl PluginPullRequestEnd {
    fn into_ref(self) -> PullRequestRef {
        PullRequestRef {
            branch: self.branch.name,
            commit_hash: self.commit.hash,
            repository: self.repository.full_name,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PluginPullRequest {
    id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    state: Option<PullRequestState>,
    #[serde(alias = "source")]
    from_ref: PluginPullRequestEnd,
    #[serde(alias = "destination")]
    to_ref: PluginPullRequestEnd,
}

impl PluginPullRequest {
    fn into_pull_request(self) -> PullRequest {
        PullRequest {
            id: self.id.to_string(),
            title: self.title,
            state: self.state.unwrap_or(PullRequestState::Open),
            author: None,
            source: self.from_ref.into_ref(),
            destination: self.to_ref.into_ref(),
            html_url: None,
            updated_on: None,
            can_merge: None,
            has_changes: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PluginPullRequestPayload {
    repository: ServerRepository,
    pullrequest: PluginPullRequest,
}

/// Server URL: the `server_url` parameter, else the repository self link up
/// to its `/projects/` or `/users/` segment.
fn plugin_server_url(request: &WebhookRequest) -> Result<String> {
    if let Some(url) = server_url_param(request) {
        return url;
    }

    let payload: RepositoryOnly = parse_body(request)?;
    let href = payload
        .repository
        .links
        .self_links
        .first()
        .map(|link| link.href.as_str())
        .ok_or_else(|| {
            WebhookError::InvalidPayload(format!(
                "no '{}' parameter and no repository link",
                SERVER_URL_PARAM
            ))
        })?;
    let root = ["/projects/", "/users/"]
        .iter()
        .find_map(|marker| href.find(marker).map(|at| &href[..at]))
        .ok_or_else(|| {
            WebhookError::InvalidPayload(format!("cannot derive server URL from '{}'", href))
        })?;

    normalize_server_url(root).map_err(|e| WebhookError::InvalidPayload(e.to_string()))
}

fn plugin_match(request: &WebhookRequest, accepts: fn(&str) -> bool) -> Option<u8> {
    let event_key = request.event_key()?;
    let is_server = request
        .header(BITBUCKET_TYPE_HEADER)
        .is_some_and(|kind| kind.eq_ignore_ascii_case("server"));
    if !is_server || !accepts(event_key) {
        return None;
    }
    Some(2 + u8::from(request.param(SERVER_URL_PARAM).is_some()))
}

pub struct PluginPushProcessor;

impl WebhookProcessor for PluginPushProcessor {
    fn name(&self) -> &'static str {
        "plugin-push"
    }

    fn matches(&self, request: &WebhookRequest) -> Option<u8> {
        plugin_match(request, |key| key == "repo:push")
    }

    fn server_url(&self, request: &WebhookRequest) -> Result<String> {
        plugin_server_url(request)
    }

    /// Plugin hooks are registered without a secret.
    fn requires_signature(&self) -> bool {
        false
    }

    fn translate(&self, request: &WebhookRequest, origin: &str) -> Result<Translation> {
        let payload: PluginPushPayload = parse_body(request)?;
        Ok(translate_push(
            payload.push.changes,
            request.event_key().unwrap_or_default(),
            origin,
            server_repository(&payload.repository)?,
        ))
    }
}

pub struct PluginPullRequestProcessor;

impl WebhookProcessor for PluginPullRequestProcessor {
    fn name(&self) -> &'static str {
        "plugin-pull-request"
    }

    fn matches(&self, request: &WebhookRequest) -> Option<u8> {
        plugin_match(request, |key| cloud_pull_request_change(key).is_some())
    }

    fn server_url(&self, request: &WebhookRequest) -> Result<String> {
        plugin_server_url(request)
    }

    /// Plugin hooks are registered without a secret.
    fn requires_signature(&self) -> bool {
        false
    }

    fn translate(&self, request: &WebhookRequest, origin: &str) -> Result<Translation> {
        let event_key = request.event_key().unwrap_or_default();
        let Some(change_type) = cloud_pull_request_change(event_key) else {
            return Ok(Translation::Ignored(format!("unsupported event '{}'", event_key)));
        };

        let payload: PluginPullRequestPayload = parse_body(request)?;
        let repository = server_repository(&payload.repository)?;
        let pull_request = payload.pullrequest.into_pull_request();

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::EVENT_KEY_HEADER;
    use bbs_core::{ChangeType, Head};
    use serde_json::json;

    fn request(event_key: &str, body: serde_json::Value) -> WebhookRequest {
        WebhookRequest::new(body.to_string())
            .with_header(EVENT_KEY_HEADER, event_key)
            .with_header(BITBUCKET_TYPE_HEADER, "server")
    }

    fn repository() -> serde_json::Value {
        json!({
            "slug": "widgets",
            "project": {"key": "PROJ"},
            "links": {"self": [{"href": "https://git.example.com/bitbucket/projects/PROJ/repos/widgets/browse"}]}
        })
    }

    #[test]
    fn test_server_url_from_repository_link() {
        let request = request("repo:push", json!({"repository": repository()}));
        assert_eq!(
            PluginPushProcessor.server_url(&request).unwrap(),
            "https://git.example.com/bitbucket"
        );

        let with_param = request.with_param(SERVER_URL_PARAM, "https://other.example.com");
        assert_eq!(
            PluginPushProcessor.server_url(&with_param).unwrap(),
            "https://other.example.com"
        );
    }

    #[test]
    fn test_server_url_param_raises_specificity() {
        let bare = request("repo:push", json!({}));
        assert_eq!(PluginPushProcessor.matches(&bare), Some(2));
        assert_eq!(
            PluginPushProcessor.matches(&bare.clone().with_param(SERVER_URL_PARAM, "https://x.example.com")),
            Some(3)
        );
        assert_eq!(PluginPullRequestProcessor.matches(&bare), None);
    }

    #[test]
    fn test_push_uses_cloud_shaped_changes() {
        let body = json!({
            "repository": repository(),
            "push": {"changes": [
                {"new": {"type": "branch", "name": "main", "target": {"hash": "f00"}}, "created": false, "closed": false}
            ]}
        });

        let translation = PluginPushProcessor
            .translate(&request("repo:push", body), "https://git.example.com/bitbucket")
            .unwrap();
        let Translation::Event(event) = translation else {
            panic!("expected an event, got {:?}", translation);
        };
        assert_eq!(event.change_type(), ChangeType::Updated);
        assert_eq!(event.repository().full_name(), "PROJ/widgets");
        assert_eq!(event.heads()[0].head, Head::Branch { name: "main".to_string() });
    }

    #[test]
    fn test_pull_request_merged() {
        let side = |branch: &str, hash: &str| {
            json!({"branch": {"name": branch}, "commit": {"hash": hash}, "repository": {"fullName": "PROJ/widgets"}})
        };
        let body = json!({
            "repository": repository(),
            "pullrequest": {"id": 8, "title": "Ship it", "fromRef": side("topic", "111"), "toRef": side("main", "222")}
        });

        let translation = PluginPullRequestProcessor
            .translate(&request("pullrequest:fulfilled", body), "https://git.example.com/bitbucket")
            .unwrap();
        let Translation::Event(event) = translation else {
            panic!("expected an event, got {:?}", translation);
        };
        assert_eq!(event.change_type(), ChangeType::Removed);
        assert_eq!(event.heads()[0].head.name(), "PR-8");
        assert!(event.heads()[0].revision.is_none());
    }
}
