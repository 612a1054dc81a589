//! Bitbucket Cloud client
//!
//! Repository paths live under `/2.0/repositories/{owner}/{repo}`; listings
//! use `page`/`pagelen` with an absolute `next` link.

use crate::api::{BitbucketApi, ClientContext};
use crate::error::{optional, ApiError, Result};
use crate::lazy::{CommitResolver, LazyCommit};
use crate::models::cloud::{
    CloudBuildStatus, CloudCommit, CloudHook, CloudPullRequest, CloudRef, CloudRepository,
    CloudWorkspace,
};
use crate::models::{
    Branch, BuildStatus, Commit, PullRequest, Repository, RepositoryRole, Tag, Team,
    WebhookDescriptor,
};
use crate::pagination::{fetch_all, page_size, CloudPage};
use crate::status::{bounded_key, bounded_name};
use crate::transport::{decode, AuthenticatedTransport};
use crate::urls;
use async_trait::async_trait;
use bbs_core::Endpoint;
use bbs_infra::CacheKeyBuilder;
use bytes::Bytes;
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};
use url::Url;

const NO_SEGMENTS: [&str; 0] = [];

/// Client for one Bitbucket Cloud owner, optionally scoped to a repository.
///
/// Cloning is cheap; clones share the per-instance repository memo.
#[derive(Clone)]
pub struct CloudClient {
    inner: Arc<Inner>,
}

struct Inner {
    context: ClientContext,
    api: Url,
    repository: OnceCell<Repository>,
    default_branch: OnceCell<String>,
}

impl CloudClient {
    pub fn new(context: ClientContext) -> Result<Self> {
        let api = urls::base(context.endpoint.api_base_url())?;
        Ok(Self {
            inner: Arc::new(Inner {
                context,
                api,
                repository: OnceCell::new(),
                default_branch: OnceCell::new(),
            }),
        })
    }

    fn context(&self) -> &ClientContext {
        &self.inner.context
    }

    fn transport(&self) -> &AuthenticatedTransport {
        &self.inner.context.transport
    }

    fn cache_enabled(&self) -> bool {
        self.context().caches.is_enabled()
    }

    /// `/2.0/{segments}`
    fn api_url<'a>(
        &'a self,
        segments: impl IntoIterator<Item = &'a str>,
        query: &[(&str, &str)],
    ) -> Result<Url> {
        urls::join(&self.inner.api, ["2.0"].into_iter().chain(segments), query)
    }

    /// `/2.0/repositories/{owner}/{repo}/{segments}`
    fn repo_url<'a>(
        &'a self,
        segments: impl IntoIterator<Item = &'a str>,
        query: &[(&str, &str)],
    ) -> Result<Url> {
        let repo = self.context().repository()?;
        self.api_url(
            ["repositories", self.context().owner.as_str(), repo]
                .into_iter()
                .chain(segments),
            query,
        )
    }

    fn commit_resolver(&self) -> CommitResolver {
        let client = self.clone();
        Arc::new(move |hash: String| {
            let client = client.clone();
            async move { client.lookup_commit(&hash).await }.boxed()
        })
    }

    fn lazy_commit(&self, target: Option<CloudCommit>) -> Option<LazyCommit> {
        let target = target?;
        if target.is_complete() {
            Some(LazyCommit::resolved(target.into_commit()))
        } else {
            Some(LazyCommit::deferred(&target.hash, self.commit_resolver()))
        }
    }

    fn to_branch(&self, reference: CloudRef, default_branch: Option<&str>) -> Option<Branch> {
        let is_default = default_branch == Some(reference.name.as_str());
        Some(Branch {
            commit: self.lazy_commit(reference.target)?,
            name: reference.name,
            active: reference.active,
            is_default,
        })
    }

    fn to_tag(&self, reference: CloudRef) -> Option<Tag> {
        Some(Tag {
            commit: self.lazy_commit(reference.target)?,
            name: reference.name,
        })
    }

    async fn fetch_repository(&self) -> Result<Repository> {
        let url = self.repo_url(NO_SEGMENTS, &[])?;
        let repository: CloudRepository = self.transport().get_json(&url).await?;
        Ok(repository.into_repository(&self.context().owner))
    }

    async fn lookup_commit(&self, hash: &str) -> Result<Option<Commit>> {
        let key = CacheKeyBuilder::new("commit")
            .with("owner", &self.context().owner)
            .with("repo", self.context().repository()?)
            .with("hash", hash)
            .build();
        let client = self.clone();
        let hash = hash.to_string();

        let result = self
            .context()
            .caches
            .commits
            .get(key, move || async move {
                let url = client.repo_url(["commit", hash.as_str()], &[])?;
                let commit: CloudCommit = client.transport().get_json(&url).await?;
                Ok::<_, ApiError>(commit.into_commit())
            })
            .await;
        optional(result)
    }

    async fn fetch_repositories(&self, role: Option<RepositoryRole>) -> Result<Vec<Repository>> {
        let pagelen = page_size::CLOUD_DEFAULT.to_string();
        let mut query = vec![("pagelen", pagelen.as_str())];
        if let Some(role) = role {
            query.push(("role", role.as_str()));
        }
        let url = self.api_url(["repositories", self.context().owner.as_str()], &query)?;

        let listed = fetch_all::<CloudPage<CloudRepository>>(self.transport(), url).await?;
        let mut repositories: Vec<Repository> = listed
            .into_iter()
            .map(|r| r.into_repository(&self.context().owner))
            .filter(|r| !r.archived)
            .collect();
        repositories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(repositories)
    }

    async fn fetch_refs(&self, kind: &str) -> Result<Vec<CloudRef>> {
        let pagelen = page_size::CLOUD_DEFAULT.to_string();
        let url = self.repo_url(["refs", kind], &[("pagelen", pagelen.as_str())])?;
        fetch_all::<CloudPage<CloudRef>>(self.transport(), url).await
    }

    async fn fetch_ref(&self, kind: &str, name: &str) -> Result<Option<CloudRef>> {
        let url = self.repo_url(["refs", kind, name], &[])?;
        optional(self.transport().get_json(&url).await)
    }
}

#[async_trait]
impl BitbucketApi for CloudClient {
    fn endpoint(&self) -> &Endpoint {
        &self.context().endpoint
    }

    fn owner(&self) -> &str {
        &self.context().owner
    }

    fn repository_name(&self) -> Option<&str> {
        self.context().repository.as_deref()
    }

    #[instrument(skip(self), fields(owner = %self.owner()))]
    async fn get_repository(&self) -> Result<Repository> {
        if !self.cache_enabled() {
            return self.fetch_repository().await;
        }
        self.inner
            .repository
            .get_or_try_init(|| self.fetch_repository())
            .await
            .cloned()
    }

    #[instrument(skip(self), fields(owner = %self.owner()))]
    async fn get_default_branch(&self) -> Result<Option<String>> {
        if let Some(branch) = self.inner.default_branch.get() {
            return Ok(Some(branch.clone()));
        }
        let branch = optional(self.get_repository().await)?.and_then(|r| r.default_branch);
        match &branch {
            Some(name) => {
                let _ = self.inner.default_branch.set(name.clone());
            }
            None => debug!("Default branch not discoverable"),
        }
        Ok(branch)
    }

    async fn resolve_commit(&self, hash: &str) -> Result<Option<Commit>> {
        self.lookup_commit(hash).await
    }

    async fn get_branch(&self, name: &str) -> Result<Option<Branch>> {
        let Some(reference) = self.fetch_ref("branches", name).await? else {
            return Ok(None);
        };
        let default_branch = self.get_default_branch().await?;
        Ok(self.to_branch(reference, default_branch.as_deref()))
    }

    #[instrument(skip(self), fields(owner = %self.owner()))]
    async fn get_branches(&self) -> Result<Vec<Branch>> {
        let refs = self.fetch_refs("branches").await?;
        let default_branch = self.get_default_branch().await?;
        Ok(refs
            .into_iter()
            .filter_map(|r| self.to_branch(r, default_branch.as_deref()))
            .filter(|b| b.active)
            .collect())
    }

    async fn get_tag(&self, name: &str) -> Result<Option<Tag>> {
        Ok(self
            .fetch_ref("tags", name)
            .await?
            .and_then(|r| self.to_tag(r)))
    }

    #[instrument(skip(self), fields(owner = %self.owner()))]
    async fn get_tags(&self) -> Result<Vec<Tag>> {
        let refs = self.fetch_refs("tags").await?;
        Ok(refs.into_iter().filter_map(|r| self.to_tag(r)).collect())
    }

    #[instrument(skip(self), fields(owner = %self.owner()))]
    async fn get_pull_requests(&self) -> Result<Vec<PullRequest>> {
        let pagelen = page_size::CLOUD_PULL_REQUESTS.to_string();
        let url = self.repo_url(
            ["pullrequests"],
            &[("state", "OPEN"), ("pagelen", pagelen.as_str())],
        )?;

        let listed = fetch_all::<CloudPage<CloudPullRequest>>(self.transport(), url).await?;
        let total = listed.len();
        let pull_requests: Vec<PullRequest> = listed
            .into_iter()
            .filter_map(CloudPullRequest::into_pull_request)
            .collect();
        if pull_requests.len() < total {
            debug!(dropped = total - pull_requests.len(), "Ignoring incomplete pull requests");
        }
        Ok(pull_requests)
    }

    async fn get_pull_request(&self, id: &str) -> Result<PullRequest> {
        let url = self.repo_url(["pullrequests", id], &[])?;
        let pull_request: CloudPullRequest = self.transport().get_json(&url).await?;
        pull_request
            .into_pull_request()
            .ok_or_else(|| ApiError::Protocol {
                url: url.to_string(),
                message: format!("pull request {} has no complete source or destination", id),
            })
    }

    #[instrument(skip(self, status), fields(owner = %self.owner(), hash = %status.hash))]
    async fn post_build_status(&self, status: &BuildStatus) -> Result<()> {
        let key = bounded_key(&status.key);
        let name = bounded_name(&status.name);
        let url = self.repo_url(["commit", status.hash.as_str(), "statuses", "build"], &[])?;

        self.transport()
            .post_json(&url, &CloudBuildStatus::new(status, &key, &name), false)
            .await?;
        Ok(())
    }

    async fn check_path_exists(&self, reference: &str, path: &str) -> Result<bool> {
        let url = self.repo_url(
            ["src", reference].into_iter().chain(urls::split_path(path)),
            &[("format", "meta")],
        )?;
        path_probe(&url, self.transport().get_status(&url).await?)
    }

    async fn get_file_content(&self, reference: &str, path: &str) -> Result<Bytes> {
        let url = self.repo_url(
            ["src", reference].into_iter().chain(urls::split_path(path)),
            &[],
        )?;
        self.transport().get_bytes(&url).await
    }

    #[instrument(skip(self), fields(owner = %self.owner()))]
    async fn get_repositories(&self, role: Option<RepositoryRole>) -> Result<Vec<Repository>> {
        let key = CacheKeyBuilder::new("repositories")
            .with("owner", &self.context().owner)
            .with_optional("role", role.as_ref().map(RepositoryRole::as_str))
            .with("auth", self.context().auth_marker())
            .build();
        let client = self.clone();

        self.context()
            .caches
            .repositories
            .get(key, move || async move { client.fetch_repositories(role).await })
            .await
    }

    async fn get_team(&self) -> Result<Option<Team>> {
        let key = CacheKeyBuilder::new("team")
            .with("owner", &self.context().owner)
            .with("auth", self.context().auth_marker())
            .build();
        let client = self.clone();

        let result = self
            .context()
            .caches
            .team
            .get(key, move || async move {
                let url = client.api_url(["workspaces", client.owner()], &[])?;
                let workspace: CloudWorkspace = client.transport().get_json(&url).await?;
                Ok::<_, ApiError>(workspace.into_team())
            })
            .await;
        optional(result)
    }

    async fn is_private(&self) -> Result<bool> {
        Ok(self.get_repository().await?.is_private)
    }

    async fn get_webhooks(&self) -> Result<Vec<WebhookDescriptor>> {
        let pagelen = page_size::CLOUD_DEFAULT.to_string();
        let url = self.repo_url(["hooks"], &[("pagelen", pagelen.as_str())])?;
        let hooks = fetch_all::<CloudPage<CloudHook>>(self.transport(), url).await?;
        Ok(hooks.into_iter().map(CloudHook::into_descriptor).collect())
    }

    #[instrument(skip(self, hook), fields(owner = %self.owner(), url = %hook.url))]
    async fn create_webhook(&self, hook: &WebhookDescriptor) -> Result<WebhookDescriptor> {
        let url = self.repo_url(["hooks"], &[])?;
        let body = self
            .transport()
            .post_json(&url, &CloudHook::from(hook), false)
            .await?;
        let created: CloudHook = decode(&url, &body)?;
        info!(hook_id = ?created.uuid, "Created webhook");
        Ok(created.into_descriptor())
    }

    #[instrument(skip(self, hook), fields(owner = %self.owner(), hook_id = %hook.id))]
    async fn update_webhook(&self, hook: &WebhookDescriptor) -> Result<WebhookDescriptor> {
        let url = self.repo_url(["hooks", hook.id.as_str()], &[])?;
        let body = self.transport().put_json(&url, &CloudHook::from(hook)).await?;
        let updated: CloudHook = decode(&url, &body)?;
        info!("Updated webhook");
        Ok(updated.into_descriptor())
    }

    #[instrument(skip(self), fields(owner = %self.owner()))]
    async fn remove_webhook(&self, id: &str) -> Result<()> {
        let url = self.repo_url(["hooks", id], &[])?;
        self.transport().delete(&url).await?;
        info!(hook_id = %id, "Removed webhook");
        Ok(())
    }
}

/// Map a path probe status to existence.
pub(crate) fn path_probe(url: &Url, status: u16) -> Result<bool> {
    match status {
        200..=299 => Ok(true),
        404 => Ok(false),
        403 => {
            warn!(url = %url, "No permission to verify path, treating it as absent");
            Ok(false)
        }
        status => Err(ApiError::Request {
            url: url.to_string(),
            status,
            body: format!("unexpected status {} probing path", status),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_probe_mapping() {
        let url = Url::parse("https://api.bitbucket.org/2.0/x").unwrap();

        assert_eq!(path_probe(&url, 200), Ok(true));
        assert_eq!(path_probe(&url, 404), Ok(false));
        assert_eq!(path_probe(&url, 403), Ok(false));
        assert_eq!(path_probe(&url, 500).unwrap_err().status_code(), Some(500));
    }
}
