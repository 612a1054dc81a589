//! Bitbucket Server / Data Center client
//!
//! Repository paths live under `/rest/api/1.0/projects/{key}/repos/{slug}`.
//! Personal repositories use a `~user` project key. Listings page with
//! `start`/`limit`.

use crate::api::{BitbucketApi, ClientContext};
use crate::cloud::path_probe;
use crate::error::{optional, ApiError, Result};
use crate::lazy::{CommitResolver, LazyCommit};
use crate::models::server::{
    NativeHook, PluginHook, ServerBuildStatus, ServerCommit, ServerMergeability, ServerOwner,
    ServerPullRequest, ServerRef, ServerRepository,
};
use crate::models::{
    Branch, BuildStatus, Commit, HookFlavor, PullRequest, Repository, RepositoryRole, Tag, Team,
    WebhookDescriptor,
};
use crate::pagination::{fetch_all, page_size, ServerPage};
use crate::status::{bounded_key, bounded_name};
use crate::transport::{decode, AuthenticatedTransport};
use crate::urls;
use async_trait::async_trait;
use bbs_core::{Endpoint, ServerVersion, WebhookImplementation};
use bbs_infra::CacheKeyBuilder;
use bytes::Bytes;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};
use url::Url;

const NO_SEGMENTS: [&str; 0] = [];

/// Client for one Bitbucket Server project or user, optionally scoped to a
/// repository.
#[derive(Clone)]
pub struct ServerClient {
    inner: Arc<Inner>,
}

struct Inner {
    context: ClientContext,
    base: Url,
    repository: OnceCell<Repository>,
    default_branch: OnceCell<String>,
}

impl ServerClient {
    pub fn new(context: ClientContext) -> Result<Self> {
        let base = urls::base(context.endpoint.api_base_url())?;
        Ok(Self {
            inner: Arc::new(Inner {
                context,
                base,
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

    fn version(&self) -> ServerVersion {
        self.context().endpoint.server.server_version
    }

    /// `~user` owners address a personal project.
    fn user_slug(&self) -> Option<&str> {
        self.context().owner.strip_prefix('~')
    }

    fn url<'a>(
        &'a self,
        segments: impl IntoIterator<Item = &'a str>,
        query: &[(&str, &str)],
    ) -> Result<Url> {
        urls::join(&self.inner.base, segments, query)
    }

    /// `/rest/api/1.0/{segments}`
    fn api_url<'a>(
        &'a self,
        segments: impl IntoIterator<Item = &'a str>,
        query: &[(&str, &str)],
    ) -> Result<Url> {
        self.url(["rest", "api", "1.0"].into_iter().chain(segments), query)
    }

    /// `/rest/api/1.0/projects/{owner}/repos/{repo}/{segments}`
    fn repo_url<'a>(
        &'a self,
        segments: impl IntoIterator<Item = &'a str>,
        query: &[(&str, &str)],
    ) -> Result<Url> {
        let repo = self.context().repository()?;
        self.api_url(
            ["projects", self.context().owner.as_str(), "repos", repo]
                .into_iter()
                .chain(segments),
            query,
        )
    }

    /// `/rest/webhook/1.0/projects/{owner}/repos/{repo}/configurations/{segments}`
    fn plugin_url<'a>(&'a self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
        let repo = self.context().repository()?;
        self.url(
            [
                "rest",
                "webhook",
                "1.0",
                "projects",
                self.context().owner.as_str(),
                "repos",
                repo,
                "configurations",
            ]
            .into_iter()
            .chain(segments),
            &[],
        )
    }

    fn commit_resolver(&self) -> CommitResolver {
        let client = self.clone();
        Arc::new(move |hash: String| {
            let client = client.clone();
            async move { client.lookup_commit(&hash).await }.boxed()
        })
    }

    fn to_branch(&self, reference: ServerRef, resolver: &CommitResolver) -> Option<Branch> {
        let hash = reference.latest_commit?;
        Some(Branch {
            commit: LazyCommit::deferred(&hash, Arc::clone(resolver)),
            name: reference.display_id,
            active: reference.active,
            is_default: reference.is_default,
        })
    }

    fn to_tag(&self, reference: ServerRef, resolver: &CommitResolver) -> Option<Tag> {
        let hash = reference.latest_commit?;
        Some(Tag {
            commit: LazyCommit::deferred(&hash, Arc::clone(resolver)),
            name: reference.display_id,
        })
    }

    async fn fetch_repository(&self) -> Result<Repository> {
        let url = self.repo_url(NO_SEGMENTS, &[])?;
        let repository: ServerRepository = self.transport().get_json(&url).await?;
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
                let url = client.repo_url(["commits", hash.as_str()], &[])?;
                let commit: ServerCommit = client.transport().get_json(&url).await?;
                Ok::<_, ApiError>(commit.into_commit())
            })
            .await;
        optional(result)
    }

    async fn fetch_refs(&self, kind: &str, filter: Option<&str>) -> Result<Vec<ServerRef>> {
        let limit = page_size::SERVER_DEFAULT.to_string();
        let mut query = vec![("limit", limit.as_str())];
        if let Some(filter) = filter {
            query.push(("filterText", filter));
        }
        let url = self.repo_url([kind], &query)?;
        fetch_all::<ServerPage<ServerRef>>(self.transport(), url).await
    }

    async fn fetch_repositories(&self) -> Result<Vec<Repository>> {
        let limit = page_size::SERVER_DEFAULT.to_string();
        let query = [("limit", limit.as_str())];
        let url = match self.user_slug() {
            Some(slug) => self.api_url(["users", slug, "repos"], &query)?,
            None => self.api_url(["projects", self.context().owner.as_str(), "repos"], &query)?,
        };

        let listed = fetch_all::<ServerPage<ServerRepository>>(self.transport(), url).await?;
        let mut repositories: Vec<Repository> = listed
            .into_iter()
            .map(|r| r.into_repository(&self.context().owner))
            .filter(|r| !r.archived)
            .collect();
        repositories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(repositories)
    }

    async fn list_open_pull_requests(&self) -> Result<Vec<PullRequest>> {
        let limit = page_size::SERVER_DEFAULT.to_string();
        let url = self.repo_url(
            ["pull-requests"],
            &[("state", "OPEN"), ("limit", limit.as_str())],
        )?;

        let listed = fetch_all::<ServerPage<ServerPullRequest>>(self.transport(), url).await?;
        let total = listed.len();
        let pull_requests: Vec<PullRequest> = listed
            .into_iter()
            .filter_map(ServerPullRequest::into_pull_request)
            .collect();
        if pull_requests.len() < total {
            debug!(dropped = total - pull_requests.len(), "Ignoring incomplete pull requests");
        }
        Ok(pull_requests)
    }

    /// Per pull request detail calls enabled on the endpoint.
    async fn probe_pull_request(&self, pull_request: &mut PullRequest) -> Result<()> {
        let settings = &self.context().endpoint.server;

        if settings.call_can_merge {
            let url = self.repo_url(["pull-requests", pull_request.id.as_str(), "merge"], &[])?;
            let merge: ServerMergeability = self.transport().get_json(&url).await?;
            pull_request.can_merge = Some(merge.can_merge && !merge.conflicted);
        }
        if settings.call_changes {
            let url = self.repo_url(
                ["pull-requests", pull_request.id.as_str(), "changes"],
                &[("limit", "1")],
            )?;
            let changes: ServerPage<serde_json::Value> = self.transport().get_json(&url).await?;
            pull_request.has_changes = Some(!changes.values.is_empty());
        }
        Ok(())
    }

    fn default_branch_url(&self) -> Result<Url> {
        if self.version() >= ServerVersion::V8 {
            self.repo_url(["default-branch"], &[])
        } else {
            self.repo_url(["branches", "default"], &[])
        }
    }

    fn hook_flavor(&self) -> HookFlavor {
        match self.context().endpoint.server.webhook_implementation {
            WebhookImplementation::Native => HookFlavor::ServerNative,
            WebhookImplementation::Plugin => HookFlavor::ServerPlugin,
        }
    }

    fn native_hooks_url<'a>(&'a self, id: Option<&'a str>, query: &[(&str, &str)]) -> Result<Url> {
        self.repo_url(["webhooks"].into_iter().chain(id), query)
    }
}

#[async_trait]
impl BitbucketApi for ServerClient {
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
        let url = self.default_branch_url()?;
        // Empty repositories answer 404 or 204 with no body.
        let body = match optional(self.transport().get_bytes(&url).await)? {
            Some(body) if !body.is_empty() => body,
            _ => {
                debug!("Default branch not discoverable");
                return Ok(None);
            }
        };

        let reference: ServerRef = decode(&url, &body)?;
        let _ = self.inner.default_branch.set(reference.display_id.clone());
        Ok(Some(reference.display_id))
    }

    async fn resolve_commit(&self, hash: &str) -> Result<Option<Commit>> {
        self.lookup_commit(hash).await
    }

    async fn get_branch(&self, name: &str) -> Result<Option<Branch>> {
        let resolver = self.commit_resolver();
        let refs = self.fetch_refs("branches", Some(name)).await?;
        Ok(refs
            .into_iter()
            .find(|r| r.display_id == name)
            .and_then(|r| self.to_branch(r, &resolver)))
    }

    #[instrument(skip(self), fields(owner = %self.owner()))]
    async fn get_branches(&self) -> Result<Vec<Branch>> {
        let resolver = self.commit_resolver();
        let refs = self.fetch_refs("branches", None).await?;
        Ok(refs
            .into_iter()
            .filter_map(|r| self.to_branch(r, &resolver))
            .filter(|b| b.active)
            .collect())
    }

    async fn get_tag(&self, name: &str) -> Result<Option<Tag>> {
        let url = self.repo_url(["tags", name], &[])?;
        let reference: Option<ServerRef> = optional(self.transport().get_json(&url).await)?;
        let resolver = self.commit_resolver();
        Ok(reference.and_then(|r| self.to_tag(r, &resolver)))
    }

    #[instrument(skip(self), fields(owner = %self.owner()))]
    async fn get_tags(&self) -> Result<Vec<Tag>> {
        let resolver = self.commit_resolver();
        let refs = self.fetch_refs("tags", None).await?;
        Ok(refs
            .into_iter()
            .filter_map(|r| self.to_tag(r, &resolver))
            .collect())
    }

    #[instrument(skip(self), fields(owner = %self.owner()))]
    async fn get_pull_requests(&self) -> Result<Vec<PullRequest>> {
        let mut pull_requests = self.list_open_pull_requests().await?;
        let settings = self.context().endpoint.server.clone();
        if !settings.call_can_merge && !settings.call_changes {
            return Ok(pull_requests);
        }

        for pull_request in pull_requests.iter_mut() {
            self.probe_pull_request(pull_request).await?;
        }

        // Workaround: on 7.x the changes probe can move pull request refs, so
        // the listing read before it may be stale. Read it once more and keep
        // the probe results.
        if settings.call_changes && settings.server_version == ServerVersion::V7 {
            debug!("Re-reading pull requests after changes probe");
            let probed: HashMap<String, (Option<bool>, Option<bool>)> = pull_requests
                .into_iter()
                .map(|pr| (pr.id, (pr.can_merge, pr.has_changes)))
                .collect();
            let mut refreshed = self.list_open_pull_requests().await?;
            for pull_request in refreshed.iter_mut() {
                if let Some((can_merge, has_changes)) = probed.get(&pull_request.id) {
                    pull_request.can_merge = *can_merge;
                    pull_request.has_changes = *has_changes;
                }
            }
            pull_requests = refreshed;
        }

        Ok(pull_requests)
    }

    async fn get_pull_request(&self, id: &str) -> Result<PullRequest> {
        let url = self.repo_url(["pull-requests", id], &[])?;
        let pull_request: ServerPullRequest = self.transport().get_json(&url).await?;
        let mut pull_request = pull_request.into_pull_request().ok_or_else(|| ApiError::Protocol {
            url: url.to_string(),
            message: format!("pull request {} has no complete source or destination", id),
        })?;
        self.probe_pull_request(&mut pull_request).await?;
        Ok(pull_request)
    }

    #[instrument(skip(self, status), fields(owner = %self.owner(), hash = %status.hash))]
    async fn post_build_status(&self, status: &BuildStatus) -> Result<()> {
        let key = bounded_key(&status.key);
        let name = bounded_name(&status.name);
        let url = self.url(
            ["rest", "build-status", "1.0", "commits", status.hash.as_str()],
            &[],
        )?;

        self.transport()
            .post_json(
                &url,
                &ServerBuildStatus::new(status, &key, &name, self.version()),
                false,
            )
            .await?;
        Ok(())
    }

    async fn check_path_exists(&self, reference: &str, path: &str) -> Result<bool> {
        let url = self.repo_url(
            ["browse"].into_iter().chain(urls::split_path(path)),
            &[("at", reference), ("type", "true")],
        )?;
        path_probe(&url, self.transport().get_status(&url).await?)
    }

    async fn get_file_content(&self, reference: &str, path: &str) -> Result<Bytes> {
        let url = self.repo_url(
            ["raw"].into_iter().chain(urls::split_path(path)),
            &[("at", reference)],
        )?;
        self.transport().get_bytes(&url).await
    }

    #[instrument(skip(self), fields(owner = %self.owner()))]
    async fn get_repositories(&self, role: Option<RepositoryRole>) -> Result<Vec<Repository>> {
        if role.is_some() {
            debug!("Role filter is not applied by Bitbucket Server listings");
        }
        let key = CacheKeyBuilder::new("repositories")
            .with("owner", &self.context().owner)
            .with("auth", self.context().auth_marker())
            .build();
        let client = self.clone();

        self.context()
            .caches
            .repositories
            .get(key, move || async move { client.fetch_repositories().await })
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
                let url = match client.user_slug() {
                    Some(slug) => client.api_url(["users", slug], &[])?,
                    None => client.api_url(["projects", client.owner()], &[])?,
                };
                let owner: ServerOwner = client.transport().get_json(&url).await?;
                Ok::<_, ApiError>(owner.into_team(client.owner()))
            })
            .await;
        optional(result)
    }

    async fn is_private(&self) -> Result<bool> {
        Ok(self.get_repository().await?.is_private)
    }

    async fn get_webhooks(&self) -> Result<Vec<WebhookDescriptor>> {
        match self.hook_flavor() {
            HookFlavor::ServerPlugin => {
                let url = self.plugin_url(NO_SEGMENTS)?;
                let hooks: Vec<PluginHook> = self.transport().get_json(&url).await?;
                Ok(hooks.into_iter().map(PluginHook::into_descriptor).collect())
            }
            _ => {
                let limit = page_size::SERVER_DEFAULT.to_string();
                let url = self.native_hooks_url(None, &[("limit", limit.as_str())])?;
                let hooks = fetch_all::<ServerPage<NativeHook>>(self.transport(), url).await?;
                Ok(hooks.into_iter().map(NativeHook::into_descriptor).collect())
            }
        }
    }

    #[instrument(skip(self, hook), fields(owner = %self.owner(), url = %hook.url))]
    async fn create_webhook(&self, hook: &WebhookDescriptor) -> Result<WebhookDescriptor> {
        let created = match hook.flavor {
            HookFlavor::ServerPlugin => {
                let url = self.plugin_url(NO_SEGMENTS)?;
                let body = self
                    .transport()
                    .post_json(&url, &PluginHook::from(hook), false)
                    .await?;
                decode::<PluginHook>(&url, &body)?.into_descriptor()
            }
            HookFlavor::ServerNative => {
                let url = self.native_hooks_url(None, &[])?;
                let body = self
                    .transport()
                    .post_json(&url, &NativeHook::from(hook), false)
                    .await?;
                decode::<NativeHook>(&url, &body)?.into_descriptor()
            }
            HookFlavor::Cloud => {
                return Err(ApiError::Configuration(
                    "cloud webhook cannot be created on a server endpoint".to_string(),
                ))
            }
        };
        info!(hook_id = %created.id, "Created webhook");
        Ok(created)
    }

    #[instrument(skip(self, hook), fields(owner = %self.owner(), hook_id = %hook.id))]
    async fn update_webhook(&self, hook: &WebhookDescriptor) -> Result<WebhookDescriptor> {
        let updated = match hook.flavor {
            HookFlavor::ServerPlugin => {
                let url = self.plugin_url([hook.id.as_str()])?;
                let body = self.transport().put_json(&url, &PluginHook::from(hook)).await?;
                decode::<PluginHook>(&url, &body)?.into_descriptor()
            }
            HookFlavor::ServerNative => {
                let url = self.native_hooks_url(Some(hook.id.as_str()), &[])?;
                let body = self.transport().put_json(&url, &NativeHook::from(hook)).await?;
                decode::<NativeHook>(&url, &body)?.into_descriptor()
            }
            HookFlavor::Cloud => {
                return Err(ApiError::Configuration(
                    "cloud webhook cannot be updated on a server endpoint".to_string(),
                ))
            }
        };
        info!("Updated webhook");
        Ok(updated)
    }

    #[instrument(skip(self), fields(owner = %self.owner()))]
    async fn remove_webhook(&self, id: &str) -> Result<()> {
        let url = match self.hook_flavor() {
            HookFlavor::ServerPlugin => self.plugin_url([id])?,
            _ => self.native_hooks_url(Some(id), &[])?,
        };
        if let Err(e) = self.transport().delete(&url).await {
            warn!(hook_id = %id, error = %e, "Failed to remove webhook");
            return Err(e);
        }
        info!(hook_id = %id, "Removed webhook");
        Ok(())
    }
}
