//! The backend-neutral API surface and client construction.

use crate::auth::authenticator_for;
use crate::caches::EndpointCaches;
use crate::cloud::CloudClient;
use crate::error::{ApiError, Result};
use crate::models::{
    Branch, BuildStatus, Commit, PullRequest, Repository, RepositoryRole, Tag, Team,
    WebhookDescriptor,
};
use crate::server::ServerClient;
use crate::transport::{AuthenticatedTransport, ConnectionPool};
use async_trait::async_trait;
use bbs_core::{
    BackendKind, CacheSettings, ConnectorConfig, CredentialProvider, Endpoint, TransportConfig,
};
use bbs_infra::{RetryConfig, RetryPolicy};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Operations both backends provide, differing only in wire format.
#[async_trait]
pub trait BitbucketApi: Send + Sync {
    fn endpoint(&self) -> &Endpoint;

    /// Workspace, project key or `~user`.
    fn owner(&self) -> &str;

    /// Repository slug; `None` for owner-level clients.
    fn repository_name(&self) -> Option<&str>;

    /// Fails with `NotFound` when the repository does not exist.
    async fn get_repository(&self) -> Result<Repository>;

    /// `None` when the default branch cannot be determined, e.g. in an empty
    /// repository.
    async fn get_default_branch(&self) -> Result<Option<String>>;

    /// `None` when the commit is unknown.
    async fn resolve_commit(&self, hash: &str) -> Result<Option<Commit>>;

    async fn get_branch(&self, name: &str) -> Result<Option<Branch>>;

    /// Active branches only.
    async fn get_branches(&self) -> Result<Vec<Branch>>;

    async fn get_tag(&self, name: &str) -> Result<Option<Tag>>;

    async fn get_tags(&self) -> Result<Vec<Tag>>;

    /// Open pull requests with complete source and destination.
    async fn get_pull_requests(&self) -> Result<Vec<PullRequest>>;

    async fn get_pull_request(&self, id: &str) -> Result<PullRequest>;

    /// Single attempt; failures surface immediately.
    async fn post_build_status(&self, status: &BuildStatus) -> Result<()>;

    /// `false` for a missing path and for a path the credentials may not read.
    async fn check_path_exists(&self, reference: &str, path: &str) -> Result<bool>;

    async fn get_file_content(&self, reference: &str, path: &str) -> Result<Bytes>;

    /// Owner-level listing, sorted by name, archived repositories excluded.
    async fn get_repositories(&self, role: Option<RepositoryRole>) -> Result<Vec<Repository>>;

    /// Workspace, project or user behind the owner; `None` when unknown.
    async fn get_team(&self) -> Result<Option<Team>>;

    async fn is_private(&self) -> Result<bool>;

    async fn get_webhooks(&self) -> Result<Vec<WebhookDescriptor>>;

    async fn create_webhook(&self, hook: &WebhookDescriptor) -> Result<WebhookDescriptor>;

    async fn update_webhook(&self, hook: &WebhookDescriptor) -> Result<WebhookDescriptor>;

    async fn remove_webhook(&self, id: &str) -> Result<()>;
}

/// What a client is scoped to.
pub struct ClientContext {
    pub endpoint: Arc<Endpoint>,
    pub owner: String,
    pub repository: Option<String>,
    pub transport: AuthenticatedTransport,
    pub caches: EndpointCaches,
}

impl ClientContext {
    pub(crate) fn repository(&self) -> Result<&str> {
        self.repository.as_deref().ok_or_else(|| {
            ApiError::Configuration(format!(
                "client for '{}' is not scoped to a repository",
                self.owner
            ))
        })
    }

    /// Cache key marker distinguishing anonymous from authenticated listings.
    pub(crate) fn auth_marker(&self) -> &str {
        self.transport
            .authenticator()
            .credentials_id()
            .unwrap_or("anonymous")
    }
}

/// Builds short-lived clients on top of long-lived pools and caches.
pub struct ClientFactory {
    credentials: Arc<dyn CredentialProvider>,
    transport: TransportConfig,
    retry: RetryConfig,
    pools: DashMap<BackendKind, Arc<ConnectionPool>>,
    caches: DashMap<String, (CacheSettings, EndpointCaches)>,
}

impl ClientFactory {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            credentials,
            transport: TransportConfig::default(),
            retry: RetryConfig::default(),
            pools: DashMap::new(),
            caches: DashMap::new(),
        }
    }

    pub fn from_config(config: &ConnectorConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self::new(credentials)
            .with_transport_config(config.transport.clone())
            .with_retry(RetryConfig::from(&config.retry))
    }

    pub fn with_transport_config(mut self, config: TransportConfig) -> Self {
        self.transport = config;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Use `pool` instead of the process-wide pool for its backend kind.
    pub fn with_pool(self, pool: Arc<ConnectionPool>) -> Self {
        self.pools.insert(pool.kind(), pool);
        self
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialProvider> {
        &self.credentials
    }

    /// Caches for an endpoint; rebuilt when its cache settings change.
    pub fn caches(&self, endpoint: &Endpoint) -> EndpointCaches {
        let mut entry = self
            .caches
            .entry(endpoint.server_url().to_string())
            .or_insert_with(|| (endpoint.cache.clone(), EndpointCaches::for_endpoint(endpoint)));
        if entry.0 != endpoint.cache {
            debug!(server_url = %endpoint.server_url(), "Cache settings changed, rebuilding caches");
            *entry = (endpoint.cache.clone(), EndpointCaches::for_endpoint(endpoint));
        }
        entry.1.clone()
    }

    pub fn evict_all_caches(&self) {
        for entry in self.caches.iter() {
            entry.value().1.evict_all();
        }
    }

    fn pool(&self, kind: BackendKind) -> Result<Arc<ConnectionPool>> {
        if let Some(pool) = self.pools.get(&kind) {
            return Ok(Arc::clone(pool.value()));
        }
        ConnectionPool::shared(kind, &self.transport)
    }

    fn context(
        &self,
        endpoint: Arc<Endpoint>,
        owner: &str,
        repository: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<ClientContext> {
        let authenticator = authenticator_for(&endpoint, self.credentials.as_ref())?;
        let transport = AuthenticatedTransport::new(
            self.pool(endpoint.kind())?,
            authenticator,
            RetryPolicy::new(self.retry.clone()),
        )
        .with_cancellation(cancel);

        Ok(ClientContext {
            caches: self.caches(&endpoint),
            endpoint,
            owner: owner.to_string(),
            repository: repository.map(str::to_string),
            transport,
        })
    }

    /// Client scoped to one repository.
    pub fn repository_client(
        &self,
        endpoint: Arc<Endpoint>,
        owner: &str,
        repository: &str,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn BitbucketApi>> {
        let context = self.context(endpoint, owner, Some(repository), cancel)?;
        build(context)
    }

    /// Client for owner-level operations (repository listing, team lookup).
    pub fn owner_client(
        &self,
        endpoint: Arc<Endpoint>,
        owner: &str,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn BitbucketApi>> {
        let context = self.context(endpoint, owner, None, cancel)?;
        build(context)
    }
}

fn build(context: ClientContext) -> Result<Arc<dyn BitbucketApi>> {
    debug!(
        server_url = %context.endpoint.server_url(),
        owner = %context.owner,
        repo = ?context.repository,
        "Creating API client"
    );
    let client: Arc<dyn BitbucketApi> = match context.endpoint.kind() {
        BackendKind::Cloud => Arc::new(CloudClient::new(context)?),
        BackendKind::Server => Arc::new(ServerClient::new(context)?),
    };
    Ok(client)
}
