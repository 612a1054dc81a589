//! Per-endpoint response caches.

use crate::error::ApiError;
use crate::models::{Commit, Repository, Team};
use bbs_core::Endpoint;
use bbs_infra::{MemoryCacheConfig, ResponseCache};

pub type TeamCache = ResponseCache<String, Team, ApiError>;
pub type RepositoryListCache = ResponseCache<String, Vec<Repository>, ApiError>;
pub type CommitCache = ResponseCache<String, Commit, ApiError>;

/// The caches of one endpoint, built from its cache settings.
///
/// Clients are short-lived; these outlive them and are shared by every
/// client created for the same endpoint.
#[derive(Clone)]
pub struct EndpointCaches {
    pub team: TeamCache,
    pub repositories: RepositoryListCache,
    pub commits: CommitCache,
}

impl EndpointCaches {
    pub fn for_endpoint(endpoint: &Endpoint) -> Self {
        let settings = &endpoint.cache;
        Self {
            team: ResponseCache::new(
                MemoryCacheConfig::new("team", settings.team_ttl).with_enabled(settings.enabled),
            ),
            repositories: ResponseCache::new(
                MemoryCacheConfig::new("repositories", settings.repositories_ttl)
                    .with_max_entries(1_000)
                    .with_enabled(settings.enabled),
            ),
            commits: ResponseCache::new(
                MemoryCacheConfig::new("commits", settings.commits_ttl)
                    .with_enabled(settings.enabled),
            ),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.commits.config().enabled
    }

    pub fn evict_all(&self) {
        self.team.evict_all();
        self.repositories.evict_all();
        self.commits.evict_all();
    }
}
