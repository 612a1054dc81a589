//! Configured Bitbucket backends.
//!
//! An [`Endpoint`] is identified by its normalized server URL. The
//! [`EndpointRegistry`] hands out immutable snapshots; configuration updates
//! replace the whole list at once.

use crate::config::EndpointConfig;
use crate::{CoreError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use url::Url;

/// Public server URL of Bitbucket Cloud.
pub const CLOUD_SERVER_URL: &str = "https://bitbucket.org";

/// REST API host of Bitbucket Cloud.
pub const CLOUD_API_URL: &str = "https://api.bitbucket.org";

/// Normalize a server URL so that equivalent spellings map to one endpoint.
///
/// Scheme and host are lower-cased, default ports are dropped and trailing
/// slashes are removed. Query and fragment are discarded.
pub fn normalize_server_url(raw: &str) -> Result<String> {
    let invalid = |reason: &str| CoreError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let parsed = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
    let host = parsed.host_str().ok_or_else(|| invalid("missing host"))?;

    // `Url` already lower-cases the scheme and host and hides default ports.
    let mut normalized = format!("{}://{}", parsed.scheme(), host.to_lowercase());
    if let Some(port) = parsed.port() {
        normalized.push_str(&format!(":{}", port));
    }
    normalized.push_str(parsed.path().trim_end_matches('/'));

    Ok(normalized)
}

/// Backend flavour behind an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Cloud,
    Server,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cloud => "cloud",
            Self::Server => "server",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which webhook implementation a Bitbucket Server instance uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookImplementation {
    /// "Post Webhooks for Bitbucket" add-on.
    Plugin,
    /// Built-in webhooks.
    #[default]
    Native,
}

/// Bitbucket Server release line, as far as wire behaviour differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerVersion {
    V5_10,
    V6,
    V7,
    #[default]
    V8,
}

impl ServerVersion {
    /// `pr:from_ref_updated` exists from 7.0 on.
    pub fn supports_from_ref_updated(&self) -> bool {
        *self >= ServerVersion::V7
    }
}

/// Response cache policy of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub enabled: bool,
    pub team_ttl: Duration,
    pub repositories_ttl: Duration,
    pub commits_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            team_ttl: Duration::from_secs(360 * 60),
            repositories_ttl: Duration::from_secs(180 * 60),
            commits_ttl: Duration::from_secs(60 * 60),
        }
    }
}

/// Bitbucket Server specific behaviour toggles.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerSettings {
    pub webhook_implementation: WebhookImplementation,
    pub call_can_merge: bool,
    pub call_changes: bool,
    pub server_version: ServerVersion,
}

/// A configured Bitbucket backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    server_url: String,
    kind: BackendKind,
    /// Credentials used for API calls; `None` means anonymous access.
    pub credentials_id: Option<String>,
    /// Whether hooks are registered and removed automatically.
    pub manage_hooks: bool,
    /// Secret credential used to sign (and verify) webhook payloads.
    pub hook_signature_credentials_id: Option<String>,
    pub cache: CacheSettings,
    /// Cloud API host override.
    pub api_url: Option<String>,
    /// Callback root override for this endpoint only.
    pub root_url: Option<String>,
    pub server: ServerSettings,
}

impl Endpoint {
    /// The Bitbucket Cloud endpoint.
    pub fn cloud() -> Self {
        Self {
            server_url: CLOUD_SERVER_URL.to_string(),
            kind: BackendKind::Cloud,
            credentials_id: None,
            manage_hooks: false,
            hook_signature_credentials_id: None,
            cache: CacheSettings::default(),
            api_url: None,
            root_url: None,
            server: ServerSettings::default(),
        }
    }

    /// A Bitbucket Server endpoint at `server_url`.
    pub fn server(server_url: &str) -> Result<Self> {
        Ok(Self {
            server_url: normalize_server_url(server_url)?,
            kind: BackendKind::Server,
            ..Self::cloud()
        })
    }

    /// Build an endpoint from its persisted configuration.
    pub fn from_config(config: &EndpointConfig) -> Result<Self> {
        let mut endpoint = match config.kind {
            BackendKind::Cloud => Self::cloud(),
            BackendKind::Server => Self::server(&config.server_url)?,
        };

        endpoint.credentials_id = config.credentials_id.clone();
        endpoint.manage_hooks = config.manage_hooks;
        endpoint.hook_signature_credentials_id = config.hook_signature_credentials_id.clone();
        endpoint.cache = CacheSettings {
            enabled: config.enable_cache,
            team_ttl: Duration::from_secs(config.team_cache_minutes * 60),
            repositories_ttl: Duration::from_secs(config.repositories_cache_minutes * 60),
            commits_ttl: Duration::from_secs(config.commits_cache_minutes * 60),
        };
        endpoint.api_url = config.api_url.clone();
        endpoint.root_url = config.root_url.clone();
        endpoint.server = ServerSettings {
            webhook_implementation: config.webhook_implementation,
            call_can_merge: config.call_can_merge,
            call_changes: config.call_changes,
            server_version: config.server_version,
        };

        Ok(endpoint)
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn is_cloud(&self) -> bool {
        self.kind == BackendKind::Cloud
    }

    /// Base URL REST calls are made against.
    pub fn api_base_url(&self) -> &str {
        match self.kind {
            BackendKind::Cloud => self
                .api_url
                .as_deref()
                .unwrap_or(CLOUD_API_URL)
                .trim_end_matches('/'),
            BackendKind::Server => &self.server_url,
        }
    }

    pub fn is_hook_signature_enabled(&self) -> bool {
        self.hook_signature_credentials_id.is_some()
    }

    pub fn with_credentials(mut self, credentials_id: &str) -> Self {
        self.credentials_id = Some(credentials_id.to_string());
        self
    }

    pub fn with_manage_hooks(mut self, manage: bool) -> Self {
        self.manage_hooks = manage;
        self
    }

    pub fn with_hook_signature(mut self, credentials_id: &str) -> Self {
        self.hook_signature_credentials_id = Some(credentials_id.to_string());
        self
    }

    pub fn with_cache(mut self, cache: CacheSettings) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = Some(api_url.to_string());
        self
    }

    pub fn with_root_url(mut self, root_url: &str) -> Self {
        self.root_url = Some(root_url.to_string());
        self
    }

    pub fn with_server_settings(mut self, server: ServerSettings) -> Self {
        self.server = server;
        self
    }
}

/// Lookup table of endpoints keyed by normalized server URL.
pub struct EndpointRegistry {
    endpoints: RwLock<Arc<HashMap<String, Arc<Endpoint>>>>,
}

impl EndpointRegistry {
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self> {
        Ok(Self {
            endpoints: RwLock::new(Arc::new(Self::index(endpoints)?)),
        })
    }

    pub fn from_config(configs: &[EndpointConfig]) -> Result<Self> {
        let endpoints = configs
            .iter()
            .map(Endpoint::from_config)
            .collect::<Result<Vec<_>>>()?;
        Self::new(endpoints)
    }

    fn index(endpoints: Vec<Endpoint>) -> Result<HashMap<String, Arc<Endpoint>>> {
        let mut map = HashMap::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let key = endpoint.server_url.clone();
            if map.insert(key.clone(), Arc::new(endpoint)).is_some() {
                return Err(CoreError::DuplicateEndpoint(key));
            }
        }
        Ok(map)
    }

    /// Find the endpoint serving `server_url`, in any spelling.
    pub fn find(&self, server_url: &str) -> Option<Arc<Endpoint>> {
        let key = normalize_server_url(server_url).ok()?;
        self.endpoints.read().get(&key).cloned()
    }

    /// The Bitbucket Cloud endpoint, if configured.
    pub fn cloud(&self) -> Option<Arc<Endpoint>> {
        self.find(CLOUD_SERVER_URL)
    }

    pub fn list(&self) -> Vec<Arc<Endpoint>> {
        let mut all: Vec<_> = self.endpoints.read().values().cloned().collect();
        all.sort_by(|a, b| a.server_url.cmp(&b.server_url));
        all
    }

    /// Replace every endpoint at once. On error the previous list stays.
    pub fn replace_all(&self, endpoints: Vec<Endpoint>) -> Result<()> {
        let index = Self::index(endpoints)?;
        info!(count = index.len(), "Replacing endpoint configuration");
        *self.endpoints.write() = Arc::new(index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_server_url() {
        assert_eq!(
            normalize_server_url("HTTPS://Bitbucket.Example.COM:443/").unwrap(),
            "https://bitbucket.example.com"
        );
        assert_eq!(
            normalize_server_url("http://host:80/bitbucket//").unwrap(),
            "http://host/bitbucket"
        );
        assert_eq!(
            normalize_server_url("http://host:7990").unwrap(),
            "http://host:7990"
        );
        assert!(normalize_server_url("not a url").is_err());
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let a = Endpoint::server("https://git.example.com/").unwrap();
        let b = Endpoint::server("https://GIT.example.com:443").unwrap();
        let result = EndpointRegistry::new(vec![a, b]);
        assert!(matches!(result, Err(CoreError::DuplicateEndpoint(_))));
    }

    #[test]
    fn test_registry_find_and_replace() {
        let registry = EndpointRegistry::new(vec![
            Endpoint::cloud(),
            Endpoint::server("https://git.example.com").unwrap(),
        ])
        .unwrap();

        let found = registry.find("https://git.example.com:443/").unwrap();
        assert_eq!(found.kind(), BackendKind::Server);
        assert!(registry.cloud().is_some());

        registry
            .replace_all(vec![Endpoint::server("https://other.example.com").unwrap()])
            .unwrap();
        assert!(registry.find("https://git.example.com").is_none());
        assert!(registry.cloud().is_none());
        // Snapshots taken before the swap remain usable.
        assert_eq!(found.server_url(), "https://git.example.com");
    }

    #[test]
    fn test_api_base_url() {
        assert_eq!(Endpoint::cloud().api_base_url(), CLOUD_API_URL);
        let cloud = Endpoint::cloud().with_api_url("http://127.0.0.1:9000/");
        assert_eq!(cloud.api_base_url(), "http://127.0.0.1:9000");
        let server = Endpoint::server("http://git.local:7990/").unwrap();
        assert_eq!(server.api_base_url(), "http://git.local:7990");
    }

    #[test]
    fn test_server_version_ordering() {
        assert!(!ServerVersion::V6.supports_from_ref_updated());
        assert!(ServerVersion::V7.supports_from_ref_updated());
        assert!(ServerVersion::default().supports_from_ref_updated());
    }
}
