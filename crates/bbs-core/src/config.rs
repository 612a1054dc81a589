use crate::credentials::CredentialEntry;
use crate::endpoint::{BackendKind, ServerVersion, WebhookImplementation, CLOUD_SERVER_URL};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Main connector configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorConfig {
    /// Public root URL of this CI instance; webhook callbacks are built from it.
    pub root_url: String,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub credentials: Vec<CredentialEntry>,
    #[serde(default)]
    pub hooks: HookProcessingConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl ConnectorConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_env("BBS")
    }

    /// Load configuration from environment with custom prefix
    pub fn load_from_env(prefix: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(
                Environment::with_prefix(prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("root_url", "http://localhost:8080/")?
            .set_default("hooks.delay_seconds", 5)?
            .set_default("hooks.skip_reindex_on_empty_changes", false)?;

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load configuration from file with environment overrides
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("BBS").separator("__"));

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Callback root with exactly one trailing slash.
    pub fn normalized_root_url(&self) -> String {
        format!("{}/", self.root_url.trim_end_matches('/'))
    }
}

/// Persisted endpoint record
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    pub kind: BackendKind,
    #[serde(default)]
    pub credentials_id: Option<String>,
    #[serde(default)]
    pub manage_hooks: bool,
    #[serde(default)]
    pub hook_signature_credentials_id: Option<String>,
    #[serde(default)]
    pub enable_cache: bool,
    #[serde(default = "default_team_cache_minutes")]
    pub team_cache_minutes: u64,
    #[serde(default = "default_repositories_cache_minutes")]
    pub repositories_cache_minutes: u64,
    #[serde(default = "default_commits_cache_minutes")]
    pub commits_cache_minutes: u64,
    #[serde(default)]
    pub webhook_implementation: WebhookImplementation,
    #[serde(default)]
    pub call_can_merge: bool,
    #[serde(default)]
    pub call_changes: bool,
    #[serde(default)]
    pub server_version: ServerVersion,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub root_url: Option<String>,
}

impl EndpointConfig {
    pub fn cloud() -> Self {
        Self::new(BackendKind::Cloud, CLOUD_SERVER_URL)
    }

    pub fn server(server_url: &str) -> Self {
        Self::new(BackendKind::Server, server_url)
    }

    fn new(kind: BackendKind, server_url: &str) -> Self {
        Self {
            server_url: server_url.to_string(),
            kind,
            credentials_id: None,
            manage_hooks: false,
            hook_signature_credentials_id: None,
            enable_cache: false,
            team_cache_minutes: default_team_cache_minutes(),
            repositories_cache_minutes: default_repositories_cache_minutes(),
            commits_cache_minutes: default_commits_cache_minutes(),
            webhook_implementation: WebhookImplementation::default(),
            call_can_merge: false,
            call_changes: false,
            server_version: ServerVersion::default(),
            api_url: None,
            root_url: None,
        }
    }

    pub fn with_credentials(mut self, credentials_id: &str) -> Self {
        self.credentials_id = Some(credentials_id.to_string());
        self
    }

    pub fn with_manage_hooks(mut self, manage: bool) -> Self {
        self.manage_hooks = manage;
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.enable_cache = enabled;
        self
    }
}

fn default_server_url() -> String {
    CLOUD_SERVER_URL.to_string()
}

fn default_team_cache_minutes() -> u64 {
    360
}

fn default_repositories_cache_minutes() -> u64 {
    180
}

fn default_commits_cache_minutes() -> u64 {
    60
}

/// Inbound webhook processing
#[derive(Debug, Clone, Deserialize)]
pub struct HookProcessingConfig {
    /// Seconds to wait before propagating a translated event.
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: u64,
    /// When set, pushes without ref changes do not trigger a re-index.
    #[serde(default)]
    pub skip_reindex_on_empty_changes: bool,
}

impl HookProcessingConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }

    pub fn with_delay_seconds(mut self, seconds: u64) -> Self {
        self.delay_seconds = seconds;
        self
    }

    pub fn with_skip_reindex_on_empty_changes(mut self, skip: bool) -> Self {
        self.skip_reindex_on_empty_changes = skip;
        self
    }
}

impl Default for HookProcessingConfig {
    fn default() -> Self {
        Self {
            delay_seconds: default_delay_seconds(),
            skip_reindex_on_empty_changes: false,
        }
    }
}

fn default_delay_seconds() -> u64 {
    5
}

/// HTTP transport and connection pool limits
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_socket_timeout_seconds")]
    pub socket_timeout_seconds: u64,
    #[serde(default = "default_max_per_route")]
    pub max_connections_per_route: usize,
    #[serde(default = "default_max_total")]
    pub max_connections_total: usize,
    #[serde(default = "default_idle_reclaim_seconds")]
    pub idle_reclaim_seconds: u64,
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_seconds)
    }

    pub fn idle_reclaim(&self) -> Duration {
        Duration::from_secs(self.idle_reclaim_seconds)
    }

    pub fn with_pool_limits(mut self, per_route: usize, total: usize) -> Self {
        self.max_connections_per_route = per_route;
        self.max_connections_total = total;
        self
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: default_connect_timeout_seconds(),
            socket_timeout_seconds: default_socket_timeout_seconds(),
            max_connections_per_route: default_max_per_route(),
            max_connections_total: default_max_total(),
            idle_reclaim_seconds: default_idle_reclaim_seconds(),
        }
    }
}

fn default_connect_timeout_seconds() -> u64 {
    10
}

fn default_socket_timeout_seconds() -> u64 {
    60
}

fn default_max_per_route() -> usize {
    10
}

fn default_max_total() -> usize {
    22
}

fn default_idle_reclaim_seconds() -> u64 {
    5
}

/// Backoff parameters for retried requests
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_retry_rate")]
    pub rate: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_seconds")]
    pub max_delay_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            rate: default_retry_rate(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_seconds: default_max_delay_seconds(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_retry_rate() -> u32 {
    10
}

fn default_initial_delay_ms() -> u64 {
    6_000
}

fn default_max_delay_seconds() -> u64 {
    86_400
}

fn default_max_retries() -> u32 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn parse(toml: &str) -> ConnectorConfig {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let config = parse(r#"root_url = "https://ci.example.com""#);

        assert!(config.endpoints.is_empty());
        assert_eq!(config.hooks.delay_seconds, 5);
        assert!(!config.hooks.skip_reindex_on_empty_changes);
        assert_eq!(config.transport.max_connections_per_route, 10);
        assert_eq!(config.transport.max_connections_total, 22);
        assert_eq!(config.retry.rate, 10);
        assert_eq!(config.retry.initial_delay_ms, 6_000);
        assert_eq!(config.retry.max_delay_seconds, 86_400);
        assert_eq!(config.normalized_root_url(), "https://ci.example.com/");
    }

    #[test]
    fn test_endpoints_parsed() {
        let config = parse(
            r#"
            root_url = "https://ci.example.com/"

            [[endpoints]]
            kind = "cloud"
            manage_hooks = true
            enable_cache = true

            [[endpoints]]
            kind = "server"
            server_url = "https://git.example.com"
            webhook_implementation = "plugin"
            call_changes = true
            server_version = "v7"
            "#,
        );

        assert_eq!(config.endpoints.len(), 2);
        let cloud = &config.endpoints[0];
        assert_eq!(cloud.kind, BackendKind::Cloud);
        assert_eq!(cloud.server_url, CLOUD_SERVER_URL);
        assert!(cloud.manage_hooks);
        assert_eq!(cloud.team_cache_minutes, 360);

        let server = &config.endpoints[1];
        assert_eq!(server.webhook_implementation, WebhookImplementation::Plugin);
        assert_eq!(server.server_version, ServerVersion::V7);
        assert!(server.call_changes);
        assert!(!server.call_can_merge);
    }

    #[test]
    fn test_endpoint_config_builders() {
        let config = EndpointConfig::server("https://git.example.com")
            .with_credentials("bb-creds")
            .with_manage_hooks(true)
            .with_cache(true);

        assert_eq!(config.kind, BackendKind::Server);
        assert_eq!(config.credentials_id.as_deref(), Some("bb-creds"));
        assert!(config.manage_hooks);
        assert!(config.enable_cache);
    }
}
