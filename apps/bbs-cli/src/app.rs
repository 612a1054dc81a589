//! Shared wiring for every command

use anyhow::{anyhow, Context, Result};
use bbs_client::ClientFactory;
use bbs_core::{ConnectorConfig, Endpoint, EndpointRegistry, InMemoryCredentials};
use bbs_webhook::{
    ChannelSink, LoggingListener, Propagated, ProcessorRegistry, WebhookDispatcher, WebhookManager,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::Args;

pub struct App {
    pub config: ConnectorConfig,
    pub credentials: Arc<InMemoryCredentials>,
    pub endpoints: Arc<EndpointRegistry>,
    pub factory: ClientFactory,
    server_url: String,
}

impl App {
    pub fn build(args: &Args) -> Result<Self> {
        let config = if args.config.exists() {
            let path = args.config.to_string_lossy();
            ConnectorConfig::load_from_file(&path)
                .with_context(|| format!("Failed to load configuration from {}", path))?
        } else {
            warn!(path = %args.config.display(), "Configuration file not found, using environment");
            ConnectorConfig::load().context("Failed to load configuration from environment")?
        };

        let credentials = Arc::new(InMemoryCredentials::from_entries(
            config.credentials.iter().cloned(),
        ));
        let endpoints = Arc::new(
            EndpointRegistry::from_config(&config.endpoints)
                .context("Invalid endpoint configuration")?,
        );
        let factory = ClientFactory::from_config(&config, credentials.clone());

        info!(
            endpoints = endpoints.list().len(),
            root_url = %config.root_url,
            "Loaded configuration"
        );

        Ok(Self {
            config,
            credentials,
            endpoints,
            factory,
            server_url: args.server_url.clone(),
        })
    }

    /// The endpoint selected with `--server-url`.
    pub fn endpoint(&self) -> Result<Arc<Endpoint>> {
        self.endpoints
            .find(&self.server_url)
            .ok_or_else(|| anyhow!("No endpoint configured for {}", self.server_url))
    }

    pub fn manager(&self) -> WebhookManager {
        WebhookManager::from_config(&self.config, self.credentials.clone())
    }

    /// Dispatcher whose events land on the returned channel.
    pub fn dispatcher(&self) -> (WebhookDispatcher, mpsc::Receiver<Propagated>) {
        let (sink, receiver) = ChannelSink::new(256);
        let dispatcher = WebhookDispatcher::new(
            ProcessorRegistry::standard(),
            self.endpoints.clone(),
            self.credentials.clone(),
            self.config.hooks.clone(),
            Arc::new(sink),
        );
        dispatcher.add_listener(Arc::new(LoggingListener));
        (dispatcher, receiver)
    }
}

/// Token cancelled on Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    token
}

/// Propagated work as a JSON document.
pub fn render(work: &Propagated) -> Result<String> {
    let value = match work {
        Propagated::Event(event) => serde_json::json!({ "event": event }),
        Propagated::Reindex(request) => serde_json::json!({ "reindex": request }),
    };
    serde_json::to_string_pretty(&value).context("Failed to render event")
}
