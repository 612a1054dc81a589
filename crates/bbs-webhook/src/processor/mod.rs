//! Webhook processors
//!
//! Each processor recognises one kind of delivery from its headers and
//! parameters, names the endpoint it claims to come from, and translates the
//! verified body. The registry picks the single most specific match.

mod cloud;
mod native;
mod plugin;

pub use cloud::{CloudPullRequestProcessor, CloudPushProcessor};
pub use native::{NativePingProcessor, NativePullRequestProcessor, NativePushProcessor};
pub use plugin::{PluginPullRequestProcessor, PluginPushProcessor};

use crate::request::WebhookRequest;
use crate::{Result, WebhookError};
use bbs_core::{NormalizedEvent, ReindexRequest};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

/// What a delivery amounts to once translated.
#[derive(Debug, Clone, PartialEq)]
pub enum Translation {
    Event(NormalizedEvent),
    /// A push without ref changes: rescan the whole repository.
    Reindex(ReindexRequest),
    Ping,
    /// Recognised but carries nothing to propagate.
    Ignored(String),
}

pub trait WebhookProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Number of distinguishing checks the request satisfies, or `None` when
    /// it is not meant for this processor.
    fn matches(&self, request: &WebhookRequest) -> Option<u8>;

    /// Normalized server URL of the endpoint the request claims to come from.
    fn server_url(&self, request: &WebhookRequest) -> Result<String>;

    /// Ping deliveries are accepted unsigned.
    fn requires_signature(&self) -> bool {
        true
    }

    /// Translate a verified request. `origin` is the resolved server URL.
    fn translate(&self, request: &WebhookRequest, origin: &str) -> Result<Translation>;
}

pub(crate) fn parse_body<T: DeserializeOwned>(request: &WebhookRequest) -> Result<T> {
    Ok(serde_json::from_slice(request.body())?)
}

/// Static list of processors queried for every delivery.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: Vec<Arc<dyn WebhookProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cloud, native server and plugin processors.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CloudPushProcessor));
        registry.register(Arc::new(CloudPullRequestProcessor));
        registry.register(Arc::new(NativePushProcessor));
        registry.register(Arc::new(NativePullRequestProcessor));
        registry.register(Arc::new(NativePingProcessor));
        registry.register(Arc::new(PluginPushProcessor));
        registry.register(Arc::new(PluginPullRequestProcessor));
        registry
    }

    pub fn register(&mut self, processor: Arc<dyn WebhookProcessor>) {
        debug!(processor = processor.name(), "Registering webhook processor");
        self.processors.push(processor);
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// The single most specific processor for `request`.
    pub fn select(&self, request: &WebhookRequest) -> Result<Arc<dyn WebhookProcessor>> {
        let candidates: Vec<(u8, &Arc<dyn WebhookProcessor>)> = self
            .processors
            .iter()
            .filter_map(|p| p.matches(request).map(|score| (score, p)))
            .collect();

        let Some(best) = candidates.iter().map(|(score, _)| *score).max() else {
            return Err(WebhookError::NoProcessor(
                request.event_key().unwrap_or("<none>").to_string(),
            ));
        };

        let winners: Vec<&Arc<dyn WebhookProcessor>> = candidates
            .iter()
            .filter(|(score, _)| *score == best)
            .map(|(_, p)| *p)
            .collect();
        if winners.len() > 1 {
            let names: Vec<&str> = winners.iter().map(|p| p.name()).collect();
            return Err(WebhookError::AmbiguousProcessor(names.join(", ")));
        }

        for (score, dropped) in candidates.iter().filter(|(score, _)| *score < best) {
            warn!(
                processor = dropped.name(),
                score = *score,
                winner = winners[0].name(),
                "Dropping less specific processor"
            );
        }
        Ok(Arc::clone(winners[0]))
    }
}
