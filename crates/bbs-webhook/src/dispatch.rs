//! Inbound webhook dispatch
//!
//! select -> resolve endpoint -> verify -> translate -> schedule. The
//! dispatcher returns as soon as propagation is scheduled.

use crate::listener::WebhookListener;
use crate::processor::{ProcessorRegistry, Translation, WebhookProcessor};
use crate::propagation::{EventSink, Propagated, Propagator};
use crate::request::WebhookRequest;
use crate::signature::{hook_secret, WebhookVerifier, SIGNATURE_HEADER};
use crate::{Result, WebhookError};
use bbs_core::{
    ChangeType, CredentialProvider, EndpointRegistry, HookProcessingConfig, RepositoryRef,
};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What a delivery led to.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Event {
        processor: &'static str,
        event_key: String,
        origin: String,
        repository: RepositoryRef,
        change_type: ChangeType,
        heads: usize,
        delay: Duration,
    },
    Reindex {
        processor: &'static str,
        origin: String,
        repository: RepositoryRef,
        delay: Duration,
    },
    /// Empty push while re-indexing on empty pushes is switched off.
    ReindexSkipped {
        processor: &'static str,
        repository: RepositoryRef,
    },
    Ping {
        processor: &'static str,
    },
    Ignored {
        processor: &'static str,
        reason: String,
    },
}

pub struct WebhookDispatcher {
    registry: ProcessorRegistry,
    endpoints: Arc<EndpointRegistry>,
    credentials: Arc<dyn CredentialProvider>,
    hooks: HookProcessingConfig,
    propagator: Propagator,
    listeners: RwLock<Vec<Arc<dyn WebhookListener>>>,
}

impl WebhookDispatcher {
    pub fn new(
        registry: ProcessorRegistry,
        endpoints: Arc<EndpointRegistry>,
        credentials: Arc<dyn CredentialProvider>,
        hooks: HookProcessingConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            registry,
            endpoints,
            credentials,
            hooks,
            propagator: Propagator::new(sink),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn WebhookListener>) {
        self.listeners.write().push(listener);
    }

    /// Process one delivery. Listeners hear about both outcomes.
    pub fn dispatch(&self, request: &WebhookRequest) -> Result<DispatchOutcome> {
        let result = self.process(request);
        let listeners = self.listeners.read().clone();
        match &result {
            Ok(outcome) => {
                for listener in &listeners {
                    listener.on_processed(outcome);
                }
            }
            Err(error) => {
                warn!(
                    kind = error.kind(),
                    event_key = request.event_key().unwrap_or("<none>"),
                    error = %error,
                    "Rejected webhook"
                );
                for listener in &listeners {
                    listener.on_failure(error, request);
                }
            }
        }
        result
    }

    fn process(&self, request: &WebhookRequest) -> Result<DispatchOutcome> {
        let processor = self.registry.select(request)?;
        let server_url = processor.server_url(request)?;
        let endpoint = self
            .endpoints
            .find(&server_url)
            .ok_or_else(|| WebhookError::UnknownEndpoint(server_url.clone()))?;

        if processor.requires_signature() {
            if let Some(secret) = hook_secret(self.credentials.as_ref(), &endpoint)? {
                WebhookVerifier::new(&secret)
                    .verify(request.body(), request.header(SIGNATURE_HEADER))?;
                debug!(server_url = %server_url, "Webhook signature verified");
            }
        }

        let translation = processor.translate(request, endpoint.server_url())?;
        Ok(self.schedule(processor.as_ref(), translation))
    }

    fn schedule(&self, processor: &dyn WebhookProcessor, translation: Translation) -> DispatchOutcome {
        let delay = self.hooks.delay();
        let name = processor.name();

        match translation {
            Translation::Event(event) => {
                let outcome = DispatchOutcome::Event {
                    processor: name,
                    event_key: event.event_key().to_string(),
                    origin: event.origin().to_string(),
                    repository: event.repository().clone(),
                    change_type: event.change_type(),
                    heads: event.heads().len(),
                    delay,
                };
                info!(
                    processor = name,
                    event_key = event.event_key(),
                    repo = %event.repository().full_name(),
                    change_type = event.change_type().as_str(),
                    "Scheduling webhook event"
                );
                self.propagator.schedule(Propagated::Event(event), delay);
                outcome
            }
            Translation::Reindex(request) => {
                if self.hooks.skip_reindex_on_empty_changes {
                    info!(
                        processor = name,
                        repo = %request.repository.full_name(),
                        "Push without changes, re-index disabled"
                    );
                    return DispatchOutcome::ReindexSkipped {
                        processor: name,
                        repository: request.repository,
                    };
                }
                info!(
                    processor = name,
                    repo = %request.repository.full_name(),
                    "Push without changes, scheduling re-index"
                );
                let outcome = DispatchOutcome::Reindex {
                    processor: name,
                    origin: request.origin.clone(),
                    repository: request.repository.clone(),
                    delay,
                };
                self.propagator.schedule(Propagated::Reindex(request), delay);
                outcome
            }
            Translation::Ping => {
                info!(processor = name, "Received ping");
                DispatchOutcome::Ping { processor: name }
            }
            Translation::Ignored(reason) => {
                debug!(processor = name, reason = %reason, "Ignoring webhook");
                DispatchOutcome::Ignored {
                    processor: name,
                    reason,
                }
            }
        }
    }
}
