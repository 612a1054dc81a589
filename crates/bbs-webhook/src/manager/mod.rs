//! Idempotent webhook registration
//!
//! `register` reads the repository hooks, keeps only those whose callback
//! lives under this instance's root URL, and then creates the expected hook,
//! updates the existing one in place, or leaves it alone. Hooks of other
//! consumers are never touched and nothing is deleted to be recreated.

mod cloud;
mod server;

use crate::signature::hook_secret;
use crate::Result;
use bbs_client::{BitbucketApi, HookFlavor, WebhookDescriptor};
use bbs_core::{BackendKind, ConnectorConfig, CredentialProvider, Endpoint, WebhookImplementation};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Result of one `register` pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Created(WebhookDescriptor),
    Updated(WebhookDescriptor),
    Unchanged(WebhookDescriptor),
    /// The endpoint does not manage hooks.
    Disabled,
}

pub struct WebhookManager {
    root_url: String,
    credentials: Arc<dyn CredentialProvider>,
    committers_to_ignore: Option<String>,
}

impl WebhookManager {
    pub fn new(root_url: &str, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            root_url: with_trailing_slash(root_url),
            credentials,
            committers_to_ignore: None,
        }
    }

    pub fn from_config(config: &ConnectorConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self::new(&config.normalized_root_url(), credentials)
    }

    /// Committers whose pushes the plugin hook should not report.
    pub fn with_committers_to_ignore(mut self, committers: Option<String>) -> Self {
        self.committers_to_ignore = committers.filter(|c| !c.trim().is_empty());
        self
    }

    /// Callback root for `endpoint`, honouring its override.
    pub fn callback_root(&self, endpoint: &Endpoint) -> String {
        endpoint
            .root_url
            .as_deref()
            .map(with_trailing_slash)
            .unwrap_or_else(|| self.root_url.clone())
    }

    /// The hook this instance wants on every repository of `endpoint`.
    pub fn expected_hook(&self, endpoint: &Endpoint) -> Result<WebhookDescriptor> {
        let root = self.callback_root(endpoint);
        match endpoint.kind() {
            BackendKind::Cloud => Ok(cloud::expected_hook(&root, self.signing_secret(endpoint)?)),
            BackendKind::Server => match endpoint.server.webhook_implementation {
                WebhookImplementation::Native => Ok(server::expected_native_hook(
                    &root,
                    endpoint,
                    self.signing_secret(endpoint)?,
                )),
                WebhookImplementation::Plugin => {
                    if endpoint.is_hook_signature_enabled() {
                        warn!(
                            server_url = %endpoint.server_url(),
                            "Plugin webhooks cannot be signed, ignoring signature credentials"
                        );
                    }
                    Ok(server::expected_plugin_hook(
                        &root,
                        self.committers_to_ignore.clone(),
                    ))
                }
            },
        }
    }

    /// Hooks on the repository that point back at this instance.
    pub async fn owned_hooks(&self, client: &dyn BitbucketApi) -> Result<Vec<WebhookDescriptor>> {
        let root = self.callback_root(client.endpoint());
        let hooks = client.get_webhooks().await?;
        Ok(hooks
            .into_iter()
            .filter(|hook| hook.url.starts_with(&root))
            .collect())
    }

    #[instrument(skip(self, client), fields(owner = %client.owner(), repo = ?client.repository_name()))]
    pub async fn register(&self, client: &dyn BitbucketApi) -> Result<Registration> {
        let endpoint = client.endpoint();
        if !endpoint.manage_hooks {
            debug!(server_url = %endpoint.server_url(), "Hook management disabled");
            return Ok(Registration::Disabled);
        }

        let expected = self.expected_hook(endpoint)?;
        let mut owned = self.owned_hooks(client).await?;

        if owned.is_empty() {
            let created = client.create_webhook(&expected).await?;
            info!(hook_id = %created.id, url = %created.url, "Registered webhook");
            return Ok(Registration::Created(created));
        }
        if owned.len() > 1 {
            let extra: Vec<&str> = owned[1..].iter().map(|h| h.id.as_str()).collect();
            warn!(?extra, "Several webhooks point at this instance, reconciling the first");
        }

        let current = owned.swap_remove(0);
        if !needs_update(&current, &expected) {
            debug!(hook_id = %current.id, "Webhook already up to date");
            return Ok(Registration::Unchanged(current));
        }

        let merged = merge(&current, &expected);
        let updated = client.update_webhook(&merged).await?;
        info!(hook_id = %updated.id, events = updated.events.len(), "Updated webhook");
        Ok(Registration::Updated(updated))
    }

    /// Remove a hook by id. `false` when it was already gone.
    #[instrument(skip(self, client), fields(owner = %client.owner(), repo = ?client.repository_name()))]
    pub async fn remove(&self, client: &dyn BitbucketApi, id: &str) -> Result<bool> {
        match client.remove_webhook(id).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => {
                debug!(hook_id = %id, "Webhook already absent");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every hook of this instance from the repository.
    pub async fn unregister(&self, client: &dyn BitbucketApi) -> Result<usize> {
        let mut removed = 0;
        for hook in self.owned_hooks(client).await? {
            if self.remove(client, &hook.id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn signing_secret(&self, endpoint: &Endpoint) -> Result<Option<String>> {
        hook_secret(self.credentials.as_ref(), endpoint)
    }
}

/// Whether `current` must be rewritten to satisfy `expected`.
///
/// Extra events on `current` are not a difference.
pub fn needs_update(current: &WebhookDescriptor, expected: &WebhookDescriptor) -> bool {
    if current.url != expected.url || !current.active {
        return true;
    }
    if !expected.events.is_subset(&current.events) {
        return true;
    }
    if secret_differs(current, expected) {
        return true;
    }
    expected.flavor == HookFlavor::ServerPlugin
        && current.committers_to_ignore != expected.committers_to_ignore
}

fn secret_differs(current: &WebhookDescriptor, expected: &WebhookDescriptor) -> bool {
    match (&expected.secret, &current.secret) {
        (Some(wanted), Some(present)) => wanted != present,
        // Cloud never echoes the secret back, only whether one is set.
        (Some(_), None) => !current.secret_set,
        (None, _) => current.secret_set,
    }
}

/// `expected` written over `current`, keeping its id and every event it had.
pub fn merge(current: &WebhookDescriptor, expected: &WebhookDescriptor) -> WebhookDescriptor {
    let mut merged = expected.clone().with_id(&current.id);
    merged.events = current.events.union(&expected.events).cloned().collect();
    merged
}

fn with_trailing_slash(url: &str) -> String {
    format!("{}/", url.trim_end_matches('/'))
}
