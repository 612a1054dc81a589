//! Webhook support for Bitbucket repositories
//!
//! - Idempotent registration of this instance's hook on each repository
//! - Inbound delivery dispatch: processor selection, HMAC verification and
//!   translation into normalized events
//! - Delayed, fire-and-forget propagation to the orchestrator
//! - An axum router for the receive endpoint

pub mod dispatch;
pub mod error;
pub mod inbound;
pub mod listener;
pub mod manager;
pub mod processor;
pub mod propagation;
pub mod request;
pub mod signature;
pub mod translate;

pub use dispatch::{DispatchOutcome, WebhookDispatcher};
pub use error::{Result, WebhookError};
pub use inbound::create_webhook_router;
pub use listener::{LoggingListener, WebhookListener};
pub use manager::{Registration, WebhookManager};
pub use processor::{ProcessorRegistry, Translation, WebhookProcessor};
pub use propagation::{ChannelSink, EventSink, Propagated, Propagator};
pub use request::WebhookRequest;
pub use signature::{hook_secret, WebhookSigner, WebhookVerifier, SIGNATURE_HEADER};

/// Callback path under the instance root URL.
pub const HOOK_PATH: &str = "bitbucket-scmsource-hook/notify";
