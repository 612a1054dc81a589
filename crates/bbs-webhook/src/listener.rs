//! Observers notified of every delivery outcome.

use crate::dispatch::DispatchOutcome;
use crate::request::WebhookRequest;
use crate::WebhookError;
use tracing::error;

/// Webhook listener trait
pub trait WebhookListener: Send + Sync {
    fn on_processed(&self, _outcome: &DispatchOutcome) {}

    fn on_failure(&self, _error: &WebhookError, _request: &WebhookRequest) {}
}

/// Reports failures through the log.
pub struct LoggingListener;

impl WebhookListener for LoggingListener {
    fn on_failure(&self, error: &WebhookError, request: &WebhookRequest) {
        error!(
            kind = error.kind(),
            event_key = request.event_key().unwrap_or("<none>"),
            error = %error,
            "Webhook processing failed"
        );
    }
}
