//! HTTP front door for webhook deliveries.

use crate::dispatch::WebhookDispatcher;
use crate::request::WebhookRequest;
use crate::{WebhookError, HOOK_PATH};
use axum::{
    body::Bytes,
    extract::{RawQuery, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Create Axum router for inbound webhooks
pub fn create_webhook_router(dispatcher: Arc<WebhookDispatcher>) -> Router {
    Router::new()
        .route(&format!("/{}", HOOK_PATH), post(handle_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(dispatcher)
}

fn status_for(error: &WebhookError) -> StatusCode {
    match error {
        WebhookError::Verification(_) => StatusCode::FORBIDDEN,
        WebhookError::NoProcessor(_)
        | WebhookError::AmbiguousProcessor(_)
        | WebhookError::UnknownEndpoint(_)
        | WebhookError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
        WebhookError::Configuration(_) | WebhookError::Api(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn handle_webhook(
    State(dispatcher): State<Arc<WebhookDispatcher>>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut request = WebhookRequest::new(body);
    for (name, value) in &headers {
        if let Ok(value) = value.to_str() {
            request = request.with_header(name.as_str(), value);
        }
    }
    if let Some(query) = query {
        request = request.with_query(&query);
    }

    match dispatcher.dispatch(&request) {
        Ok(_) => (StatusCode::OK, "OK").into_response(),
        Err(error) => (status_for(&error), error.to_string()).into_response(),
    }
}
