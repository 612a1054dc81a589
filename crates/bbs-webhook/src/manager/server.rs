use crate::request::SERVER_URL_PARAM;
use crate::HOOK_PATH;
use bbs_client::{HookFlavor, WebhookDescriptor};
use bbs_core::Endpoint;

pub(crate) const NATIVE_NAME: &str = "Jenkins";

pub(crate) const PLUGIN_TITLE: &str = "Jenkins";

const NATIVE_EVENTS: [&str; 6] = [
    "repo:refs_changed",
    "pr:opened",
    "pr:merged",
    "pr:declined",
    "pr:deleted",
    "pr:modified",
];

/// Only sent by 7.0 and later.
const FROM_REF_UPDATED: &str = "pr:from_ref_updated";

/// Native hooks carry the endpoint in the callback so the receiver can tell
/// servers apart.
pub(crate) fn expected_native_hook(
    root: &str,
    endpoint: &Endpoint,
    secret: Option<String>,
) -> WebhookDescriptor {
    let server_url: String =
        url::form_urlencoded::byte_serialize(endpoint.server_url().as_bytes()).collect();
    let url = format!("{}{}?{}={}", root, HOOK_PATH, SERVER_URL_PARAM, server_url);

    let mut events: Vec<&str> = NATIVE_EVENTS.to_vec();
    if endpoint.server.server_version.supports_from_ref_updated() {
        events.push(FROM_REF_UPDATED);
    }

    WebhookDescriptor::new(HookFlavor::ServerNative, NATIVE_NAME, &url)
        .with_events(events)
        .with_secret(secret)
}

pub(crate) fn expected_plugin_hook(root: &str, committers: Option<String>) -> WebhookDescriptor {
    WebhookDescriptor::new(
        HookFlavor::ServerPlugin,
        PLUGIN_TITLE,
        &format!("{}{}", root, HOOK_PATH),
    )
    .with_committers_to_ignore(committers)
}
