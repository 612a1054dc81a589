use crate::HOOK_PATH;
use bbs_client::{HookFlavor, WebhookDescriptor};

pub(crate) const DESCRIPTION: &str = "Jenkins hook";

pub(crate) const EVENTS: [&str; 5] = [
    "repo:push",
    "pullrequest:created",
    "pullrequest:updated",
    "pullrequest:fulfilled",
    "pullrequest:rejected",
];

pub(crate) fn expected_hook(root: &str, secret: Option<String>) -> WebhookDescriptor {
    WebhookDescriptor::new(HookFlavor::Cloud, DESCRIPTION, &format!("{}{}", root, HOOK_PATH))
        .with_events(EVENTS)
        .with_secret(secret)
}
