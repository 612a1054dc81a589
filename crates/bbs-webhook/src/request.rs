//! Raw inbound delivery as handed over by the HTTP front door.

use bytes::Bytes;
use std::collections::HashMap;

pub const EVENT_KEY_HEADER: &str = "X-Event-Key";
pub const HOOK_UUID_HEADER: &str = "X-Hook-UUID";
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";
pub const BITBUCKET_TYPE_HEADER: &str = "X-Bitbucket-Type";
pub const SERVER_URL_PARAM: &str = "server_url";

/// Headers (case-insensitive), multi-valued parameters and the raw body.
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    headers: HashMap<String, String>,
    params: HashMap<String, Vec<String>>,
    body: Bytes,
}

impl WebhookRequest {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_param(mut self, name: &str, value: &str) -> Self {
        self.params
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
        self
    }

    /// Parameters from a raw `a=1&b=2` query string.
    pub fn with_query(mut self, query: &str) -> Self {
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            self = self.with_param(&name, &value);
        }
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// First value of a parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn param_values(&self, name: &str) -> &[String] {
        self.params.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn event_key(&self) -> Option<&str> {
        self.header(EVENT_KEY_HEADER)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_are_case_insensitive() {
        let request = WebhookRequest::new("{}").with_header("x-event-key", "repo:push");

        assert_eq!(request.event_key(), Some("repo:push"));
        assert!(request.has_header("X-EVENT-KEY"));
        assert!(!request.has_header(HOOK_UUID_HEADER));
    }

    #[test]
    fn test_query_parameters_keep_every_value() {
        let request = WebhookRequest::new("{}")
            .with_query("server_url=https%3A%2F%2Fgit.example.com&tag=a&tag=b");

        assert_eq!(request.param(SERVER_URL_PARAM), Some("https://git.example.com"));
        assert_eq!(request.param_values("tag"), ["a".to_string(), "b".to_string()]);
        assert!(request.param("missing").is_none());
    }
}
