//! `bbsource replay`

use anyhow::{Context, Result};
use bbs_webhook::{DispatchOutcome, WebhookRequest};
use std::collections::HashMap;
use std::path::Path;

use crate::app::{render, App};

/// Build a request from a saved header map and body.
pub fn load_request(headers: &Path, body: &Path, query: Option<&str>) -> Result<WebhookRequest> {
    let raw_headers = std::fs::read_to_string(headers)
        .with_context(|| format!("Failed to read {}", headers.display()))?;
    let header_map: HashMap<String, String> = serde_json::from_str(&raw_headers)
        .with_context(|| format!("{} is not a JSON object of strings", headers.display()))?;
    let raw_body =
        std::fs::read(body).with_context(|| format!("Failed to read {}", body.display()))?;

    let mut request = WebhookRequest::new(raw_body);
    for (name, value) in &header_map {
        request = request.with_header(name, value);
    }
    if let Some(query) = query {
        request = request.with_query(query);
    }
    Ok(request)
}

pub async fn run(app: &App, headers: &Path, body: &Path, query: Option<&str>) -> Result<()> {
    let request = load_request(headers, body, query)?;
    let (dispatcher, mut receiver) = app.dispatcher();

    let outcome = dispatcher
        .dispatch(&request)
        .context("Webhook was rejected")?;
    println!("{:?}", outcome);

    if matches!(
        outcome,
        DispatchOutcome::Event { .. } | DispatchOutcome::Reindex { .. }
    ) {
        if let Some(work) = receiver.recv().await {
            println!("{}", render(&work)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_request() {
        let dir = std::env::temp_dir().join(format!("bbsource-replay-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let headers = dir.join("headers.json");
        let body = dir.join("body.json");
        std::fs::write(&headers, r#"{"X-Event-Key": "repo:refs_changed", "X-Request-Id": "r1"}"#)
            .unwrap();
        std::fs::write(&body, br#"{"changes": []}"#).unwrap();

        let request =
            load_request(&headers, &body, Some("server_url=https%3A%2F%2Fgit.example.com")).unwrap();
        assert_eq!(request.event_key(), Some("repo:refs_changed"));
        assert_eq!(request.param("server_url"), Some("https://git.example.com"));
        assert_eq!(request.body().as_ref(), br#"{"changes": []}"#);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
