use bbs_client::{BitbucketApi, ClientFactory};
use bbs_core::{CredentialEntry, Endpoint, InMemoryCredentials};
use bbs_infra::RetryConfig;
use bbs_webhook::{Registration, WebhookError, WebhookManager};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

const ROOT: &str = "https://ci.example.com/";
const CLOUD_HOOKS: &str = "/2.0/repositories/acme/widgets/hooks";
const CALLBACK: &str = "https://ci.example.com/bitbucket-scmsource-hook/notify";
const CLOUD_EVENTS: [&str; 5] = [
    "pullrequest:created",
    "pullrequest:fulfilled",
    "pullrequest:rejected",
    "pullrequest:updated",
    "repo:push",
];

fn client(
    endpoint: Endpoint,
    credentials: Arc<InMemoryCredentials>,
    owner: &str,
    repo: &str,
) -> Arc<dyn BitbucketApi> {
    ClientFactory::new(credentials)
        .with_retry(RetryConfig::default().with_initial_delay(Duration::from_millis(10)))
        .repository_client(Arc::new(endpoint), owner, repo, CancellationToken::new())
        .unwrap()
}

fn cloud_endpoint(server: &MockServer) -> Endpoint {
    Endpoint::cloud()
        .with_api_url(&server.uri())
        .with_manage_hooks(true)
}

fn cloud_hook(uuid: &str, url: &str, events: &[&str]) -> Value {
    json!({
        "uuid": uuid,
        "description": "Jenkins hook",
        "url": url,
        "active": true,
        "events": events
    })
}

#[tokio::test]
async fn register_twice_creates_once() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(CLOUD_HOOKS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"values": []})))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(CLOUD_HOOKS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [cloud_hook("h1", CALLBACK, &CLOUD_EVENTS)]
        })))
        .with_priority(5)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CLOUD_HOOKS))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(cloud_hook("h1", CALLBACK, &CLOUD_EVENTS)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let credentials = Arc::new(InMemoryCredentials::new());
    let manager = WebhookManager::new(ROOT, credentials.clone());
    let client = client(cloud_endpoint(&server), credentials, "acme", "widgets");

    let first = manager.register(client.as_ref()).await.unwrap();
    assert!(matches!(first, Registration::Created(ref hook) if hook.id == "h1"));

    let second = manager.register(client.as_ref()).await.unwrap();
    assert!(matches!(second, Registration::Unchanged(_)));
}

#[tokio::test]
async fn missing_events_are_merged_into_one_update() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(CLOUD_HOOKS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [
                cloud_hook("other", "https://elsewhere.example.com/hook", &["repo:push"]),
                cloud_hook("h1", CALLBACK, &["issue:created", "repo:push"])
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("{}/h1", CLOUD_HOOKS)))
        .respond_with(ResponseTemplate::new(200).set_body_json(cloud_hook(
            "h1",
            CALLBACK,
            &[
                "issue:created",
                "pullrequest:created",
                "pullrequest:fulfilled",
                "pullrequest:rejected",
                "pullrequest:updated",
                "repo:push",
            ],
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let credentials = Arc::new(InMemoryCredentials::new());
    let manager = WebhookManager::new(ROOT, credentials.clone());
    let client = client(cloud_endpoint(&server), credentials, "acme", "widgets");

    let outcome = manager.register(client.as_ref()).await.unwrap();
    assert!(matches!(outcome, Registration::Updated(_)));

    let requests = server.received_requests().await.unwrap();
    let put = requests
        .iter()
        .find(|r| r.method.as_str() == "PUT")
        .unwrap();
    let body: Value = put.body_json().unwrap();
    let events: Vec<&str> = body["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e.as_str().unwrap())
        .collect();
    assert_eq!(events.len(), 6);
    assert!(events.contains(&"issue:created"));
    for expected in CLOUD_EVENTS {
        assert!(events.contains(&expected), "missing {}", expected);
    }
}

#[tokio::test]
async fn missing_signature_secret_halts_registration() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"values": []})))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let credentials = Arc::new(InMemoryCredentials::new());
    let manager = WebhookManager::new(ROOT, credentials.clone());
    let endpoint = cloud_endpoint(&server).with_hook_signature("hook-secret");
    let client = client(endpoint, credentials, "acme", "widgets");

    match manager.register(client.as_ref()).await {
        Err(WebhookError::Configuration(message)) => assert!(message.contains("hook-secret")),
        other => panic!("expected a configuration error, got {:?}", other),
    }
}

#[tokio::test]
async fn disabled_endpoint_is_left_alone() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let credentials = Arc::new(InMemoryCredentials::new());
    let manager = WebhookManager::new(ROOT, credentials.clone());
    let endpoint = Endpoint::cloud().with_api_url(&server.uri());
    let client = client(endpoint, credentials, "acme", "widgets");

    assert_eq!(
        manager.register(client.as_ref()).await.unwrap(),
        Registration::Disabled
    );
}

#[tokio::test]
async fn native_hook_secret_rotation_updates_in_place() {
    let server = MockServer::start().await;
    let hooks_path = "/rest/api/1.0/projects/PROJ/repos/widgets/webhooks";

    let endpoint = Endpoint::server(&server.uri())
        .unwrap()
        .with_manage_hooks(true)
        .with_hook_signature("hook-secret");
    let server_url: String =
        url::form_urlencoded::byte_serialize(endpoint.server_url().as_bytes()).collect();
    let callback = format!("{}?server_url={}", CALLBACK, server_url);
    let native_events = [
        "pr:declined",
        "pr:deleted",
        "pr:merged",
        "pr:modified",
        "pr:opened",
        "repo:refs_changed",
    ];

    Mock::given(method("GET"))
        .and(path(hooks_path))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [{
                "id": 7,
                "name": "Jenkins",
                "url": callback,
                "active": true,
                "events": native_events,
                "configuration": {"secret": "old"}
            }],
            "isLastPage": true
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("{}/7", hooks_path)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 7,
            "name": "Jenkins",
            "url": callback,
            "active": true,
            "events": native_events,
            "configuration": {"secret": "new"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let credentials = Arc::new(InMemoryCredentials::from_entries([CredentialEntry::secret(
        "hook-secret",
        "new",
    )]));
    let manager = WebhookManager::new(ROOT, credentials.clone());
    let client = client(endpoint, credentials, "PROJ", "widgets");

    let outcome = manager.register(client.as_ref()).await.unwrap();
    assert!(matches!(outcome, Registration::Updated(ref hook) if hook.id == "7"));

    let requests = server.received_requests().await.unwrap();
    let body: Value = requests
        .iter()
        .find(|r| r.method.as_str() == "PUT")
        .unwrap()
        .body_json()
        .unwrap();
    assert_eq!(body["configuration"]["secret"], "new");
}

#[tokio::test]
async fn removing_absent_hook_is_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(format!("{}/gone", CLOUD_HOOKS)))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let credentials = Arc::new(InMemoryCredentials::new());
    let manager = WebhookManager::new(ROOT, credentials.clone());
    let client = client(cloud_endpoint(&server), credentials, "acme", "widgets");

    assert!(!manager.remove(client.as_ref(), "gone").await.unwrap());
}
