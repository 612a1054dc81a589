use bbs_client::ClientFactory;
use bbs_core::{
    ChangeType, CredentialEntry, Endpoint, EndpointRegistry, EventKind, HookProcessingConfig,
    InMemoryCredentials, RepositoryRef, ServerSettings, WebhookImplementation,
};
use bbs_webhook::request::{
    BITBUCKET_TYPE_HEADER, EVENT_KEY_HEADER, HOOK_UUID_HEADER, REQUEST_ID_HEADER,
    SERVER_URL_PARAM,
};
use bbs_webhook::{
    ChannelSink, DispatchOutcome, Propagated, ProcessorRegistry, WebhookDispatcher, WebhookError,
    WebhookListener, WebhookManager, WebhookRequest, WebhookSigner, SIGNATURE_HEADER,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

const SERVER_URL: &str = "https://git.example.com";
const SECRET: &str = "s3cret";

#[derive(Default)]
struct Recorder {
    processed: Mutex<Vec<DispatchOutcome>>,
    failures: Mutex<Vec<&'static str>>,
}

impl WebhookListener for Recorder {
    fn on_processed(&self, outcome: &DispatchOutcome) {
        self.processed.lock().push(outcome.clone());
    }

    fn on_failure(&self, error: &WebhookError, _request: &WebhookRequest) {
        self.failures.lock().push(error.kind());
    }
}

struct Harness {
    dispatcher: WebhookDispatcher,
    receiver: mpsc::Receiver<Propagated>,
    recorder: Arc<Recorder>,
}

fn harness(endpoints: Vec<Endpoint>, hooks: HookProcessingConfig) -> Harness {
    let credentials = InMemoryCredentials::from_entries([CredentialEntry::secret(
        "hook-secret",
        SECRET,
    )]);
    let (sink, receiver) = ChannelSink::new(16);
    let dispatcher = WebhookDispatcher::new(
        ProcessorRegistry::standard(),
        Arc::new(EndpointRegistry::new(endpoints).unwrap()),
        Arc::new(credentials),
        hooks,
        Arc::new(sink),
    );
    let recorder = Arc::new(Recorder::default());
    dispatcher.add_listener(recorder.clone());
    Harness {
        dispatcher,
        receiver,
        recorder,
    }
}

fn immediate() -> HookProcessingConfig {
    HookProcessingConfig::default().with_delay_seconds(0)
}

fn signed_server() -> Endpoint {
    Endpoint::server(SERVER_URL)
        .unwrap()
        .with_hook_signature("hook-secret")
}

fn signed(request: WebhookRequest) -> WebhookRequest {
    let signature = WebhookSigner::new(SECRET).sign(request.body()).unwrap();
    request.with_header(SIGNATURE_HEADER, &signature)
}

fn native(event_key: &str, server_url: &str, body: Value) -> WebhookRequest {
    WebhookRequest::new(body.to_string())
        .with_header(EVENT_KEY_HEADER, event_key)
        .with_header(REQUEST_ID_HEADER, "req-1")
        .with_param(SERVER_URL_PARAM, server_url)
}

fn server_repository() -> Value {
    json!({"slug": "widgets", "project": {"key": "PROJ", "type": "NORMAL"}})
}

#[tokio::test]
async fn multi_change_push_becomes_one_created_event() {
    let mut harness = harness(vec![Endpoint::cloud()], immediate());
    let body = json!({
        "repository": {"full_name": "acme/widgets", "workspace": {"slug": "acme"}},
        "push": {"changes": [
            {"new": {"type": "branch", "name": "main", "target": {"hash": "m2"}}, "old": {"type": "branch", "name": "main", "target": {"hash": "m1"}}, "created": false, "closed": false},
            {"new": null, "old": {"type": "branch", "name": "old", "target": {"hash": "o1"}}, "created": false, "closed": true},
            {"new": {"type": "branch", "name": "fresh", "target": {"hash": "f1"}}, "old": null, "created": true, "closed": false}
        ]}
    });
    let request = WebhookRequest::new(body.to_string())
        .with_header(EVENT_KEY_HEADER, "repo:push")
        .with_header(HOOK_UUID_HEADER, "{hook}");

    let outcome = harness.dispatcher.dispatch(&request).unwrap();
    match &outcome {
        DispatchOutcome::Event {
            processor,
            change_type,
            heads,
            ..
        } => {
            assert_eq!(*processor, "cloud-push");
            assert_eq!(*change_type, ChangeType::Created);
            assert_eq!(*heads, 3);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    let Some(Propagated::Event(event)) = harness.receiver.recv().await else {
        panic!("expected a propagated event");
    };
    assert_eq!(event.kind(), EventKind::Push);
    assert_eq!(event.change_type(), ChangeType::Created);
    assert_eq!(event.origin(), "https://bitbucket.org");
    assert!(harness.receiver.try_recv().is_err());
    assert_eq!(harness.recorder.processed.lock().len(), 1);
}

#[tokio::test]
async fn empty_native_push_triggers_reindex_by_default() {
    let mut harness = harness(vec![signed_server()], immediate());
    let request = signed(native(
        "repo:refs_changed",
        SERVER_URL,
        json!({"repository": server_repository(), "changes": []}),
    ));

    let outcome = harness.dispatcher.dispatch(&request).unwrap();
    assert!(matches!(outcome, DispatchOutcome::Reindex { .. }));

    match harness.receiver.recv().await {
        Some(Propagated::Reindex(reindex)) => {
            assert_eq!(reindex.origin, SERVER_URL);
            assert_eq!(
                reindex.repository,
                RepositoryRef::new("PROJ", "widgets").with_project_key("PROJ")
            );
        }
        other => panic!("expected a re-index, got {:?}", other),
    }
}

#[tokio::test]
async fn empty_push_reindex_can_be_switched_off() {
    let mut harness = harness(
        vec![signed_server()],
        immediate().with_skip_reindex_on_empty_changes(true),
    );
    let request = signed(native(
        "repo:refs_changed",
        SERVER_URL,
        json!({"repository": server_repository(), "changes": []}),
    ));

    let outcome = harness.dispatcher.dispatch(&request).unwrap();
    assert!(matches!(outcome, DispatchOutcome::ReindexSkipped { .. }));

    tokio::task::yield_now().await;
    assert!(harness.receiver.try_recv().is_err());
}

#[tokio::test]
async fn declined_pull_request_is_removed_and_no_longer_listed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/1.0/projects/PROJ/repos/widgets/pull-requests"))
        .and(query_param("state", "OPEN"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [],
            "isLastPage": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = Endpoint::server(&server.uri()).unwrap();
    let mut harness = harness(vec![endpoint.clone()], immediate());
    let side = |branch: &str, hash: &str| {
        json!({"displayId": branch, "latestCommit": hash, "repository": server_repository()})
    };
    let request = native(
        "pr:declined",
        &server.uri(),
        json!({
            "pullRequest": {
                "id": 4,
                "title": "Abandoned",
                "state": "DECLINED",
                "fromRef": side("feature", "aaa"),
                "toRef": side("main", "bbb")
            }
        }),
    );

    let outcome = harness.dispatcher.dispatch(&request).unwrap();
    assert!(matches!(
        outcome,
        DispatchOutcome::Event {
            change_type: ChangeType::Removed,
            ..
        }
    ));
    let Some(Propagated::Event(event)) = harness.receiver.recv().await else {
        panic!("expected a propagated event");
    };
    assert_eq!(event.heads()[0].head.name(), "PR-4");
    assert!(event.heads()[0].revision.is_none());

    let client = ClientFactory::new(Arc::new(InMemoryCredentials::new()))
        .repository_client(Arc::new(endpoint), "PROJ", "widgets", CancellationToken::new())
        .unwrap();
    let open = client.get_pull_requests().await.unwrap();
    assert!(open.iter().all(|pr| pr.id != "4"));
}

#[tokio::test]
async fn bad_signature_is_reported_and_not_propagated() {
    let mut harness = harness(vec![signed_server()], immediate());
    let request = native(
        "repo:refs_changed",
        SERVER_URL,
        json!({"repository": server_repository(), "changes": []}),
    )
    .with_header(SIGNATURE_HEADER, "sha256=deadbeef");

    let result = harness.dispatcher.dispatch(&request);
    assert!(matches!(result, Err(WebhookError::Verification(_))));
    assert_eq!(*harness.recorder.failures.lock(), vec!["verification"]);
    assert!(harness.recorder.processed.lock().is_empty());

    tokio::task::yield_now().await;
    assert!(harness.receiver.try_recv().is_err());
}

#[tokio::test]
async fn unsigned_ping_is_accepted() {
    let harness = harness(vec![signed_server()], immediate());
    let request = native("diagnostics:ping", SERVER_URL, json!({}));

    let outcome = harness.dispatcher.dispatch(&request).unwrap();
    assert_eq!(
        outcome,
        DispatchOutcome::Ping {
            processor: "native-ping"
        }
    );
}

#[tokio::test]
async fn unknown_origin_is_rejected() {
    let harness = harness(vec![signed_server()], immediate());
    let request = native(
        "repo:refs_changed",
        "https://elsewhere.example.com",
        json!({"repository": server_repository(), "changes": []}),
    );

    match harness.dispatcher.dispatch(&request) {
        Err(WebhookError::UnknownEndpoint(url)) => assert_eq!(url, "https://elsewhere.example.com"),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(*harness.recorder.failures.lock(), vec!["unknown_endpoint"]);
}

#[tokio::test]
async fn plugin_push_resolves_server_from_repository_link() {
    let endpoint = Endpoint::server("https://git.example.com/bitbucket").unwrap();
    let mut harness = harness(vec![endpoint], immediate());
    let body = json!({
        "repository": {
            "slug": "widgets",
            "project": {"key": "PROJ"},
            "links": {"self": [{"href": "https://git.example.com/bitbucket/projects/PROJ/repos/widgets/browse"}]}
        },
        "push": {"changes": [
            {"new": {"type": "tag", "name": "v1.0", "target": {"hash": "t1"}}, "created": true, "closed": false}
        ]}
    });
    let request = WebhookRequest::new(body.to_string())
        .with_header(EVENT_KEY_HEADER, "repo:push")
        .with_header(BITBUCKET_TYPE_HEADER, "server");

    let outcome = harness.dispatcher.dispatch(&request).unwrap();
    assert!(matches!(
        outcome,
        DispatchOutcome::Event {
            processor: "plugin-push",
            ..
        }
    ));
    let Some(Propagated::Event(event)) = harness.receiver.recv().await else {
        panic!("expected a propagated event");
    };
    assert_eq!(event.origin(), "https://git.example.com/bitbucket");
}

#[tokio::test]
async fn plugin_delivery_to_signed_endpoint_is_accepted_unsigned() {
    let endpoint = signed_server().with_server_settings(ServerSettings {
        webhook_implementation: WebhookImplementation::Plugin,
        ..ServerSettings::default()
    });
    let credentials = Arc::new(InMemoryCredentials::from_entries([CredentialEntry::secret(
        "hook-secret",
        SECRET,
    )]));
    let hook = WebhookManager::new("https://ci.example.com", credentials)
        .expected_hook(&endpoint)
        .unwrap();
    assert!(hook.secret.is_none());

    let mut harness = harness(vec![endpoint], immediate());
    let body = json!({
        "repository": server_repository(),
        "push": {"changes": [
            {"new": {"type": "branch", "name": "main", "target": {"hash": "m2"}}, "created": false, "closed": false}
        ]}
    });
    let request = WebhookRequest::new(body.to_string())
        .with_header(EVENT_KEY_HEADER, "repo:push")
        .with_header(BITBUCKET_TYPE_HEADER, "server")
        .with_param(SERVER_URL_PARAM, SERVER_URL);

    let outcome = harness.dispatcher.dispatch(&request).unwrap();
    assert!(matches!(
        outcome,
        DispatchOutcome::Event {
            processor: "plugin-push",
            change_type: ChangeType::Updated,
            ..
        }
    ));
    assert!(harness.recorder.failures.lock().is_empty());
    assert!(matches!(harness.receiver.recv().await, Some(Propagated::Event(_))));
}

#[tokio::test(start_paused = true)]
async fn propagation_waits_for_configured_delay() {
    let mut harness = harness(
        vec![Endpoint::cloud()],
        HookProcessingConfig::default().with_delay_seconds(5),
    );
    let body = json!({
        "repository": {"full_name": "acme/widgets"},
        "push": {"changes": [
            {"new": {"type": "branch", "name": "main", "target": {"hash": "m2"}}, "created": false, "closed": false}
        ]}
    });
    let request = WebhookRequest::new(body.to_string())
        .with_header(EVENT_KEY_HEADER, "repo:push")
        .with_header(HOOK_UUID_HEADER, "{hook}");

    let outcome = harness.dispatcher.dispatch(&request).unwrap();
    assert!(matches!(
        outcome,
        DispatchOutcome::Event { delay, .. } if delay == Duration::from_secs(5)
    ));

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(harness.receiver.try_recv().is_err());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(matches!(harness.receiver.try_recv(), Ok(Propagated::Event(_))));
}
