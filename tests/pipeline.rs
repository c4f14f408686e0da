use std::sync::{Arc, Mutex};

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use questd::error::Error;
use questd::events::{Event, EventSink};
use questd::models::{Account, Platform};
use questd::store::{self, MemoryStore, StateStore};
use questd::{AccountRunner, ApiClient, TokenManager};

/// Collects published events for assertions.
struct CollectSink(Mutex<Vec<Event>>);

impl CollectSink {
    fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(Vec::new())))
    }

    fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }
}

impl EventSink for CollectSink {
    fn publish(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }
}

fn account(uid: i64, token: Option<&str>) -> Account {
    Account {
        uid,
        uuid: format!("uuid-{uid}"),
        flow_id: "flow-1".into(),
        access_key: "ak-0".into(),
        token: token.map(String::from),
        machine_id: "machine-1".into(),
        platform: Platform::Ios,
        phone: None,
        is_active: true,
        token_updated_at: None,
    }
}

fn build_runner(
    base_url: String,
    store: Arc<dyn StateStore>,
    events: Arc<dyn EventSink>,
) -> AccountRunner {
    let api = ApiClient::new(base_url, 5).unwrap();
    let tokens = TokenManager::new(api.clone(), store.clone(), 3, 1);
    AccountRunner::new(api, tokens, store, events)
}

fn ok_body(data: serde_json::Value) -> serde_json::Value {
    json!({ "code": 0, "msg": "ok", "data": data })
}

fn expired_body() -> serde_json::Value {
    json!({ "code": 10401, "msg": "authentication expired" })
}

async fn mount_login_ok(server: &MockServer, token: &str, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/api/user/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({
            "token": token,
            "accessKey": "ak-new",
        }))))
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn mount_user_info(server: &MockServer, tickets: i64) {
    Mock::given(method("POST"))
        .and(path("/api/user/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({
            "nickname": "tester",
            "points": 10,
            "lotteryTickets": tickets,
        }))))
        .mount(server)
        .await;
}

async fn mount_task_list(server: &MockServer, tasks: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/api/task/list"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(ok_body(json!({ "tasks": tasks }))),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn single_retry_on_expiry_returns_success_after_one_refresh() {
    let server = MockServer::start().await;

    // First task-list call reports the expired credential, every later one
    // succeeds. Exactly one refresh must happen.
    Mock::given(method("POST"))
        .and(path("/api/task/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(expired_body()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_task_list(&server, json!([])).await;
    mount_login_ok(&server, "token-new", 1).await;
    mount_user_info(&server, 0).await;

    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let sink = CollectSink::new();
    let runner = build_runner(server.uri(), store.clone(), sink.clone());

    let acct = account(1, Some("token-old"));
    store::save_account(store.as_ref(), &acct).await.unwrap();

    runner.run(&acct).await.unwrap();

    // The refreshed credential was persisted before dependent calls went on.
    let persisted = store::load_account(store.as_ref(), 1).await.unwrap();
    assert_eq!(persisted.token.as_deref(), Some("token-new"));
    assert_eq!(persisted.access_key, "ak-new");
    assert!(persisted.token_updated_at.is_some());

    server.verify().await;
}

#[tokio::test]
async fn refresh_exhaustion_makes_no_further_calls() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/user/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "code": 5000, "msg": "login rejected" })),
        )
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/task/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({ "tasks": [] }))))
        .expect(0)
        .mount(&server)
        .await;

    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let sink = CollectSink::new();
    let runner = build_runner(server.uri(), store.clone(), sink);

    // No token, so the run must refresh before anything else.
    let acct = account(2, None);
    store::save_account(store.as_ref(), &acct).await.unwrap();

    let err = runner.run(&acct).await.unwrap_err();
    match err {
        Error::RefreshExhausted { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected RefreshExhausted, got {other}"),
    }

    server.verify().await;
}

#[tokio::test]
async fn lottery_loop_aborts_after_draw_retry_expires_again() {
    let server = MockServer::start().await;

    mount_task_list(&server, json!([])).await;
    mount_user_info(&server, 3).await;
    mount_login_ok(&server, "token-2", 1).await;

    // Draw #1 succeeds; draw #2 reports expired, and still reports expired
    // after its one refresh+retry, so draw #3 is never attempted: three
    // requests total hit the endpoint.
    Mock::given(method("POST"))
        .and(path("/api/lottery/draw"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(ok_body(json!({ "prize": "sticker" }))),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/lottery/draw"))
        .respond_with(ResponseTemplate::new(200).set_body_json(expired_body()))
        .expect(2)
        .mount(&server)
        .await;

    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let sink = CollectSink::new();
    let runner = build_runner(server.uri(), store.clone(), sink);

    let acct = account(3, Some("token-1"));
    store::save_account(store.as_ref(), &acct).await.unwrap();

    // The aborted draw sequence does not fail the run itself.
    runner.run(&acct).await.unwrap();

    server.verify().await;
}

#[tokio::test]
async fn end_to_end_completes_sign_in_and_reached_progress() {
    let server = MockServer::start().await;

    mount_login_ok(&server, "token-fresh", 1).await;
    mount_user_info(&server, 0).await;
    mount_task_list(
        &server,
        json!([
            { "taskId": 11, "name": "Daily sign-in", "description": "", "type": 1,
              "value": 0, "target": 0, "state": 0 },
            { "taskId": 12, "name": "Read 90 minutes", "description": "", "type": 2,
              "value": 90, "target": 90, "state": 1 },
            { "taskId": 13, "name": "Watch ads", "description": "", "type": 2,
              "value": 45, "target": 90, "state": 1 },
            { "taskId": 14, "name": "Legacy promo", "description": "", "type": 3,
              "value": 0, "target": 0, "state": 0 }
        ]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/api/task/complete"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({ "reward": 5 }))))
        .expect(2)
        .mount(&server)
        .await;

    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let sink = CollectSink::new();
    let runner = build_runner(server.uri(), store.clone(), sink.clone());

    let acct = account(4, None);
    store::save_account(store.as_ref(), &acct).await.unwrap();

    runner.run(&acct).await.unwrap();

    // Exactly two completion records: the sign-in and the reached progress.
    let completed: Option<questd::models::CompletionRecord> =
        store::get_json(store.as_ref(), &store::keys::completion(4, 11))
            .await
            .unwrap();
    assert!(completed.is_some());
    let completed: Option<questd::models::CompletionRecord> =
        store::get_json(store.as_ref(), &store::keys::completion(4, 12))
            .await
            .unwrap();
    assert!(completed.is_some());
    for skipped in [13, 14] {
        let record: Option<questd::models::CompletionRecord> =
            store::get_json(store.as_ref(), &store::keys::completion(4, skipped))
                .await
                .unwrap();
        assert!(record.is_none(), "task {skipped} must not be completed");
    }

    let events = sink.events();
    let completions = events
        .iter()
        .filter(|event| matches!(event, Event::TaskCompleted { .. }))
        .count();
    assert_eq!(completions, 2);
    assert!(events
        .iter()
        .any(|event| matches!(event, Event::TaskWaiting { task, .. } if task.task_id == 13)));

    // The run ends with the final tasksUpdated + userInfoUpdated pair.
    let tail: Vec<_> = events.iter().rev().take(2).collect();
    assert!(matches!(tail[1], Event::TasksUpdated { uid: 4, .. }));
    assert!(matches!(tail[0], Event::UserInfoUpdated { uid: 4, .. }));

    server.verify().await;
}

#[tokio::test]
async fn one_rejected_completion_does_not_abort_the_rest() {
    let server = MockServer::start().await;

    mount_user_info(&server, 0).await;
    mount_task_list(
        &server,
        json!([
            { "taskId": 21, "name": "Daily sign-in", "description": "", "type": 1,
              "value": 0, "target": 0, "state": 0 },
            { "taskId": 22, "name": "Read 90 minutes", "description": "", "type": 2,
              "value": 90, "target": 90, "state": 1 }
        ]),
    )
    .await;

    // The service rejects the first completion outright; the second task
    // must still be attempted and completed.
    Mock::given(method("POST"))
        .and(path("/api/task/complete"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "code": 1003, "msg": "task not eligible" })),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/task/complete"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({ "reward": 5 }))))
        .expect(1)
        .mount(&server)
        .await;

    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let sink = CollectSink::new();
    let runner = build_runner(server.uri(), store.clone(), sink.clone());

    let acct = account(6, Some("token-1"));
    store::save_account(store.as_ref(), &acct).await.unwrap();

    runner.run(&acct).await.unwrap();

    // Only the second task got a completion record.
    let rejected: Option<questd::models::CompletionRecord> =
        store::get_json(store.as_ref(), &store::keys::completion(6, 21))
            .await
            .unwrap();
    assert!(rejected.is_none());
    let completed: Option<questd::models::CompletionRecord> =
        store::get_json(store.as_ref(), &store::keys::completion(6, 22))
            .await
            .unwrap();
    assert!(completed.is_some());

    let events = sink.events();
    let completions = events
        .iter()
        .filter(|event| matches!(event, Event::TaskCompleted { task_id: 22, .. }))
        .count();
    assert_eq!(completions, 1);
    assert!(events
        .iter()
        .any(|event| matches!(event, Event::Error { uid: Some(6), .. })));

    server.verify().await;
}

#[tokio::test]
async fn manual_complete_task_records_completion() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/task/complete"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body(json!({ "reward": 1 }))))
        .expect(1)
        .mount(&server)
        .await;

    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let sink = CollectSink::new();
    let runner = build_runner(server.uri(), store.clone(), sink);

    let acct = account(5, Some("token-1"));
    store::save_account(store.as_ref(), &acct).await.unwrap();

    let result = runner.complete_task(5, 99).await.unwrap();
    assert_eq!(result, json!({ "reward": 1 }));

    let record: Option<questd::models::CompletionRecord> =
        store::get_json(store.as_ref(), &store::keys::completion(5, 99))
            .await
            .unwrap();
    assert!(record.is_some());

    server.verify().await;
}
