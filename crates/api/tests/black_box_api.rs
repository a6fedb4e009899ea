use std::sync::Arc;

use batchline_api::app::{SharedCoordinator, build_app};
use batchline_infra::{CoordinationStore, Coordinator, CoordinatorConfig, InMemoryCoordinationStore};
use reqwest::StatusCode;

struct TestServer {
    base_url: String,
    store: Arc<InMemoryCoordinationStore>,
    coordinator: SharedCoordinator,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        batchline_observability::init_for_tests();

        // Same router as prod, in-memory store, ephemeral port.
        let store = InMemoryCoordinationStore::arc();
        let dyn_store: Arc<dyn CoordinationStore> = store.clone();
        let coordinator = Coordinator::new(dyn_store, CoordinatorConfig::default().with_name("api"));

        let app = build_app(coordinator.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            store,
            coordinator,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn post(client: &reqwest::Client, srv: &TestServer, path: &str) -> StatusCode {
    client.post(srv.url(path)).send().await.unwrap().status()
}

async fn stat(client: &reqwest::Client, srv: &TestServer) -> (StatusCode, serde_json::Value) {
    let res = client.get(srv.url("/stat")).send().await.unwrap();
    let status = res.status();
    let body = res.json().await.unwrap_or(serde_json::Value::Null);
    (status, body)
}

async fn stat_eventually(client: &reqwest::Client, srv: &TestServer, state: &str) -> serde_json::Value {
    // Processing runs in the background; poll until it settles.
    for _ in 0..200 {
        let (status, body) = stat(client, srv).await;
        if status == StatusCode::OK && body["state"] == state {
            return body;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    panic!("job did not reach state {state} within timeout");
}

#[tokio::test]
async fn health_is_ok() {
    let srv = TestServer::spawn().await;

    let res = reqwest::get(srv.url("/health")).await.unwrap();

    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn pristine_ledger_rejects_stat_pause_and_resume() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    assert_eq!(stat(&client, &srv).await.0, StatusCode::PRECONDITION_FAILED);
    assert_eq!(post(&client, &srv, "/pause").await, StatusCode::PRECONDITION_FAILED);
    assert_eq!(post(&client, &srv, "/resume").await, StatusCode::PRECONDITION_FAILED);
    assert!(srv.store.jobs().is_empty());
}

#[tokio::test]
async fn start_processes_everything() {
    let srv = TestServer::spawn().await;
    srv.store.seed_items(&[(1, 2), (3, 4), (5, 6), (7, 8), (9, 10)]);
    let client = reqwest::Client::new();

    assert_eq!(post(&client, &srv, "/start").await, StatusCode::ACCEPTED);

    let body = stat_eventually(&client, &srv, "not_running").await;
    assert_eq!(body["count"], 5);
    assert_eq!(srv.store.jobs().len(), 1);

    // A finished run can be started again; it finds nothing left to do.
    assert_eq!(post(&client, &srv, "/start").await, StatusCode::ACCEPTED);
    stat_eventually(&client, &srv, "not_running").await;
    assert_eq!(srv.store.jobs().len(), 2);
}

#[tokio::test]
async fn get_is_accepted_on_transitions() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/start")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    stat_eventually(&client, &srv, "not_running").await;
    let res = client.get(srv.url("/pause")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn running_job_rejects_start_and_resume() {
    let srv = TestServer::spawn().await;
    srv.store.seed_items(&[(1, 1)]);
    // Active job without a local loop: stays running until someone works it.
    srv.store.start_job().await.unwrap();
    let client = reqwest::Client::new();

    assert_eq!(post(&client, &srv, "/start").await, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(post(&client, &srv, "/resume").await, StatusCode::PRECONDITION_FAILED);

    let (status, body) = stat(&client, &srv).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "running");
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn pause_then_start_resumes() {
    let srv = TestServer::spawn().await;
    srv.store.seed_items(&[(1, 1), (2, 2), (3, 3)]);
    srv.store.start_job().await.unwrap();
    let client = reqwest::Client::new();

    assert_eq!(post(&client, &srv, "/pause").await, StatusCode::ACCEPTED);
    assert_eq!(post(&client, &srv, "/pause").await, StatusCode::PRECONDITION_FAILED);
    let (_, body) = stat(&client, &srv).await;
    assert_eq!(body["state"], "paused");

    assert_eq!(post(&client, &srv, "/start").await, StatusCode::ACCEPTED);

    let body = stat_eventually(&client, &srv, "not_running").await;
    assert_eq!(body["count"], 3);
    assert_eq!(srv.store.jobs().len(), 1);
}

#[tokio::test]
async fn resume_endpoint_restarts_processing() {
    let srv = TestServer::spawn().await;
    srv.store.seed_items(&[(1, 1), (2, 2)]);
    srv.store.start_job().await.unwrap();
    srv.store.pause_active().await.unwrap();
    let client = reqwest::Client::new();

    assert_eq!(post(&client, &srv, "/resume").await, StatusCode::ACCEPTED);

    let body = stat_eventually(&client, &srv, "not_running").await;
    assert_eq!(body["count"], 2);
    srv.coordinator.supervisor().join_all().await;
}

#[tokio::test]
async fn unreadable_store_is_service_unavailable() {
    let srv = TestServer::spawn().await;
    srv.store.set_unavailable(true);
    let client = reqwest::Client::new();

    for path in ["/start", "/pause", "/resume"] {
        let res = client.post(srv.url(path)).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE, "{path}");
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(body["error"], "undefined_state");
    }

    assert_eq!(stat(&client, &srv).await.0, StatusCode::SERVICE_UNAVAILABLE);
    assert!(srv.store.jobs().is_empty());
}
