//! End-to-end session tests against a real socket
//!
//! A small axum server stands in for the backend: it serves the
//! `/events` push channel, answers GraphQL documents, and records every
//! request so tests can assert on the wire traffic.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Json, State};
use axum::response::sse::{Event, Sse};
use axum::routing::post;
use futures::stream::Stream;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use fovea_app::mutations::GraphqlClient;
use fovea_app::queries::DatasetLoader;
use fovea_app::router::Router;
use fovea_app::session::{Session, SessionDeps, SessionHooks};
use fovea_app::setters::{SessionContext, SetterRegistry, SetterValue};
use fovea_app::store::SessionStore;
use fovea_common::state::ReadyState;
use fovea_common::Result;

/// Sentinel event name telling the test server to end the stream
const CLOSE_STREAM: &str = "__close__";

#[derive(Clone)]
struct ServerState {
    events_tx: broadcast::Sender<(String, String)>,
    handshakes: Arc<Mutex<Vec<Value>>>,
    graphql_requests: Arc<Mutex<Vec<Value>>>,
    fail_mutations: Arc<AtomicBool>,
}

struct TestServer {
    base_url: String,
    state: ServerState,
}

impl TestServer {
    async fn start() -> Self {
        let (events_tx, _) = broadcast::channel(16);
        let state = ServerState {
            events_tx,
            handshakes: Arc::new(Mutex::new(Vec::new())),
            graphql_requests: Arc::new(Mutex::new(Vec::new())),
            fail_mutations: Arc::new(AtomicBool::new(false)),
        };

        let app = axum::Router::new()
            .route("/events", post(events))
            .route("/graphql", post(graphql))
            .route("/sort", post(sort))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Should bind an ephemeral port");
        let addr = listener.local_addr().expect("Should have a local address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Server should run");
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    /// Block until a client has opened the push channel
    async fn wait_for_connection(&self) {
        for _ in 0..TICKS {
            if !self.state.handshakes.lock().await.is_empty() {
                return;
            }
            tokio::time::sleep(TICK).await;
        }
        panic!("no client connected within two seconds");
    }

    fn send_state(&self, state: Value, refresh: bool) {
        let payload = json!({ "state": state, "refresh": refresh });
        self.state
            .events_tx
            .send(("state_update".to_string(), payload.to_string()))
            .expect("Stream should be open");
    }

    fn send_deactivate(&self) {
        self.state
            .events_tx
            .send(("deactivate_notebook_cell".to_string(), String::new()))
            .expect("Stream should be open");
    }

    fn close_stream(&self) {
        self.state
            .events_tx
            .send((CLOSE_STREAM.to_string(), String::new()))
            .expect("Stream should be open");
    }
}

async fn events(
    State(state): State<ServerState>,
    Json(handshake): Json<Value>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let mut rx = state.events_tx.subscribe();
    state.handshakes.lock().await.push(handshake);

    let stream = async_stream::stream! {
        yield Ok(Event::default().comment("connected"));
        while let Ok((name, data)) = rx.recv().await {
            if name == CLOSE_STREAM {
                break;
            }
            yield Ok(Event::default().event(name).data(data));
        }
    };
    Sse::new(stream)
}

async fn graphql(State(state): State<ServerState>, Json(body): Json<Value>) -> Json<Value> {
    state.graphql_requests.lock().await.push(body.clone());

    let query = body["query"].as_str().unwrap_or("");
    if query.starts_with("query dataset") {
        return Json(json!({
            "data": {
                "dataset": {
                    "id": "5f1c",
                    "name": body["variables"]["name"],
                    "mediaType": "image",
                    "sampleFields": [
                        { "path": "filepath", "ftype": "StringField" }
                    ],
                    "frameFields": [],
                    "maskTargets": [],
                    "defaultMaskTargets": []
                }
            }
        }));
    }

    if state.fail_mutations.load(Ordering::SeqCst) {
        return Json(json!({
            "data": null,
            "errors": [{ "message": "mutation rejected" }]
        }));
    }

    if query.contains("setView") {
        return Json(json!({ "data": { "setView": body["variables"]["view"] } }));
    }
    Json(json!({ "data": {} }))
}

async fn sort(State(state): State<ServerState>, Json(body): Json<Value>) -> Json<Value> {
    state.graphql_requests.lock().await.push(json!({ "sort": body }));
    Json(json!({}))
}

struct Harness {
    store: Arc<SessionStore>,
    router: Arc<Mutex<Router>>,
    cancel: CancellationToken,
    task: JoinHandle<Result<()>>,
    screenshots: Arc<AtomicUsize>,
    refreshes: Arc<AtomicUsize>,
    subscription: Uuid,
    http: reqwest::Client,
}

impl Harness {
    async fn connect(server: &TestServer) -> Self {
        let http = reqwest::Client::new();
        let store = Arc::new(SessionStore::new());
        let graphql = GraphqlClient::new(http.clone(), &server.base_url);
        let loader = Arc::new(DatasetLoader::new(graphql, store.clone()));
        let router = Arc::new(Mutex::new(Router::new(loader)));

        let screenshots = Arc::new(AtomicUsize::new(0));
        let refreshes = Arc::new(AtomicUsize::new(0));
        let screenshot_count = screenshots.clone();
        let refresh_count = refreshes.clone();
        let hooks = SessionHooks {
            refresh: Arc::new(move || {
                refresh_count.fetch_add(1, Ordering::SeqCst);
            }),
            screenshot: Arc::new(move || {
                screenshot_count.fetch_add(1, Ordering::SeqCst);
            }),
        };

        let subscription = Uuid::new_v4();
        let session = Session::new(SessionDeps {
            http: http.clone(),
            store: store.clone(),
            router: router.clone(),
            base_url: server.base_url.clone(),
            subscription,
            stateless: false,
            hooks,
        });

        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        let task = tokio::spawn(async move { session.run(run_cancel).await });

        let harness = Self {
            store,
            router,
            cancel,
            task,
            screenshots,
            refreshes,
            subscription,
            http,
        };
        server.wait_for_connection().await;
        harness
    }

    fn context(&self, server: &TestServer) -> SessionContext {
        SessionContext {
            store: self.store.clone(),
            router: self.router.clone(),
            graphql: GraphqlClient::new(self.http.clone(), &server.base_url),
            http: self.http.clone(),
            base_url: server.base_url.clone(),
            subscription: self.subscription,
        }
    }

    async fn wait_for_ready(&self, ready: ReadyState) {
        for _ in 0..TICKS {
            if self.store.ready().await == ready {
                return;
            }
            tokio::time::sleep(TICK).await;
        }
        panic!("ready state never became {ready:?}");
    }

    async fn wait_for_depth(&self, depth: usize) {
        for _ in 0..TICKS {
            if self.depth().await == depth {
                return;
            }
            tokio::time::sleep(TICK).await;
        }
        panic!("history depth never reached {depth}");
    }

    async fn wait_for_screenshots(&self, count: usize) {
        for _ in 0..TICKS {
            if self.screenshots.load(Ordering::SeqCst) == count {
                return;
            }
            tokio::time::sleep(TICK).await;
        }
        panic!("screenshot hook never fired {count} times");
    }

    async fn href(&self) -> String {
        self.router.lock().await.location().href()
    }

    async fn depth(&self) -> usize {
        self.router.lock().await.depth()
    }
}

const TICK: Duration = Duration::from_millis(10);
const TICKS: usize = 200;

#[tokio::test]
async fn first_update_hydrates_with_a_replace() {
    let server = TestServer::start().await;
    let harness = Harness::connect(&server).await;
    assert_eq!(harness.store.ready().await, ReadyState::Connecting);

    // Scenario A: dataset + saved view
    server.send_state(
        json!({ "dataset": "quickstart", "view": [], "view_name": "my-view" }),
        false,
    );
    harness.wait_for_ready(ReadyState::Open).await;

    assert_eq!(harness.href().await, "/datasets/quickstart?view=my-view");
    // replace, not push: hydration must not grow the back stack
    assert_eq!(harness.depth().await, 1);

    let description = harness.store.description().await;
    assert_eq!(description.dataset.as_deref(), Some("quickstart"));
    assert_eq!(description.saved_view_slug.as_deref(), Some("my-view"));

    // the load gate ran the dataset query before OPEN
    let dataset = harness.store.dataset().await.expect("Dataset should load");
    assert_eq!(dataset.name, "quickstart");

    // the handshake carried the subscription and event names
    let handshakes = server.state.handshakes.lock().await;
    assert_eq!(
        handshakes[0]["subscription"],
        json!(harness.subscription.to_string())
    );
    assert_eq!(
        handshakes[0]["events"],
        json!(["deactivate_notebook_cell", "state_update"])
    );

    harness.cancel.cancel();
}

#[tokio::test]
async fn datasetless_update_resolves_to_root() {
    let server = TestServer::start().await;
    let harness = Harness::connect(&server).await;

    // Scenario B
    server.send_state(json!({ "dataset": null }), false);
    harness.wait_for_ready(ReadyState::Open).await;

    assert_eq!(harness.href().await, "/");
    let location = harness.router.lock().await.location().clone();
    assert_eq!(location.nav.unwrap().variables, None);
    assert_eq!(harness.store.dataset().await, None);

    harness.cancel.cancel();
}

#[tokio::test]
async fn deactivation_while_connecting_aborts_without_opening() {
    let server = TestServer::start().await;
    let harness = Harness::connect(&server).await;

    // Scenario C
    server.send_deactivate();
    harness.wait_for_screenshots(1).await;

    let result = harness.task.await.expect("Session task should not panic");
    assert!(result.is_ok());
    assert_eq!(harness.store.ready().await, ReadyState::Connecting);
    assert!(harness.cancel.is_cancelled());
}

#[tokio::test]
async fn steady_state_updates_push_new_history_entries() {
    let server = TestServer::start().await;
    let harness = Harness::connect(&server).await;

    server.send_state(json!({ "dataset": "quickstart", "view": [] }), false);
    harness.wait_for_ready(ReadyState::Open).await;
    assert_eq!(harness.depth().await, 1);

    // Scenario D: a second update pushes
    server.send_state(
        json!({ "dataset": "quickstart", "view": [], "view_name": "night" }),
        false,
    );
    harness.wait_for_depth(2).await;
    assert_eq!(harness.href().await, "/datasets/quickstart?view=night");

    // and back() lands on the hydrated entry
    let mut router = harness.router.lock().await;
    assert_eq!(router.back().unwrap().href(), "/datasets/quickstart");
    drop(router);

    harness.cancel.cancel();
}

#[tokio::test]
async fn refresh_flag_fires_the_refresh_hook() {
    let server = TestServer::start().await;
    let harness = Harness::connect(&server).await;

    server.send_state(json!({ "dataset": "quickstart" }), true);
    harness.wait_for_ready(ReadyState::Open).await;
    assert_eq!(harness.refreshes.load(Ordering::SeqCst), 1);

    harness.cancel.cancel();
}

#[tokio::test]
async fn server_close_resets_to_the_setup_view() {
    let server = TestServer::start().await;
    let harness = Harness::connect(&server).await;

    server.send_state(json!({ "dataset": "quickstart" }), false);
    harness.wait_for_ready(ReadyState::Open).await;
    harness.store.set_modal(true).await;

    server.close_stream();
    harness.wait_for_ready(ReadyState::Closed).await;

    let snapshot = harness.store.snapshot().await;
    assert!(!snapshot.modal_open);
    assert_eq!(snapshot.description.dataset, None);

    let result = harness.task.await.expect("Session task should not panic");
    assert!(result.is_ok());
}

#[tokio::test]
async fn cancellation_wins_over_a_racing_event() {
    let server = TestServer::start().await;
    let harness = Harness::connect(&server).await;

    harness.cancel.cancel();
    // an event queued after cancellation must produce no state change
    let _ = server
        .state
        .events_tx
        .send(("state_update".to_string(), json!({ "state": { "dataset": "late" } }).to_string()));

    let result = harness.task.await.expect("Session task should not panic");
    assert!(result.is_ok());
    assert_eq!(harness.store.ready().await, ReadyState::Connecting);
    assert_eq!(harness.store.description().await.dataset, None);
}

#[tokio::test]
async fn view_name_setter_round_trips_and_pushes_history() {
    let server = TestServer::start().await;
    let harness = Harness::connect(&server).await;

    server.send_state(
        json!({ "dataset": "quickstart", "view": [], "selected": ["s1"] }),
        false,
    );
    harness.wait_for_ready(ReadyState::Open).await;

    let registry = SetterRegistry::new();
    let ctx = harness.context(&server);
    registry
        .apply(&ctx, SetterValue::ViewName(Some("mine".to_string())))
        .await
        .expect("Setter should succeed");

    // exactly one mutation, carrying subscription and dataset context
    let requests = server.state.graphql_requests.lock().await;
    let set_view: Vec<&Value> = requests
        .iter()
        .filter(|request| {
            request["query"]
                .as_str()
                .is_some_and(|query| query.contains("mutation setView"))
        })
        .collect();
    assert_eq!(set_view.len(), 1);
    assert_eq!(
        set_view[0]["variables"]["subscription"],
        json!(harness.subscription.to_string())
    );
    assert_eq!(set_view[0]["variables"]["datasetName"], "quickstart");
    assert_eq!(set_view[0]["variables"]["savedViewSlug"], "mine");
    drop(requests);

    // optimistic local patch: slug set, stale selection cleared
    let description = harness.store.description().await;
    assert_eq!(description.saved_view_slug.as_deref(), Some("mine"));
    assert!(description.selected.is_empty());

    // and the URL followed the same path rules as the reducer
    assert_eq!(harness.href().await, "/datasets/quickstart?view=mine");
    assert_eq!(harness.depth().await, 2);

    harness.cancel.cancel();
}

#[tokio::test]
async fn failed_mutations_leave_state_untouched() {
    let server = TestServer::start().await;
    let harness = Harness::connect(&server).await;

    server.send_state(json!({ "dataset": "quickstart" }), false);
    harness.wait_for_ready(ReadyState::Open).await;

    server.state.fail_mutations.store(true, Ordering::SeqCst);

    let registry = SetterRegistry::new();
    let ctx = harness.context(&server);
    let result = registry
        .apply(
            &ctx,
            SetterValue::SelectedSamples(["s1".to_string()].into_iter().collect()),
        )
        .await;

    assert!(matches!(result, Err(fovea_common::Error::Graphql(_))));
    assert!(harness.store.description().await.selected.is_empty());
    assert_eq!(harness.depth().await, 1);

    harness.cancel.cancel();
}

#[tokio::test]
async fn similarity_sort_posts_a_snake_case_body() {
    let server = TestServer::start().await;
    let harness = Harness::connect(&server).await;

    server.send_state(json!({ "dataset": "quickstart" }), false);
    harness.wait_for_ready(ReadyState::Open).await;

    let registry = SetterRegistry::new();
    let ctx = harness.context(&server);
    registry
        .apply(
            &ctx,
            SetterValue::SimilarityParameters(fovea_app::setters::SortBySimilarityParameters {
                brain_key: "clip".to_string(),
                k: Some(10),
                reverse: None,
                query: Some(json!("a photo of a dog")),
                dist_field: None,
            }),
        )
        .await
        .expect("Sort should succeed");

    let requests = server.state.graphql_requests.lock().await;
    let sort = requests
        .iter()
        .find(|request| request.get("sort").is_some())
        .expect("Sort request should be recorded");
    assert_eq!(sort["sort"]["dataset"], "quickstart");
    assert_eq!(sort["sort"]["brain_key"], "clip");
    assert_eq!(sort["sort"]["k"], 10);
    drop(requests);

    harness.cancel.cancel();
}
