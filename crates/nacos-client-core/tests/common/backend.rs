//! Minimal Nacos-v1 registry double backing the end-to-end tests.
//!
//! Configuration state is real enough for genuine long-polls: the listener
//! endpoint compares the digests a client sends against the stored content
//! and holds the request (bounded for test timescales) until something
//! differs. The naming side keeps registered instances in memory and counts
//! heartbeats so tests can assert on beat traffic.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Form, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

/// Longest a long-poll is held open by the double, regardless of the
/// timeout the client asked for.
const POLL_HOLD_CAP: Duration = Duration::from_millis(300);

/// Configuration entry identity: (tenant, group, dataId).
type ConfigKey = (String, String, String);

/// Shared backend state: stored configs, registrations, and counters.
#[derive(Default)]
pub struct BackendState {
    /// Configuration content per entry.
    configs: HashMap<ConfigKey, String>,
    /// Raw `Listening-Configs` bodies observed, one per poll.
    poll_log: Vec<String>,
    /// Registered instances as instance-list JSON objects, keyed by
    /// `serviceName|ip|port`.
    instances: HashMap<String, serde_json::Value>,
    /// Heartbeats received per service name.
    beats: HashMap<String, usize>,
    /// `clientBeatInterval` millis echoed in beat acknowledgements.
    beat_interval_hint: u64,
}

type SharedState = Arc<Mutex<BackendState>>;

/// Backend harness implementing the registry HTTP surface the client uses.
pub struct BackendHarness {
    /// Base URL the client under test should point at.
    base_url: String,
    /// Shared mutable state storing configs, instances, and counters.
    state: SharedState,
    /// Signal used to terminate the HTTP server.
    shutdown_tx: Option<oneshot::Sender<()>>,
    /// Join handle for the HTTP server task.
    handle: Option<JoinHandle<()>>,
}

impl BackendHarness {
    /// Spawns the backend and returns a handle for scripting scenarios.
    pub async fn start() -> Self {
        let state = SharedState::default();
        let router = Router::new()
            .route(
                "/nacos/v1/cs/configs",
                get(handle_config_get)
                    .post(handle_config_publish)
                    .delete(handle_config_remove),
            )
            .route("/nacos/v1/cs/configs/listener", post(handle_config_listener))
            .route(
                "/nacos/v1/ns/instance",
                post(handle_instance_register)
                    .put(handle_instance_update)
                    .delete(handle_instance_deregister),
            )
            .route("/nacos/v1/ns/instance/beat", put(handle_instance_beat))
            .route("/nacos/v1/ns/instance/list", get(handle_instance_list))
            .route("/nacos/v1/ns/service/list", get(handle_service_list))
            .fallback(handle_not_found)
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("backend bind");
        let addr = listener.local_addr().expect("backend address");
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let server = async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("server run");
        };
        let handle = tokio::spawn(server);

        Self {
            base_url: format!("http://{addr}"),
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Returns the base URL the client under test should use.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sets the `clientBeatInterval` echoed in beat acknowledgements.
    pub async fn set_beat_interval_hint(&self, millis: u64) {
        self.state.lock().await.beat_interval_hint = millis;
    }

    /// Number of heartbeats received for `service_name` so far.
    pub async fn beats_for(&self, service_name: &str) -> usize {
        self.state
            .lock()
            .await
            .beats
            .get(service_name)
            .copied()
            .unwrap_or(0)
    }

    /// Whether an instance of `service_name` at `ip:port` is registered.
    pub async fn has_instance(&self, service_name: &str, ip: &str, port: u16) -> bool {
        self.state
            .lock()
            .await
            .instances
            .contains_key(&instance_key(service_name, ip, port))
    }

    /// Returns the raw poll bodies observed so far, clearing the log.
    pub async fn take_poll_log(&self) -> Vec<String> {
        std::mem::take(&mut self.state.lock().await.poll_log)
    }
}

impl Drop for BackendHarness {
    /// Tears down the listener task when the harness goes out of scope.
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

fn instance_key(service_name: &str, ip: &str, port: u16) -> String {
    format!("{service_name}|{ip}|{port}")
}

fn config_key_from(params: &HashMap<String, String>) -> ConfigKey {
    (
        params.get("tenant").cloned().unwrap_or_default(),
        params.get("group").cloned().unwrap_or_default(),
        params.get("dataId").cloned().unwrap_or_default(),
    )
}

/// Splits a `Listening-Configs` body into `(dataId, group, md5, tenant)` units.
fn parse_listening_units(body: &str) -> Vec<(String, String, String, String)> {
    body.split('\u{1}')
        .filter(|unit| !unit.is_empty())
        .map(|unit| {
            let mut fields = unit.split('\u{2}');
            (
                fields.next().unwrap_or_default().to_string(),
                fields.next().unwrap_or_default().to_string(),
                fields.next().unwrap_or_default().to_string(),
                fields.next().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

/// Returns the concatenated changed units for `body` against the stored
/// configs, empty when every digest still matches.
fn changed_units(configs: &HashMap<ConfigKey, String>, body: &str) -> String {
    let mut changed = String::new();
    for (data_id, group, digest, tenant) in parse_listening_units(body) {
        let key = (tenant.clone(), group.clone(), data_id.clone());
        let current = configs
            .get(&key)
            .map(|content| format!("{:x}", md5::compute(content)))
            .unwrap_or_default();
        if current != digest {
            if tenant.is_empty() {
                changed.push_str(&format!("{data_id}\u{2}{group}\u{1}"));
            } else {
                changed.push_str(&format!("{data_id}\u{2}{group}\u{2}{tenant}\u{1}"));
            }
        }
    }
    changed
}

async fn handle_config_get(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let key = config_key_from(&params);
    match state.lock().await.configs.get(&key) {
        Some(content) => (StatusCode::OK, content.clone()),
        None => (StatusCode::NOT_FOUND, "config data not exist".to_string()),
    }
}

async fn handle_config_publish(
    State(state): State<SharedState>,
    Form(params): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    let key = config_key_from(&params);
    let content = params.get("content").cloned().unwrap_or_default();
    state.lock().await.configs.insert(key, content);
    "true"
}

async fn handle_config_remove(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let key = config_key_from(&params);
    state.lock().await.configs.remove(&key);
    "true"
}

/// Long-poll endpoint: answers immediately when a digest differs, otherwise
/// holds the request (bounded by [`POLL_HOLD_CAP`]) re-checking for publishes.
async fn handle_config_listener(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let listening = body
        .strip_prefix("Listening-Configs=")
        .unwrap_or(&body)
        .to_string();
    state.lock().await.poll_log.push(listening.clone());

    let requested = headers
        .get("Long-Pulling-Timeout")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(30_000);
    let hold = Duration::from_millis(requested).min(POLL_HOLD_CAP);
    let deadline = Instant::now() + hold;

    loop {
        let changed = changed_units(&state.lock().await.configs, &listening);
        if !changed.is_empty() {
            return changed;
        }
        if Instant::now() >= deadline {
            return String::new();
        }
        sleep(Duration::from_millis(20)).await;
    }
}

/// Builds the instance-list JSON object for a set of registration params.
fn instance_json(params: &HashMap<String, String>) -> serde_json::Value {
    let get = |name: &str| params.get(name).cloned().unwrap_or_default();
    serde_json::json!({
        "instanceId": format!("{}#{}", get("ip"), get("port")),
        "ip": get("ip"),
        "port": get("port").parse::<u16>().unwrap_or(0),
        "weight": get("weight").parse::<f64>().unwrap_or(1.0),
        "enable": get("enabled").parse::<bool>().unwrap_or(true),
        "healthy": get("healthy").parse::<bool>().unwrap_or(true),
        "metadata": serde_json::from_str::<serde_json::Value>(&get("metadata"))
            .unwrap_or_else(|_| serde_json::json!({})),
        "clusterName": get("clusterName"),
        "serviceName": get("serviceName"),
        "groupName": get("groupName"),
        "ephemeral": get("ephemeral").parse::<bool>().unwrap_or(true),
    })
}

async fn handle_instance_register(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let key = instance_key(
        params.get("serviceName").map(String::as_str).unwrap_or(""),
        params.get("ip").map(String::as_str).unwrap_or(""),
        params.get("port").and_then(|p| p.parse().ok()).unwrap_or(0),
    );
    state.lock().await.instances.insert(key, instance_json(&params));
    "ok"
}

async fn handle_instance_update(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    handle_instance_register(State(state), Query(params)).await
}

async fn handle_instance_deregister(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let key = instance_key(
        params.get("serviceName").map(String::as_str).unwrap_or(""),
        params.get("ip").map(String::as_str).unwrap_or(""),
        params.get("port").and_then(|p| p.parse().ok()).unwrap_or(0),
    );
    state.lock().await.instances.remove(&key);
    "ok"
}

async fn handle_instance_beat(
    State(state): State<SharedState>,
    Form(params): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    let service = params.get("serviceName").cloned().unwrap_or_default();
    let mut guard = state.lock().await;
    *guard.beats.entry(service).or_insert(0) += 1;
    format!(r#"{{"clientBeatInterval":{}}}"#, guard.beat_interval_hint)
}

async fn handle_instance_list(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let service = params.get("serviceName").cloned().unwrap_or_default();
    let healthy_only = params
        .get("healthyOnly")
        .map(|value| value == "true")
        .unwrap_or(false);
    let guard = state.lock().await;
    let hosts: Vec<&serde_json::Value> = guard
        .instances
        .values()
        .filter(|instance| instance["serviceName"] == service.as_str())
        .filter(|instance| !healthy_only || instance["healthy"] == true)
        .collect();
    serde_json::json!({ "hosts": hosts }).to_string()
}

async fn handle_service_list(State(state): State<SharedState>) -> impl IntoResponse {
    let guard = state.lock().await;
    let mut names: Vec<String> = guard
        .instances
        .values()
        .filter_map(|instance| instance["serviceName"].as_str().map(str::to_string))
        .collect();
    names.sort();
    names.dedup();
    serde_json::json!({ "count": names.len(), "doms": names }).to_string()
}

async fn handle_not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "no such endpoint")
}
