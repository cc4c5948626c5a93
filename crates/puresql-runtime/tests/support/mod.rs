//! In-process stand-in for the runtime HTTP API plus script "binaries".

#![allow(dead_code)]

use std::convert::Infallible;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

pub const ARTIFACT_CHUNKS: usize = 100;
pub const ARTIFACT_CHUNK_SIZE: usize = 10_000;
pub const ARTIFACT_SIZE: usize = ARTIFACT_CHUNKS * ARTIFACT_CHUNK_SIZE;

/// When the fake runtime starts answering its health endpoint.
#[derive(Debug, Clone, Copy)]
pub enum Health {
    Never,
    Immediately,
    After(Duration),
}

pub struct FakeState {
    health: Health,
    started: Instant,
    models: Vec<String>,
    down: AtomicBool,
    archive: Mutex<Vec<u8>>,
    pub health_hits: AtomicUsize,
    pub artifact_hits: AtomicUsize,
    pub pulls: AtomicUsize,
}

pub struct FakeRuntime {
    pub port: u16,
    pub state: Arc<FakeState>,
    handle: JoinHandle<()>,
}

impl FakeRuntime {
    pub async fn start(health: Health, models: &[&str]) -> Self {
        let state = Arc::new(FakeState {
            health,
            started: Instant::now(),
            models: models.iter().map(|m| m.to_string()).collect(),
            down: AtomicBool::new(false),
            archive: Mutex::new(Vec::new()),
            health_hits: AtomicUsize::new(0),
            artifact_hits: AtomicUsize::new(0),
            pulls: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/api/health", get(health_handler))
            .route("/api/tags", get(tags_handler))
            .route("/api/pull", post(pull_handler))
            .route("/api/generate", post(generate_handler))
            .route("/artifact", get(artifact_handler))
            .route("/garbage.zip", get(garbage_handler))
            .route("/bundle.zip", get(bundle_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            port,
            state,
            handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    pub fn artifact_hits(&self) -> usize {
        self.state.artifact_hits.load(Ordering::SeqCst)
    }

    pub fn pulls(&self) -> usize {
        self.state.pulls.load(Ordering::SeqCst)
    }

    /// Bytes served at `/bundle.zip`.
    pub fn serve_archive(&self, bytes: Vec<u8>) {
        *self.state.archive.lock().unwrap() = bytes;
    }

    /// Make the health endpoint fail from now on.
    ///
    /// Aborting the server would leave pooled keep-alive connections served.
    pub fn go_down(&self) {
        self.state.down.store(true, Ordering::SeqCst);
    }
}

impl Drop for FakeRuntime {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn health_handler(State(state): State<Arc<FakeState>>) -> StatusCode {
    state.health_hits.fetch_add(1, Ordering::SeqCst);
    let healthy = !state.down.load(Ordering::SeqCst)
        && match state.health {
            Health::Never => false,
            Health::Immediately => true,
            Health::After(delay) => state.started.elapsed() >= delay,
        };
    if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn tags_handler(State(state): State<Arc<FakeState>>) -> Json<Value> {
    let models: Vec<Value> = state
        .models
        .iter()
        .map(|name| json!({ "name": name, "size": 1024 }))
        .collect();
    Json(json!({ "models": models }))
}

async fn pull_handler(State(state): State<Arc<FakeState>>, Json(_body): Json<Value>) -> Response {
    state.pulls.fetch_add(1, Ordering::SeqCst);
    let lines = concat!(
        "{\"status\":\"pulling manifest\"}\n",
        "{\"status\":\"pulling a80c4f17\",\"total\":200,\"completed\":100}\n",
        "{\"status\":\"pulling a80c4f17\",\"total\":200,\"completed\":200}\n",
        "{\"status\":\"success\"}\n",
    );
    (StatusCode::OK, lines).into_response()
}

async fn generate_handler(Json(body): Json<Value>) -> Json<Value> {
    Json(json!({
        "model": body["model"],
        "response": "SELECT 1;",
        "done": true,
    }))
}

async fn artifact_handler(State(state): State<Arc<FakeState>>) -> Response {
    state.artifact_hits.fetch_add(1, Ordering::SeqCst);
    let chunks = (0..ARTIFACT_CHUNKS)
        .map(|_| Ok::<_, Infallible>(Bytes::from(vec![0x7f_u8; ARTIFACT_CHUNK_SIZE])));
    Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, ARTIFACT_SIZE)
        .body(Body::from_stream(futures_util::stream::iter(chunks)))
        .unwrap()
}

async fn garbage_handler(State(state): State<Arc<FakeState>>) -> &'static [u8] {
    state.artifact_hits.fetch_add(1, Ordering::SeqCst);
    b"this is not a zip archive"
}

async fn bundle_handler(State(state): State<Arc<FakeState>>) -> Vec<u8> {
    state.artifact_hits.fetch_add(1, Ordering::SeqCst);
    state.archive.lock().unwrap().clone()
}

/// Install a shell script as the runtime binary.
///
/// Every launch appends a line to `$OLLAMA_MODELS/launches`.
#[cfg(unix)]
pub fn install_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let script = format!(
        "#!/bin/sh\nmkdir -p \"$OLLAMA_MODELS\"\necho launched >> \"$OLLAMA_MODELS/launches\"\n{}\n",
        body
    );
    std::fs::write(path, script).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Number of times a script installed by [`install_script`] was launched.
pub fn launch_count(models_dir: &Path) -> usize {
    std::fs::read_to_string(models_dir.join("launches"))
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

/// Poll `cond` until it holds or `timeout` elapses.
pub async fn wait_for<F: Fn() -> bool>(timeout: Duration, cond: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}
