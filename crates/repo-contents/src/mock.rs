//! In-process fake of the contents API
//!
//! Serves `GET`/`PUT /repos/{owner}/{repo}/contents/{*path}` from an in-memory
//! map with real compare-and-swap semantics: version tokens are content
//! hashes, a `PUT` with a stale token answers 409, and a token-less `PUT` on
//! an existing file answers 422. Tests can inject 503s and queue a
//! "concurrent writer" edit that lands just before the next `PUT` on a path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::Secret;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::client::{ContentsClient, RepoConfig, RetryPolicy};

const OWNER: &str = "acme";
const REPO: &str = "keys";

#[derive(Default)]
struct MockState {
    token: String,
    files: Mutex<HashMap<String, String>>,
    concurrent_edits: Mutex<Vec<(String, String)>>,
    commits: Mutex<Vec<String>>,
    branches: Mutex<Vec<Option<String>>>,
    fail_next: AtomicU32,
    requests: AtomicU32,
}

/// A running fake repository bound to an ephemeral local port.
pub struct MockRepo {
    base_url: String,
    state: Arc<MockState>,
    server: tokio::task::JoinHandle<()>,
}

impl Drop for MockRepo {
    fn drop(&mut self) {
        self.server.abort();
    }
}

impl MockRepo {
    /// Start a fake repository that accepts `token`.
    pub async fn start(token: &str) -> Self {
        let state = Arc::new(MockState {
            token: token.to_string(),
            ..MockState::default()
        });

        let app = Router::new()
            .route(
                "/repos/{owner}/{repo}/contents/{*path}",
                get(read_file).put(write_file),
            )
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock repo listener");
        let addr = listener.local_addr().expect("mock repo local addr");
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            server,
        }
    }

    /// Repository coordinates pointing at this fake.
    pub fn repo_config(&self, token: &str) -> RepoConfig {
        RepoConfig {
            api_base: self.base_url.clone(),
            owner: OWNER.into(),
            repo: REPO.into(),
            branch: None,
            token: Secret::new(token.to_string()),
            timeout: Duration::from_secs(5),
        }
    }

    /// A client for this fake authenticating with `token`.
    pub fn client(&self, token: &str, retry: RetryPolicy) -> ContentsClient {
        ContentsClient::new(reqwest::Client::new(), self.repo_config(token), retry)
    }

    /// Write a file directly, bypassing the API (seed data or a third-party writer).
    pub fn seed(&self, path: &str, content: &str) {
        lock(&self.state.files).insert(path.to_string(), content.to_string());
    }

    /// Current text of a file.
    pub fn file(&self, path: &str) -> Option<String> {
        lock(&self.state.files).get(path).cloned()
    }

    /// Current version token of a file.
    pub fn sha(&self, path: &str) -> Option<String> {
        lock(&self.state.files).get(path).map(|c| blob_sha(c))
    }

    /// Replace `path` with `content` right before the next `PUT` to it is judged.
    pub fn queue_concurrent_edit(&self, path: &str, content: &str) {
        lock(&self.state.concurrent_edits).push((path.to_string(), content.to_string()));
    }

    /// Answer the next `n` requests with 503.
    pub fn fail_next_requests(&self, n: u32) {
        self.state.fail_next.store(n, Ordering::SeqCst);
    }

    /// Commit messages of accepted writes, oldest first.
    pub fn commit_messages(&self) -> Vec<String> {
        lock(&self.state.commits).clone()
    }

    /// Branch named by each request (`ref` on reads, `branch` on writes).
    pub fn branches_seen(&self) -> Vec<Option<String>> {
        lock(&self.state.branches).clone()
    }

    /// Total requests received, including rejected ones.
    pub fn request_count(&self) -> u32 {
        self.state.requests.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Content-derived version token, shaped like a git blob id.
fn blob_sha(content: &str) -> String {
    let blob = format!("blob {}\0{}", content.len(), content);
    format!("{:x}", Sha256::digest(blob.as_bytes()))
}

/// Encode like the real store does: base64 wrapped at 60 columns.
fn wrapped_base64(content: &str) -> String {
    let encoded = STANDARD.encode(content.as_bytes());
    let mut out = String::with_capacity(encoded.len() + encoded.len() / 60 + 1);
    for (i, ch) in encoded.chars().enumerate() {
        if i > 0 && i % 60 == 0 {
            out.push('\n');
        }
        out.push(ch);
    }
    out.push('\n');
    out
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "message": message }))).into_response()
}

/// Shared gate: counts the request, checks the token, injects failures.
fn admit(state: &MockState, headers: &HeaderMap) -> Option<Response> {
    state.requests.fetch_add(1, Ordering::SeqCst);

    let expected = format!("token {}", state.token);
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if presented != Some(expected.as_str()) {
        return Some(json_error(StatusCode::UNAUTHORIZED, "Bad credentials"));
    }

    let failing = state
        .fail_next
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return Some(json_error(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable"));
    }
    None
}

#[derive(Deserialize)]
struct ReadQuery {
    #[serde(rename = "ref")]
    reference: Option<String>,
}

async fn read_file(
    State(state): State<Arc<MockState>>,
    Path((_owner, _repo, path)): Path<(String, String, String)>,
    Query(query): Query<ReadQuery>,
    headers: HeaderMap,
) -> Response {
    if let Some(rejection) = admit(&state, &headers) {
        return rejection;
    }
    lock(&state.branches).push(query.reference);

    match lock(&state.files).get(&path) {
        Some(content) => Json(serde_json::json!({
            "type": "file",
            "path": path,
            "encoding": "base64",
            "sha": blob_sha(content),
            "content": wrapped_base64(content),
        }))
        .into_response(),
        None => json_error(StatusCode::NOT_FOUND, "Not Found"),
    }
}

#[derive(Deserialize)]
struct WriteBody {
    message: String,
    content: String,
    sha: Option<String>,
    branch: Option<String>,
}

async fn write_file(
    State(state): State<Arc<MockState>>,
    Path((_owner, _repo, path)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(body): Json<WriteBody>,
) -> Response {
    if let Some(rejection) = admit(&state, &headers) {
        return rejection;
    }
    lock(&state.branches).push(body.branch.clone());

    let text = match STANDARD
        .decode(body.content.as_bytes())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
    {
        Some(text) => text,
        None => return json_error(StatusCode::BAD_REQUEST, "content is not valid Base64"),
    };

    let mut files = lock(&state.files);

    {
        let mut edits = lock(&state.concurrent_edits);
        if let Some(pos) = edits.iter().position(|(p, _)| *p == path) {
            let (_, content) = edits.remove(pos);
            files.insert(path.clone(), content);
        }
    }

    let created = match (files.get(&path), body.sha.as_deref()) {
        (Some(current), Some(sha)) if blob_sha(current) == sha => false,
        (Some(_), Some(_)) => {
            return json_error(StatusCode::CONFLICT, &format!("{path} does not match"));
        }
        (Some(_), None) => {
            return json_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "Invalid request. \"sha\" wasn't supplied.",
            );
        }
        (None, Some(_)) => {
            return json_error(StatusCode::CONFLICT, &format!("{path} does not exist"));
        }
        (None, None) => true,
    };

    let sha = blob_sha(&text);
    files.insert(path.clone(), text);
    lock(&state.commits).push(body.message.clone());

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    (
        status,
        Json(serde_json::json!({
            "content": { "path": path, "sha": sha },
            "commit": { "message": body.message },
        })),
    )
        .into_response()
}
