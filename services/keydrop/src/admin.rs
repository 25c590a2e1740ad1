//! Admin API for key inventory
//!
//! Used by the payment handler (peek, dispense) and by operator tooling
//! (restock, manual solve, stock report). Keys are returned in full; routine
//! log lines only carry a short prefix.
//!
//! Endpoints:
//! - GET    /admin/keys/{period}          list a pool
//! - POST   /admin/keys/{period}          append a key, body `{"key": "..."}`
//! - GET    /admin/keys/{period}/next     key the next dispense would hand out
//! - POST   /admin/keys/{period}/dispense move the head key to the solved file
//! - DELETE /admin/solve/{key}            move a known key to the solved file
//! - GET    /admin/solved                 list dispensed keys
//! - GET    /admin/stock                  remaining count per configured period

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use key_pool::keyfile::key_hint;
use key_pool::{DeleteOutcome, KeyStore, Period};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{ApiError, classify};
use crate::metrics::record_operation;

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    store: Arc<dyn KeyStore>,
}

impl AdminState {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self { store }
    }

    pub fn backend(&self) -> &str {
        self.store.backend()
    }
}

/// Build the admin axum router with all inventory endpoints.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/keys/{period}", get(list_keys).post(add_key))
        .route("/admin/keys/{period}/next", get(next_key))
        .route("/admin/keys/{period}/dispense", post(dispense_key))
        .route("/admin/solve/{key}", delete(solve_key))
        .route("/admin/solved", get(list_solved))
        .route("/admin/stock", get(stock))
        .with_state(state)
}

fn json_ok(body: serde_json::Value) -> Response {
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn parse_period(tag: &str) -> Result<Period, ApiError> {
    Period::parse(tag).map_err(|e| ApiError::from_store(&e))
}

/// Await a store call, recording its outcome and latency.
async fn timed<T, F>(op: &'static str, call: F) -> Result<T, ApiError>
where
    F: Future<Output = key_pool::Result<T>>,
{
    let started = Instant::now();
    let result = call.await;
    let elapsed = started.elapsed().as_secs_f64();

    match result {
        Ok(value) => {
            record_operation(op, "ok", elapsed);
            Ok(value)
        }
        Err(e) => {
            let (_, kind) = classify(&e);
            record_operation(op, kind, elapsed);
            let err = ApiError::from_store(&e);
            warn!(op, request_id = %err.request_id, error = %e, "store operation failed");
            Err(err)
        }
    }
}

/// GET /admin/keys/{period}
async fn list_keys(
    State(state): State<AdminState>,
    Path(period): Path<String>,
) -> Result<Response, ApiError> {
    let period = parse_period(&period)?;
    let keys = timed("list", state.store.list_keys(&period)).await?;

    Ok(json_ok(serde_json::json!({
        "period": period.as_str(),
        "count": keys.len(),
        "keys": keys,
    })))
}

#[derive(Deserialize)]
struct AddKeyRequest {
    key: String,
}

/// POST /admin/keys/{period}
async fn add_key(
    State(state): State<AdminState>,
    Path(period): Path<String>,
    axum::Json(body): axum::Json<AddKeyRequest>,
) -> Result<Response, ApiError> {
    let period = parse_period(&period)?;
    timed("add", state.store.add_key(&period, &body.key)).await?;

    Ok(json_ok(serde_json::json!({
        "period": period.as_str(),
        "status": "added",
    })))
}

/// GET /admin/keys/{period}/next
async fn next_key(
    State(state): State<AdminState>,
    Path(period): Path<String>,
) -> Result<Response, ApiError> {
    let period = parse_period(&period)?;
    let key = timed("peek", state.store.peek_key(&period)).await?;

    Ok(json_ok(serde_json::json!({
        "period": period.as_str(),
        "key": key,
    })))
}

/// POST /admin/keys/{period}/dispense
///
/// Call only after the buyer's email has gone out: the key is gone from the
/// pool once this returns.
async fn dispense_key(
    State(state): State<AdminState>,
    Path(period): Path<String>,
) -> Result<Response, ApiError> {
    let period = parse_period(&period)?;
    let key = timed("dispense", state.store.reserve_and_consume_key(&period)).await?;

    info!(period = %period, key = %key_hint(&key), "key dispensed");
    Ok(json_ok(serde_json::json!({
        "period": period.as_str(),
        "key": key,
    })))
}

/// DELETE /admin/solve/{key}
async fn solve_key(
    State(state): State<AdminState>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    let outcome = timed("solve", state.store.delete_key_and_save_solved(&key)).await?;

    let body = match outcome {
        DeleteOutcome::Moved { period } => serde_json::json!({
            "key": key,
            "status": "solved",
            "period": period.as_str(),
        }),
        DeleteOutcome::NotInAnyPool => serde_json::json!({
            "key": key,
            "status": "not_in_any_pool",
        }),
    };
    Ok(json_ok(body))
}

/// GET /admin/solved
async fn list_solved(State(state): State<AdminState>) -> Result<Response, ApiError> {
    let keys = timed("list_solved", state.store.list_solved()).await?;

    Ok(json_ok(serde_json::json!({
        "count": keys.len(),
        "keys": keys,
    })))
}

/// GET /admin/stock
async fn stock(State(state): State<AdminState>) -> Result<Response, ApiError> {
    let mut counts = serde_json::Map::new();
    for period in state.store.periods() {
        let count = timed("count", state.store.count_keys(period)).await?;
        counts.insert(period.to_string(), count.into());
    }

    Ok(json_ok(serde_json::json!({
        "backend": state.store.backend(),
        "stock": counts,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use key_pool::{KeyLayout, LocalKeyStore, RemoteKeyStore};
    use repo_contents::RetryPolicy;
    use repo_contents::mock::MockRepo;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn periods() -> Vec<Period> {
        ["1d", "7d", "30d", "90d"]
            .into_iter()
            .map(|p| Period::parse(p).unwrap())
            .collect()
    }

    /// Local store over a temp dir seeded with `(file name, content)` pairs.
    fn local_app(files: &[(&str, &str)]) -> (TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        let keys = dir.path().join("data/keys");
        std::fs::create_dir_all(&keys).unwrap();
        for (name, content) in files {
            std::fs::write(keys.join(name), content).unwrap();
        }
        let store = LocalKeyStore::new(dir.path(), KeyLayout::default(), periods());
        let app = build_admin_router(AdminState::new(Arc::new(store)));
        (dir, app)
    }

    async fn send(
        app: Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app.oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn list_keys_returns_pool_in_order() {
        let (_dir, app) = local_app(&[("key1d.txt", "K1\nK2\n")]);

        let (status, json) = send(app, "GET", "/admin/keys/1d", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["period"], "1d");
        assert_eq!(json["count"], 2);
        assert_eq!(json["keys"], serde_json::json!(["K1", "K2"]));
    }

    #[tokio::test]
    async fn v2_period_reads_base_pool() {
        let (_dir, app) = local_app(&[("key30d.txt", "A\n")]);

        let (status, json) = send(app, "GET", "/admin/keys/30d_v2/next", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["period"], "30d");
        assert_eq!(json["key"], "A");
    }

    #[tokio::test]
    async fn next_on_empty_pool_is_null() {
        let (_dir, app) = local_app(&[]);

        let (status, json) = send(app, "GET", "/admin/keys/7d/next", None).await;

        assert_eq!(status, StatusCode::OK);
        assert!(json["key"].is_null());
    }

    #[tokio::test]
    async fn invalid_period_is_400() {
        let (_dir, app) = local_app(&[]);

        let (status, json) = send(app, "GET", "/admin/keys/1%20week/next", None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["type"], "invalid_period");
    }

    #[tokio::test]
    async fn dispense_moves_key_to_solved() {
        let (dir, app) = local_app(&[("key1d.txt", "K1\nK2\n")]);

        let (status, json) = send(app, "POST", "/admin/keys/1d/dispense", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["key"], "K1");
        let solved =
            std::fs::read_to_string(dir.path().join("data/keys/key_solved.txt")).unwrap();
        assert_eq!(solved, "K1\n");
    }

    #[tokio::test]
    async fn dispense_from_empty_pool_is_409() {
        let (_dir, app) = local_app(&[("key90d.txt", "")]);

        let (status, json) = send(app, "POST", "/admin/keys/90d/dispense", None).await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"]["type"], "pool_empty");
        assert!(json["error"]["request_id"].as_str().unwrap().starts_with("req_"));
    }

    #[tokio::test]
    async fn add_key_appends() {
        let (dir, app) = local_app(&[("key7d.txt", "A\n")]);

        let (status, json) = send(
            app,
            "POST",
            "/admin/keys/7d",
            Some(serde_json::json!({ "key": "B" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "added");
        let pool = std::fs::read_to_string(dir.path().join("data/keys/key7d.txt")).unwrap();
        assert_eq!(pool, "A\nB\n");
    }

    #[tokio::test]
    async fn add_blank_key_is_400() {
        let (_dir, app) = local_app(&[("key7d.txt", "A\n")]);

        let (status, json) = send(
            app,
            "POST",
            "/admin/keys/7d",
            Some(serde_json::json!({ "key": "   " })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["type"], "invalid_key");
    }

    #[tokio::test]
    async fn add_to_missing_pool_is_404() {
        let (_dir, app) = local_app(&[]);

        let (status, json) = send(
            app,
            "POST",
            "/admin/keys/7d",
            Some(serde_json::json!({ "key": "B" })),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["type"], "pool_missing");
    }

    #[tokio::test]
    async fn solve_reports_outcome() {
        let (dir, app) = local_app(&[("key30d.txt", "X\nY\n"), ("key_solved.txt", "")]);

        let (status, json) = send(app.clone(), "DELETE", "/admin/solve/Y", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "solved");
        assert_eq!(json["period"], "30d");

        let (status, json) = send(app, "DELETE", "/admin/solve/NOPE", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "not_in_any_pool");

        let solved =
            std::fs::read_to_string(dir.path().join("data/keys/key_solved.txt")).unwrap();
        assert_eq!(solved, "Y\n");
    }

    #[tokio::test]
    async fn solved_and_stock_reports() {
        let (_dir, app) = local_app(&[
            ("key1d.txt", "A\nB\n"),
            ("key30d.txt", "C\n"),
            ("key_solved.txt", "OLD1\nOLD2\n"),
        ]);

        let (status, json) = send(app.clone(), "GET", "/admin/solved", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 2);
        assert_eq!(json["keys"], serde_json::json!(["OLD1", "OLD2"]));

        let (status, json) = send(app, "GET", "/admin/stock", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["backend"], "local");
        assert_eq!(
            json["stock"],
            serde_json::json!({ "1d": 2, "7d": 0, "30d": 1, "90d": 0 })
        );
    }

    #[tokio::test]
    async fn remote_auth_failure_is_502() {
        let repo = MockRepo::start("ghp_good").await;
        repo.seed("data/keys/key1d.txt", "K1\n");
        let retry = RetryPolicy {
            base_backoff: Duration::from_millis(1),
            ..RetryPolicy::default()
        };
        let store = RemoteKeyStore::new(
            repo.client("ghp_bad", retry),
            KeyLayout::default(),
            periods(),
        );
        let app = build_admin_router(AdminState::new(Arc::new(store)));

        let (status, json) = send(app, "POST", "/admin/keys/1d/dispense", None).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["error"]["type"], "remote_auth");
        assert_eq!(repo.file("data/keys/key1d.txt").as_deref(), Some("K1\n"));
    }

    #[tokio::test]
    async fn remote_dispense_through_api() {
        let repo = MockRepo::start("ghp_good").await;
        repo.seed("data/keys/key1d.txt", "K1\nK2\n");
        let retry = RetryPolicy {
            base_backoff: Duration::from_millis(1),
            ..RetryPolicy::default()
        };
        let store = RemoteKeyStore::new(
            repo.client("ghp_good", retry),
            KeyLayout::default(),
            periods(),
        );
        let app = build_admin_router(AdminState::new(Arc::new(store)));

        let (status, json) = send(app, "POST", "/admin/keys/1d/dispense", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["key"], "K1");
        assert_eq!(repo.file("data/keys/key_solved.txt").as_deref(), Some("K1\n"));
    }
}
