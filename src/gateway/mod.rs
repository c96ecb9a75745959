//! Axum-based persistence gateway with body limits, timeouts, and
//! allow-list CORS.
//!
//! The write path is the only way the content snapshot mutates:
//! structural checks reject a malformed batch before any storage write,
//! authorization is capability- or editor-token-gated, rate limiting is
//! per principal, and per-field validation failures surface in the
//! response instead of aborting the batch. Reads are public; serving
//! published content is not a privileged operation.

use crate::bridge::normalize_origin;
use crate::config::BridgeConfig;
use crate::content::ContentStore;
use crate::ledger::FieldChange;
use crate::security::{AuthError, CapabilityGuard, GatewayRateLimiter, NonceStore};
use anyhow::Result;
use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Request timeout: batch writes are small; anything slower is abuse.
const REQUEST_TIMEOUT_SECS: u64 = 30;

type GatewayResponse = (StatusCode, Json<serde_json::Value>);

/// Shared state for all axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ContentStore>,
    pub capability: Arc<CapabilityGuard>,
    pub nonces: Arc<NonceStore>,
    pub limiter: Arc<GatewayRateLimiter>,
    pub http: reqwest::Client,
    pub rebuild_hook_url: Option<String>,
    pub batches_per_minute: u32,
    pub started_at: Instant,
    pub last_save: Arc<Mutex<Option<u64>>>,
}

impl AppState {
    pub fn new(config: &BridgeConfig, store: Arc<ContentStore>) -> Self {
        Self {
            store,
            capability: Arc::new(CapabilityGuard::new(
                config.gateway.capability_key.clone(),
                config.gateway.editor_tokens.clone(),
            )),
            nonces: Arc::new(NonceStore::new()),
            limiter: Arc::new(GatewayRateLimiter::new(config.gateway.batches_per_minute)),
            http: reqwest::Client::new(),
            rebuild_hook_url: config.gateway.rebuild_hook_url.clone(),
            batches_per_minute: config.gateway.batches_per_minute,
            started_at: Instant::now(),
            last_save: Arc::new(Mutex::new(None)),
        }
    }
}

/// Run the gateway until the process exits.
pub async fn run_gateway(config: &BridgeConfig, store: Arc<ContentStore>) -> Result<()> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr, "persistence gateway listening");

    let state = AppState::new(config, store);
    if !state.capability.is_configured() {
        tracing::warn!("no capability key or editor tokens configured; every write will be rejected");
    }

    let app = router(state, &config.gateway.allowed_origins)
        .layer(RequestBodyLimitLayer::new(config.gateway.max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(REQUEST_TIMEOUT_SECS)));

    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the route table with allow-list CORS.
///
/// The CORS layer echoes `Access-Control-Allow-Origin` only for origins
/// on the configured list, never `*`, and short-circuits preflight
/// OPTIONS with 200 and no body.
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    let allowed: Vec<String> = allowed_origins
        .iter()
        .filter_map(|o| normalize_origin(o))
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _request_parts| {
                origin
                    .to_str()
                    .ok()
                    .and_then(normalize_origin)
                    .is_some_and(|o| allowed.contains(&o))
            },
        ))
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-capability-key"),
            header::HeaderName::from_static("x-edit-nonce"),
        ])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(handle_health))
        .route("/content", get(handle_content))
        .route("/content/save-batch", post(handle_save_batch))
        .route("/debug", get(handle_debug))
        .with_state(state)
        .layer(cors)
}

// ══════════════════════════════════════════════════════════════════════════════
// HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

/// GET /content: the full content snapshot plus metadata. Public.
async fn handle_content(State(state): State<AppState>) -> GatewayResponse {
    let snapshot = match state.store.snapshot() {
        Ok(s) => s,
        Err(error) => {
            tracing::error!(%error, "failed to read content snapshot");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "storage unavailable"})),
            );
        }
    };

    let mut body = serde_json::Map::new();
    for (name, value) in &snapshot.values {
        body.insert(name.clone(), serde_json::Value::String(value.clone()));
    }
    body.insert(
        "_metadata".to_string(),
        serde_json::json!({
            "last_updated": snapshot.last_updated,
            "total_fields": snapshot.field_count,
        }),
    );

    (StatusCode::OK, Json(serde_json::Value::Object(body)))
}

/// Request body for the batch write endpoint.
#[derive(Debug, Deserialize)]
struct SaveBatchBody {
    changes: Vec<FieldChange>,
    #[serde(default)]
    trigger_rebuild: bool,
}

/// Resolve write credentials from headers. Terminal on failure.
fn require_write_auth(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<crate::security::Principal, GatewayResponse> {
    let capability = headers
        .get("x-capability-key")
        .and_then(|v| v.to_str().ok());
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let nonce = headers.get("x-edit-nonce").and_then(|v| v.to_str().ok());

    state
        .capability
        .authorize(capability, bearer, nonce, &state.nonces)
        .map_err(|error| {
            let status = match error {
                AuthError::Missing => StatusCode::UNAUTHORIZED,
                AuthError::Invalid | AuthError::Replayed => StatusCode::FORBIDDEN,
            };
            tracing::warn!(%error, "rejected write");
            (status, Json(serde_json::json!({"error": error.to_string()})))
        })
}

/// POST /content/save-batch: validate, sanitize, and persist a batch.
///
/// 200 on full success, 207 when some fields failed validation, 4xx on
/// structural/auth/rate-limit failure before any storage write.
async fn handle_save_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SaveBatchBody>, axum::extract::rejection::JsonRejection>,
) -> GatewayResponse {
    let body = match body {
        Ok(Json(b)) => b,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": format!("invalid request body: {e}")})),
            );
        }
    };

    let principal = match require_write_auth(&state, &headers) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    if !state.limiter.allow_save(&principal.rate_key()) {
        tracing::warn!(principal = %principal.rate_key(), "batch write rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": "too many batch writes; retry later",
                "retry_after": crate::security::RATE_LIMIT_WINDOW_SECS,
            })),
        );
    }

    // Structural checks: reject the whole batch before any storage write.
    if body.changes.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "changes must be a non-empty list"})),
        );
    }
    if body.changes.iter().any(|c| c.field_name.trim().is_empty()) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "every change needs a field_name"})),
        );
    }

    let result = match state.store.save_batch(&body.changes) {
        Ok(r) => r,
        Err(error) => {
            tracing::error!(%error, "batch persistence failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "storage failure; nothing was saved"})),
            );
        }
    };

    if result.saved_count > 0 {
        *state.last_save.lock() = Some(epoch_secs());
        if body.trigger_rebuild {
            fire_rebuild_hook(&state);
        }
    }

    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    let body = serde_json::to_value(&result).unwrap_or_else(|_| serde_json::json!({}));
    (status, Json(body))
}

/// Kick the configured rebuild hook without waiting on it. A hook
/// failure never changes the save's reported outcome.
fn fire_rebuild_hook(state: &AppState) {
    let Some(url) = state.rebuild_hook_url.clone() else {
        return;
    };
    let http = state.http.clone();
    tokio::spawn(async move {
        match http.post(&url).send().await {
            Ok(response) => {
                tracing::info!(status = %response.status(), "rebuild hook triggered")
            }
            Err(error) => tracing::warn!(%error, "rebuild hook failed"),
        }
    });
}

/// GET /debug: non-sensitive operational snapshot. Public, read-only;
/// counts and timestamps only, never credentials.
async fn handle_debug(State(state): State<AppState>) -> GatewayResponse {
    let (total_fields, last_updated) = match state.store.snapshot() {
        Ok(s) => (s.field_count, s.last_updated),
        Err(_) => (0, None),
    };

    let last_save = *state.last_save.lock();
    let last_save_rfc3339 = last_save
        .and_then(|secs| chrono::DateTime::<chrono::Utc>::from_timestamp(secs as i64, 0))
        .map(|dt| dt.to_rfc3339());

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "capability_configured": state.capability.capability_configured(),
            "editor_tokens": state.capability.editor_token_count(),
            "total_fields": total_fields,
            "last_updated": last_updated,
            "last_save": last_save_rfc3339,
            "uptime_secs": state.started_at.elapsed().as_secs(),
            "rate_limit_per_minute": state.batches_per_minute,
        })),
    )
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Tests ───────────────────────────────────────────────────────
