//! HTTP surface
//!
//! Endpoints:
//! - POST   /api/analyze       strategy description → suggested settings
//! - POST   /api/consult       interview turn
//! - POST   /api/spec          settings → specification (optionally saved)
//! - POST   /api/code          specification → MQL5 source
//! - POST   /api/code/fix      source + compiler log → repaired source
//! - POST   /api/simulate      logic audit report
//! - GET    /api/keys          key settings text + pool status
//! - PUT    /api/keys          replace keys, resets exhaustion
//! - GET    /api/model         model preference
//! - PUT    /api/model         set model preference
//! - GET    /api/history       saved generations, newest first
//! - POST   /api/history       save a generation
//! - DELETE /api/history       clear history
//! - DELETE /api/history/{id}  delete one record
//! - GET    /health            uptime, counters, pool status
//! - GET    /metrics           Prometheus exposition

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use key_pool::{CredentialPool, ModelPreference, ModelSelection, TaskWeight};
use key_store::{HistoryStore, KeyStore, KvStore, SavedPrompt};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::architect::{Architect, ChatMessage, GenerationResult};
use crate::error::{Error, Result, request_id};

/// Request counters reported by `/health`
#[derive(Debug, Clone)]
pub struct ServiceMetrics {
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }
}

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub architect: Arc<Architect>,
    pub pool: Arc<CredentialPool>,
    pub history: HistoryStore,
    pub store: Arc<KvStore>,
    pub metrics: ServiceMetrics,
    pub prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// A concurrency limit layer caps in-flight requests at `max_connections`.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/api/analyze", post(analyze))
        .route("/api/consult", post(consult))
        .route("/api/spec", post(spec))
        .route("/api/code", post(code))
        .route("/api/code/fix", post(fix_code))
        .route("/api/simulate", post(simulate))
        .route("/api/keys", get(get_keys).put(put_keys))
        .route("/api/model", get(get_model).put(put_model))
        .route(
            "/api/history",
            get(list_history).post(save_history).delete(clear_history),
        )
        .route("/api/history/{id}", delete(delete_history))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

fn json_ok(status: StatusCode, body: &impl Serialize) -> Response {
    match serde_json::to_string(body) {
        Ok(text) => (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            text,
        )
            .into_response(),
        Err(e) => crate::error::error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            &format!("response encoding failed: {e}"),
            "",
        ),
    }
}

fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| Error::InvalidRequest(e.body_text()))
}

/// Run one operation: count it, time it, and map the outcome to a response.
async fn run<T, F>(state: &AppState, operation: &'static str, request_id: &str, work: F) -> Response
where
    T: Serialize,
    F: Future<Output = Result<T>>,
{
    run_with_status(state, operation, request_id, StatusCode::OK, work).await
}

async fn run_with_status<T, F>(
    state: &AppState,
    operation: &'static str,
    request_id: &str,
    status: StatusCode,
    work: F,
) -> Response
where
    T: Serialize,
    F: Future<Output = Result<T>>,
{
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
    let started = Instant::now();
    let result = work.await;
    let elapsed = started.elapsed().as_secs_f64();

    match result {
        Ok(value) => {
            crate::metrics::record_operation(operation, "ok", elapsed);
            info!(operation, elapsed_secs = elapsed, "operation completed");
            json_ok(status, &value)
        }
        Err(e) => {
            state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_operation(operation, e.kind(), elapsed);
            warn!(operation, kind = e.kind(), error = %e, "operation failed");
            e.into_response(request_id)
        }
    }
}

#[derive(Deserialize)]
struct AnalyzeRequest {
    description: String,
}

#[instrument(skip_all, fields(request_id = %request_id))]
async fn analyze_inner(
    state: AppState,
    payload: std::result::Result<Json<AnalyzeRequest>, JsonRejection>,
    request_id: String,
) -> Response {
    run(&state, "analyze", &request_id, async {
        let req = body(payload)?;
        state.architect.analyze_strategy(&req.description).await
    })
    .await
}

async fn analyze(
    State(state): State<AppState>,
    payload: std::result::Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Response {
    analyze_inner(state, payload, request_id()).await
}

#[derive(Deserialize)]
struct ConsultRequest {
    #[serde(default)]
    history: Vec<ChatMessage>,
    message: String,
}

#[derive(Serialize)]
struct ConsultResponse {
    reply: String,
}

#[instrument(skip_all, fields(request_id = %request_id))]
async fn consult_inner(
    state: AppState,
    payload: std::result::Result<Json<ConsultRequest>, JsonRejection>,
    request_id: String,
) -> Response {
    run(&state, "consult", &request_id, async {
        let req = body(payload)?;
        let reply = state.architect.consult(&req.history, &req.message).await?;
        Ok::<_, Error>(ConsultResponse { reply })
    })
    .await
}

async fn consult(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ConsultRequest>, JsonRejection>,
) -> Response {
    consult_inner(state, payload, request_id()).await
}

#[derive(Deserialize)]
struct SpecRequest {
    settings: Value,
    #[serde(default)]
    save: bool,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Serialize)]
struct SpecResponse {
    #[serde(flatten)]
    result: GenerationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    saved: Option<SavedPrompt>,
}

/// History name: explicit name, then the generated title, then the
/// settings' own name.
fn record_name(explicit: Option<String>, result: &GenerationResult, settings: &Value) -> String {
    explicit
        .filter(|n| !n.trim().is_empty())
        .or_else(|| result.title.clone().filter(|t| !t.trim().is_empty()))
        .or_else(|| settings.get("name").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "Untitled strategy".to_string())
}

async fn spec(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SpecRequest>, JsonRejection>,
) -> Response {
    spec_inner(state, payload, request_id()).await
}

#[instrument(skip_all, fields(request_id = %request_id))]
async fn spec_inner(
    state: AppState,
    payload: std::result::Result<Json<SpecRequest>, JsonRejection>,
    request_id: String,
) -> Response {
    run(&state, "spec", &request_id, async {
        let req = body(payload)?;
        let result = state.architect.generate_spec(&req.settings).await?;
        let saved = if req.save {
            let name = record_name(req.name, &result, &req.settings);
            Some(
                state
                    .history
                    .save(name, req.settings, result.prompt.clone())
                    .await?,
            )
        } else {
            None
        };
        Ok::<_, Error>(SpecResponse { result, saved })
    })
    .await
}

#[derive(Deserialize)]
struct CodeRequest {
    spec: String,
}

#[derive(Serialize)]
struct CodeResponse {
    code: String,
}

async fn code(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CodeRequest>, JsonRejection>,
) -> Response {
    code_inner(state, payload, request_id()).await
}

#[instrument(skip_all, fields(request_id = %request_id))]
async fn code_inner(
    state: AppState,
    payload: std::result::Result<Json<CodeRequest>, JsonRejection>,
    request_id: String,
) -> Response {
    run(&state, "code", &request_id, async {
        let req = body(payload)?;
        let code = state.architect.generate_code(&req.spec).await?;
        Ok::<_, Error>(CodeResponse { code })
    })
    .await
}

#[derive(Deserialize)]
struct FixRequest {
    code: String,
    error_log: String,
}

async fn fix_code(
    State(state): State<AppState>,
    payload: std::result::Result<Json<FixRequest>, JsonRejection>,
) -> Response {
    fix_code_inner(state, payload, request_id()).await
}

#[instrument(skip_all, fields(request_id = %request_id))]
async fn fix_code_inner(
    state: AppState,
    payload: std::result::Result<Json<FixRequest>, JsonRejection>,
    request_id: String,
) -> Response {
    run(&state, "fix", &request_id, async {
        let req = body(payload)?;
        let code = state.architect.fix_code(&req.code, &req.error_log).await?;
        Ok::<_, Error>(CodeResponse { code })
    })
    .await
}

#[derive(Deserialize)]
struct SimulateRequest {
    spec: String,
    code: String,
    symbol: String,
}

#[derive(Serialize)]
struct SimulateResponse {
    report: String,
}

async fn simulate(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SimulateRequest>, JsonRejection>,
) -> Response {
    simulate_inner(state, payload, request_id()).await
}

#[instrument(skip_all, fields(request_id = %request_id))]
async fn simulate_inner(
    state: AppState,
    payload: std::result::Result<Json<SimulateRequest>, JsonRejection>,
    request_id: String,
) -> Response {
    run(&state, "simulate", &request_id, async {
        let req = body(payload)?;
        let report = state
            .architect
            .simulate(&req.spec, &req.code, &req.symbol)
            .await?;
        Ok::<_, Error>(SimulateResponse { report })
    })
    .await
}

/// GET /api/keys: the user's own keys as settings text, plus pool status.
///
/// The environment fallback key is never returned; only whether one exists.
async fn get_keys(State(state): State<AppState>) -> Response {
    let raw_text = KeyStore::new(state.store.clone()).raw_text().await;
    json_ok(
        StatusCode::OK,
        &json!({
            "raw_text": raw_text,
            "has_fallback": state.pool.has_fallback(),
            "pool": state.pool.snapshot().await,
        }),
    )
}

#[derive(Deserialize)]
struct KeysRequest {
    raw_text: String,
}

/// PUT /api/keys: replace the key list and reset exhaustion.
async fn put_keys(
    State(state): State<AppState>,
    payload: std::result::Result<Json<KeysRequest>, JsonRejection>,
) -> Response {
    run(&state, "keys", &request_id(), async {
        let req = body(payload)?;
        let keys = key_store::parse_raw_text(&req.raw_text);
        let saved = state.pool.save(&keys).await?;
        info!(keys = saved.len(), "API keys updated");
        Ok::<_, Error>(json!({
            "saved": saved.len(),
            "pool": state.pool.snapshot().await,
        }))
    })
    .await
}

fn model_body(selection: &ModelSelection) -> Value {
    let resolved = selection.ensure_ready().is_ok();
    json!({
        "preference": selection.preference,
        "custom_model": selection.custom_model,
        "models": if resolved {
            json!({
                "light": selection.resolve(TaskWeight::Light),
                "heavy": selection.resolve(TaskWeight::Heavy),
            })
        } else {
            Value::Null
        },
    })
}

/// GET /api/model: stored preference and the models it resolves to.
async fn get_model(State(state): State<AppState>) -> Response {
    let selection = ModelSelection::load(&state.store).await;
    json_ok(StatusCode::OK, &model_body(&selection))
}

#[derive(Deserialize)]
struct ModelRequest {
    preference: ModelPreference,
    #[serde(default)]
    custom_model: Option<String>,
}

/// PUT /api/model: persist a preference. Custom requires a model name.
async fn put_model(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ModelRequest>, JsonRejection>,
) -> Response {
    run(&state, "model", &request_id(), async {
        let req = body(payload)?;
        let selection = ModelSelection {
            preference: req.preference,
            custom_model: req.custom_model.map(|m| m.trim().to_string()),
        };
        selection.save(&state.store).await?;
        Ok::<_, Error>(model_body(&selection))
    })
    .await
}

/// GET /api/history: all saved generations, newest first.
async fn list_history(State(state): State<AppState>) -> Response {
    let records = state.history.list().await;
    json_ok(StatusCode::OK, &json!({ "records": records }))
}

#[derive(Deserialize)]
struct HistoryRequest {
    name: String,
    settings: Value,
    prompt: String,
}

/// POST /api/history: save a generation record.
async fn save_history(
    State(state): State<AppState>,
    payload: std::result::Result<Json<HistoryRequest>, JsonRejection>,
) -> Response {
    let work = async {
        let req = body(payload)?;
        Ok::<_, Error>(state.history.save(req.name, req.settings, req.prompt).await?)
    };
    run_with_status(&state, "history", &request_id(), StatusCode::CREATED, work).await
}

/// DELETE /api/history: drop every record.
async fn clear_history(State(state): State<AppState>) -> Response {
    match state.history.clear().await {
        Ok(()) => {
            info!("history cleared");
            json_ok(StatusCode::OK, &json!({ "status": "cleared" }))
        }
        Err(e) => Error::from(e).into_response(&request_id()),
    }
}

/// DELETE /api/history/{id}: remove one record.
async fn delete_history(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.history.delete(&id).await {
        Ok(true) => json_ok(StatusCode::OK, &json!({ "id": id, "status": "deleted" })),
        Ok(false) => Error::NotFound(format!("history record {id}")).into_response(&request_id()),
        Err(e) => Error::from(e).into_response(&request_id()),
    }
}

/// Health endpoint: uptime, request counts and pool status.
///
/// Returns 200 while at least one key is available, 503 otherwise.
async fn health_handler(State(state): State<AppState>) -> Response {
    let uptime = state.metrics.started_at.elapsed().as_secs();
    let requests = state.metrics.requests_total.load(Ordering::Relaxed);
    let errors = state.metrics.errors_total.load(Ordering::Relaxed);
    let pool = state.pool.snapshot().await;

    let status = pool["status"].as_str().unwrap_or("unhealthy").to_string();
    let code = if status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    json_ok(
        code,
        &json!({
            "status": status,
            "uptime_seconds": uptime,
            "requests_served": requests,
            "errors_total": errors,
            "pool": pool,
        }),
    )
}

/// Prometheus text exposition.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}
