use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use dealrisk_core::crm::ConnectionStatus;
use dealrisk_core::domain::deal::{AnalyzedDeal, RiskSummary, RunOutcome};
use dealrisk_core::pipeline::{AnalysisPipeline, RunRequest, DEFAULT_FETCH_LIMIT};
use dealrisk_core::sinks::{ExportOutcome, ExportRows};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: AnalysisPipeline,
    pub default_sheet_id: Option<String>,
}

impl AppState {
    fn sheet_id(&self, requested: Option<String>) -> Option<String> {
        requested
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| self.default_sheet_id.clone())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/api/hubspot/test", get(hubspot_test))
        .route("/api/hubspot/deals", get(hubspot_deals))
        .route("/api/hubspot/sync", post(hubspot_sync))
        .route("/api/analyze", post(trigger_analysis))
        .route("/api/deals", get(get_deals))
        .route("/api/status", get(get_status))
        .route("/api/sheets/read", get(sheets_read))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn root() -> Json<Value> {
    Json(json!({"message": "Deal Risk API", "status": "running"}))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn hubspot_test(State(state): State<AppState>) -> Json<ConnectionStatus> {
    Json(state.pipeline.source().check_connection().await)
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn hubspot_deals(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let limit = q.limit.unwrap_or(DEFAULT_FETCH_LIMIT);
    match state.pipeline.source().fetch_raw(limit).await {
        Ok(deals) => Ok(Json(json!({"count": deals.len(), "deals": deals}))),
        Err(err) => {
            tracing::warn!(error = %err, "raw deal fetch failed");
            Err((
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": err.to_string()})),
            ))
        }
    }
}

#[derive(Debug, Deserialize)]
struct SheetQuery {
    sheet_id: Option<String>,
    range: Option<String>,
}

async fn trigger_analysis(
    State(state): State<AppState>,
    Query(q): Query<SheetQuery>,
) -> Json<RunOutcome> {
    let outcome = state
        .pipeline
        .run(RunRequest {
            export_target: state.sheet_id(q.sheet_id),
            notify: true,
        })
        .await;

    if !outcome.is_success() {
        sentry::capture_message(
            &format!("analysis run failed: {}", outcome.message),
            sentry::Level::Error,
        );
    }
    Json(outcome)
}

#[derive(Debug, Serialize)]
struct DealsResponse {
    deals: Vec<AnalyzedDeal>,
    count: usize,
}

async fn get_deals(State(state): State<AppState>) -> Json<DealsResponse> {
    let deals = state.pipeline.store().deals().await;
    Json(DealsResponse {
        count: deals.len(),
        deals,
    })
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    last_analysis: Option<DateTime<Utc>>,
    analysis_in_progress: bool,
    summary: RiskSummary,
}

async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let store = state.pipeline.store();
    Json(StatusResponse {
        status: "running",
        last_analysis: store.last_run_timestamp().await,
        analysis_in_progress: state.pipeline.is_running(),
        summary: store.summary().await,
    })
}

async fn hubspot_sync(
    State(state): State<AppState>,
    Query(q): Query<SheetQuery>,
) -> Json<ExportOutcome> {
    let deals = state.pipeline.store().deals().await;
    if deals.is_empty() {
        return Json(ExportOutcome::failed("No analyzed deals to sync"));
    }

    let sheet_id = state.sheet_id(q.sheet_id).unwrap_or_default();
    let outcome = state.pipeline.exporter().export(&sheet_id, &deals).await;
    if !outcome.synced {
        tracing::warn!(sheet_id = %sheet_id, error = ?outcome.error, "manual sync failed");
    }
    Json(outcome)
}

async fn sheets_read(
    State(state): State<AppState>,
    Query(q): Query<SheetQuery>,
) -> Result<Json<ExportRows>, (StatusCode, Json<Value>)> {
    let Some(sheet_id) = state.sheet_id(q.sheet_id) else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "sheet_id is required"})),
        ));
    };

    state
        .pipeline
        .exporter()
        .read(&sheet_id, q.range.as_deref())
        .await
        .map(Json)
        .map_err(|e| {
            sentry_anyhow::capture_anyhow(&e);
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": format!("{e:#}")})),
            )
        })
}
