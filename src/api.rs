//! # Admin Surface
//! Thin HTTP wrapper over the operations the core exposes to external
//! collaborators: trigger a sweep, recalculate/inspect thresholds, reconcile
//! schedules. The CRUD surface and its UI live elsewhere; this router only
//! exists so operators can poke the running service.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::app::App;
use crate::feed::FeedError;
use crate::ingest::scheduler::ReconcilePlan;
use crate::ingest::{SweepError, SweepReport};
use crate::model::ThresholdMethod;
use crate::stats::{self, ThresholdStats};
use crate::store::StoreError;

pub fn create_router(app: Arc<App>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/sources/{id}/sweep", post(trigger_sweep))
        .route("/sources/{id}/threshold/recalculate", post(recalculate))
        .route("/sources/{id}/threshold/stats", get(threshold_stats))
        .route("/schedules/reconcile", post(reconcile))
        .layer(CorsLayer::very_permissive())
        .with_state(app)
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<SweepError> for ApiError {
    fn from(e: SweepError) -> Self {
        let status = match &e {
            SweepError::Feed(FeedError::NotFound(_)) => StatusCode::NOT_FOUND,
            SweepError::Feed(FeedError::Auth(_)) => StatusCode::BAD_GATEWAY,
            SweepError::Feed(_) => StatusCode::BAD_GATEWAY,
            SweepError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            SweepError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
            SweepError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SweepError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{e:#}"),
        }
    }
}

async fn trigger_sweep(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
) -> Result<Json<SweepReport>, ApiError> {
    let report = app.trigger_sweep(&id).await?;
    Ok(Json(report))
}

#[derive(serde::Deserialize)]
struct RecalculateReq {
    method: ThresholdMethod,
    #[serde(default = "default_sample_size")]
    sample_size: u32,
    #[serde(default)]
    multiplier: Option<f64>,
}

fn default_sample_size() -> u32 {
    stats::SAMPLE_SIZE_DEFAULT
}

async fn recalculate(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
    Json(body): Json<RecalculateReq>,
) -> Result<Json<ThresholdStats>, ApiError> {
    let stats = app
        .recalculate_threshold(&id, body.method, body.sample_size, body.multiplier)
        .await?;
    Ok(Json(stats))
}

async fn threshold_stats(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
) -> Result<Json<ThresholdStats>, ApiError> {
    let stats = app.threshold_stats(&id).await?;
    Ok(Json(stats))
}

async fn reconcile(State(app): State<Arc<App>>) -> Result<Json<ReconcilePlan>, ApiError> {
    let plan = app.reconcile().await?;
    Ok(Json(plan))
}
