use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::{sync::Arc, time::Instant};
use tokio::sync::{Mutex, RwLock};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    engine::DemandEngine,
    error::{AppError, EngineError},
    jobs::{JobRegistry, TrainingJob},
    predictor::Recommendation,
    rows,
    types::{DemandRecord, ModelInfo, TrainAccepted, TrainRequest, TrainingRow, TrainingSummary},
};

/// Shared service state.
///
/// The engine does no locking of its own. `training_slot` lets one training
/// job run at a time, and `generation_gate` keeps predictions (read side) from
/// overlapping a snapshot swap (write side).
#[derive(Clone)]
pub struct AppState {
    engine: Arc<DemandEngine>,
    jobs: Arc<JobRegistry>,
    training_slot: Arc<Mutex<()>>,
    generation_gate: Arc<RwLock<()>>,
    metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(engine: DemandEngine, jobs: JobRegistry, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            engine: Arc::new(engine),
            jobs: Arc::new(jobs),
            training_slot: Arc::new(Mutex::new(())),
            generation_gate: Arc::new(RwLock::new(())),
            metrics,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/train", post(submit_training))
        .route("/train/:job_id", get(training_status))
        .route("/predict", post(predict))
        .route("/model", get(model_info))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn submit_training(
    State(state): State<AppState>,
    Json(request): Json<TrainRequest>,
) -> Result<(StatusCode, Json<TrainAccepted>), AppError> {
    let rows = rows::normalize_rows(&request.rows);
    if rows.is_empty() {
        return Err(EngineError::EmptyDataset.into());
    }

    let job = state.jobs.submit(rows.len());
    info!(
        "Queued training job {} with {} rows ({} jobs tracked)",
        job.job_id,
        rows.len(),
        state.jobs.len()
    );

    tokio::spawn(run_training_job(state.clone(), job.job_id, rows));

    Ok((
        StatusCode::ACCEPTED,
        Json(TrainAccepted {
            job_id: job.job_id,
            status: job.state.label().to_string(),
        }),
    ))
}

async fn run_training_job(state: AppState, job_id: Uuid, rows: Vec<TrainingRow>) {
    let _slot = state.training_slot.lock().await;
    state.jobs.mark_running(&job_id);
    let start = Instant::now();

    let result = train_and_commit(&state, rows).await;
    metrics::histogram!("training_duration_seconds").record(start.elapsed().as_secs_f64());

    match result {
        Ok(summary) => {
            metrics::counter!("training_runs_total", "outcome" => "succeeded").increment(1);
            info!("Training job {} produced model {}", job_id, summary.generation);
            state.jobs.complete(&job_id, summary);
        }
        Err(e) => {
            metrics::counter!("training_runs_total", "outcome" => "failed").increment(1);
            warn!("Training job {} failed: {}", job_id, e);
            state.jobs.fail(&job_id, e.to_string());
        }
    }
}

async fn train_and_commit(state: &AppState, rows: Vec<TrainingRow>) -> Result<TrainingSummary, AppError> {
    let engine = state.engine.clone();
    let (snapshot, summary) = tokio::task::spawn_blocking(move || engine.fit(&rows)).await??;

    let _gate = state.generation_gate.write().await;
    let engine = state.engine.clone();
    tokio::task::spawn_blocking(move || engine.commit(&snapshot)).await??;

    Ok(summary)
}

async fn training_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<TrainingJob>, AppError> {
    state
        .jobs
        .get(&job_id)
        .map(Json)
        .ok_or(AppError::JobNotFound(job_id))
}

async fn predict(
    State(state): State<AppState>,
    Json(record): Json<DemandRecord>,
) -> Result<Json<Recommendation>, AppError> {
    let start = Instant::now();

    let result = {
        let _gate = state.generation_gate.read().await;
        let engine = state.engine.clone();
        tokio::task::spawn_blocking(move || engine.predict(&record)).await?
    };

    metrics::histogram!("prediction_duration_ms").record(start.elapsed().as_secs_f64() * 1000.0);
    let outcome = if result.is_ok() { "succeeded" } else { "failed" };
    metrics::counter!("predictions_total", "outcome" => outcome).increment(1);

    Ok(Json(result?))
}

async fn model_info(State(state): State<AppState>) -> Result<Json<ModelInfo>, AppError> {
    let _gate = state.generation_gate.read().await;
    let engine = state.engine.clone();
    let info = tokio::task::spawn_blocking(move || engine.model_info()).await??;
    Ok(Json(info))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn metrics_endpoint(State(state): State<AppState>) -> String {
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default()
}
