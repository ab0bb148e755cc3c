use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::RwLock;
use serde_json::json;
use thiserror::Error;
use tokio::sync::Semaphore;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::config::Settings;
use crate::models::{
    ArtStyle, GenerateRequest, GenerateResponse, GenerationRequest, HealthResponse, JobRecord, JobState,
    PipelineResult, StatusResponse,
};
use crate::pdf::generate_pdf;
use crate::pipeline::ComicPipeline;

pub type JobStore = Arc<RwLock<HashMap<Uuid, JobRecord>>>;

#[derive(Clone)]
pub struct AppState {
    pub store: JobStore,
    pub pipeline: Arc<ComicPipeline>,
    pub permits: Arc<Semaphore>,
    pub panel_range: RangeInclusive<usize>,
}

impl AppState {
    pub fn new(pipeline: ComicPipeline, settings: &Settings) -> Self {
        Self {
            store: Arc::default(),
            pipeline: Arc::new(pipeline),
            permits: Arc::new(Semaphore::new(settings.max_concurrent_jobs)),
            panel_range: settings.panel_range(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("Job not found")]
    NotFound,
    #[error("Job {0} has not finished")]
    NotReady(Uuid),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::NotReady(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/generate", post(generate_comic))
        .route("/status/:job_id", get(check_status))
        .route("/comics/:job_id/comic.png", get(comic_png))
        .route("/comics/:job_id/comic.pdf", get(comic_pdf))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

pub async fn generate_comic(
    State(state): State<AppState>,
    Json(body): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let style = body
        .style
        .parse::<ArtStyle>()
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    if !state.panel_range.contains(&body.panels) {
        return Err(ApiError::Validation(format!(
            "Panel count must be between {} and {}",
            state.panel_range.start(),
            state.panel_range.end()
        )));
    }
    if body.text.trim().is_empty() {
        return Err(ApiError::Validation("Prompt text must not be empty".into()));
    }

    let id = Uuid::new_v4();
    let request = GenerationRequest { prompt: body.text, style, panel_count: body.panels };
    state.store.write().insert(id, JobRecord::pending(id, request.clone()));
    tracing::info!(job_id = %id, panels = request.panel_count, style = %style, "🚀 Comic job accepted");

    tokio::spawn(run_job(state, id, request));
    Ok(Json(GenerateResponse { job_id: id }))
}

/// Waits for an admission permit, then runs the pipeline and records the outcome.
pub async fn run_job(state: AppState, id: Uuid, request: GenerationRequest) {
    let _permit = match state.permits.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            tracing::error!(job_id = %id, "❌ Admission closed, job dropped");
            return;
        }
    };

    if let Some(job) = state.store.write().get_mut(&id) {
        job.mark_processing();
    }

    let result = state.pipeline.run(&request, Some(id)).await;

    if let Some(job) = state.store.write().get_mut(&id) {
        job.finish(result);
        tracing::info!(job_id = %id, state = ?job.state, "✅ Comic job finished");
    }
}

pub async fn check_status(Path(job_id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let store = state.store.read();
    let job = store.get(&job_id).ok_or(ApiError::NotFound)?;
    Ok(Json(StatusResponse::from(job)))
}

fn finished_result(state: &AppState, job_id: Uuid) -> Result<PipelineResult, ApiError> {
    let store = state.store.read();
    let job = store.get(&job_id).ok_or(ApiError::NotFound)?;
    match (&job.state, &job.result) {
        (JobState::Done, Some(result)) => Ok(result.clone()),
        _ => Err(ApiError::NotReady(job_id)),
    }
}

pub async fn comic_png(Path(job_id): Path<Uuid>, State(state): State<AppState>) -> Result<Response, ApiError> {
    let result = finished_result(&state, job_id)?;
    let png = result
        .decode_comic()
        .map_err(|e| ApiError::Internal(format!("stored comic is not valid base64: {e}")))?
        .ok_or(ApiError::NotReady(job_id))?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

pub async fn comic_pdf(Path(job_id): Path<Uuid>, State(state): State<AppState>) -> Result<Response, ApiError> {
    let result = finished_result(&state, job_id)?;
    let pdf_bytes = generate_pdf(&result).map_err(|e| ApiError::Internal(format!("PDF rendering failed: {e}")))?;
    let disposition = format!("attachment; filename=\"comic_{job_id}.pdf\"");
    Ok((
        [(header::CONTENT_TYPE, "application/pdf".to_string()), (header::CONTENT_DISPOSITION, disposition)],
        pdf_bytes,
    )
        .into_response())
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok".to_string() })
}

pub async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Prompt-to-Comic API",
        "version": env!("CARGO_PKG_VERSION"),
        "styles": ArtStyle::ALL.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
    }))
}
