//! HTTP handlers for Run lifecycle: start, poll, list jobs, re-run individual
//! stages, cancel.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatch::{send_outreach, DispatchOutcome};
use crate::enrich::{enrich_run, EnrichOutcome};
use crate::errors::AppError;
use crate::generation::{generate_documents, Selection};
use crate::matching::ScoreMode;
use crate::models::job::JobRecord;
use crate::models::run::{Run, RunStage, StageProgress};
use crate::pipeline::{execute_run, fail_run};
use crate::state::AppState;
use crate::store::JobFilter;

#[derive(Deserialize)]
pub struct StartRunRequest {
    pub query: String,
    pub resume_text: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub score_mode: Option<ScoreMode>,
    #[serde(default)]
    pub match_threshold: Option<i32>,
    #[serde(default)]
    pub max_emails: Option<usize>,
    /// Overrides the configured send mode for this Run only.
    #[serde(default)]
    pub dry_run: Option<bool>,
}

#[derive(Serialize)]
pub struct StartRunResponse {
    pub run_id: Uuid,
    pub stage: RunStage,
}

/// POST /api/v1/runs
///
/// Creates the Run and spawns the pipeline; returns immediately with the id
/// to poll.
pub async fn handle_start_run(
    State(state): State<AppState>,
    Json(req): Json<StartRunRequest>,
) -> Result<(StatusCode, Json<StartRunResponse>), AppError> {
    if req.query.trim().is_empty() {
        return Err(AppError::Validation("query must not be empty".into()));
    }
    if req.resume_text.trim().is_empty() {
        return Err(AppError::Validation("resume_text must not be empty".into()));
    }

    let run = Run::new(&req.query, &req.resume_text);
    state.store.create_run(&run).await?;

    let mut options = state.pipeline_options();
    options.sources = req.sources;
    if let Some(mode) = req.score_mode {
        options.score_mode = mode;
    }
    if let Some(threshold) = req.match_threshold {
        options.generate.match_threshold = threshold;
    }
    if let Some(max) = req.max_emails {
        options.dispatch.max_emails = max;
    }
    if let Some(dry) = req.dry_run {
        options.dispatch.dry_run = dry;
    }

    let ctx = state.pipeline_context();
    let run_id = run.id;
    tokio::spawn(execute_run(ctx, run_id, options));

    Ok((
        StatusCode::ACCEPTED,
        Json(StartRunResponse {
            run_id,
            stage: run.stage,
        }),
    ))
}

#[derive(Serialize)]
pub struct RunStatusResponse {
    #[serde(flatten)]
    pub run: Run,
    /// Presentation-only estimate in [0,1]; stage identity decides completion.
    pub progress: f64,
}

/// GET /api/v1/runs/:id
pub async fn handle_get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunStatusResponse>, AppError> {
    let run = state
        .store
        .get_run(run_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Run {run_id}")))?;
    let progress = run.progress_fraction();
    Ok(Json(RunStatusResponse { run, progress }))
}

#[derive(Deserialize, Default)]
pub struct ListJobsQuery {
    #[serde(default)]
    pub missing_email: bool,
    #[serde(default)]
    pub min_score: Option<i32>,
    #[serde(default)]
    pub missing_documents: bool,
    #[serde(default)]
    pub sendable: bool,
}

#[derive(Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobRecord>,
    pub total: usize,
}

/// GET /api/v1/runs/:id/jobs
pub async fn handle_list_jobs(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Query(params): Query<ListJobsQuery>,
) -> Result<Json<JobListResponse>, AppError> {
    // 404 for unknown runs rather than an empty list.
    state
        .store
        .get_run(run_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Run {run_id}")))?;

    let filter = JobFilter {
        missing_email: params.missing_email,
        min_score: params.min_score,
        missing_documents: params.missing_documents,
        sendable: params.sendable,
        source_job_ids: None,
    };
    let jobs = state.store.list_jobs(run_id, &filter).await?;
    let total = jobs.len();
    Ok(Json(JobListResponse { jobs, total }))
}

#[derive(Deserialize, Default)]
pub struct EnrichRequest {
    #[serde(default)]
    pub force: bool,
}

/// POST /api/v1/runs/:id/enrich
///
/// Re-runs enrichment for the Run's current jobs. Works on finished Runs too;
/// the terminal stage is left untouched.
pub async fn handle_enrich(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Json(req): Json<EnrichRequest>,
) -> Result<Json<EnrichOutcome>, AppError> {
    let mut options = state.pipeline_options().enrich;
    options.force = req.force;
    let outcome = enrich_run(state.store.clone(), state.contacts.clone(), run_id, options).await?;
    Ok(Json(outcome))
}

#[derive(Deserialize, Default)]
pub struct GenerateRequest {
    #[serde(default)]
    pub force: bool,
    /// Explicit job subset; omitted means every job passing the threshold.
    #[serde(default)]
    pub jobs: Option<Vec<String>>,
    #[serde(default)]
    pub match_threshold: Option<i32>,
}

#[derive(Serialize)]
pub struct GenerateResponse {
    pub generated: StageProgress,
}

/// POST /api/v1/runs/:id/generate
pub async fn handle_generate(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, AppError> {
    let mut options = state.pipeline_options().generate;
    options.force = req.force;
    if let Some(threshold) = req.match_threshold {
        options.match_threshold = threshold;
    }
    let selection = match req.jobs {
        Some(ids) if !ids.is_empty() => Selection::Jobs(ids),
        _ => Selection::AllMatched,
    };
    let generated = generate_documents(
        state.store.clone(),
        state.docs.clone(),
        state.artifacts.clone(),
        run_id,
        selection,
        options,
    )
    .await?;
    Ok(Json(GenerateResponse { generated }))
}

#[derive(Deserialize, Default)]
pub struct SendRequest {
    #[serde(default)]
    pub dry_run: Option<bool>,
    #[serde(default)]
    pub max_emails: Option<usize>,
}

/// POST /api/v1/runs/:id/send
pub async fn handle_send(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Json(req): Json<SendRequest>,
) -> Result<Json<DispatchOutcome>, AppError> {
    state
        .store
        .get_run(run_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Run {run_id}")))?;

    let mut options = state.pipeline_options().dispatch;
    if let Some(dry) = req.dry_run {
        options.dry_run = dry;
    }
    if let Some(max) = req.max_emails {
        options.max_emails = max;
    }
    let outcome = send_outreach(state.store.clone(), state.mailer.clone(), run_id, options).await?;
    Ok(Json(outcome))
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub run_id: Uuid,
    pub stage: RunStage,
}

/// POST /api/v1/runs/:id/cancel
///
/// Marks the Run failed. In-flight workers finish but their results are
/// discarded at the persist boundary. Terminal Runs cannot be cancelled.
pub async fn handle_cancel(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<CancelResponse>, AppError> {
    let run = state
        .store
        .get_run(run_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Run {run_id}")))?;
    if run.stage.is_terminal() {
        return Err(AppError::Conflict(format!(
            "run is already {}",
            run.stage.as_str()
        )));
    }
    fail_run(state.store.as_ref(), run_id, "cancelled by user").await;
    let run = state
        .store
        .get_run(run_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Run {run_id}")))?;
    Ok(Json(CancelResponse {
        run_id,
        stage: run.stage,
    }))
}
