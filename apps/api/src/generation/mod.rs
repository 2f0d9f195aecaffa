//! Generation Coordinator — produces a tailored resume and cover letter per
//! matched job, under a bounded concurrency cap.
//!
//! `processed == total` means the coordinator finished iterating, not that
//! every job succeeded: failed jobs are counted and flagged in Run errors.
//! Jobs that already hold both documents are skipped without a collaborator
//! call unless `force` is set.

pub mod prompts;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::artifacts::{DocumentArtifacts, DocumentKind};
use crate::enrich::run_cancelled;
use crate::errors::AppError;
use crate::llm_client::{LlmClient, LlmError};
use crate::matching::threshold_filter;
use crate::models::run::StageProgress;
use crate::store::{JobFilter, RecordStore};

use prompts::{
    COVER_LETTER_PROMPT_TEMPLATE, COVER_LETTER_SYSTEM, TAILORED_RESUME_PROMPT_TEMPLATE,
    TAILORED_RESUME_SYSTEM,
};

/// Inputs for one document-generation call.
#[derive(Debug, Clone)]
pub struct DocumentRequest {
    pub resume_text: String,
    pub job_description: String,
    pub job_title: String,
    pub company: String,
    pub recruiter_name: Option<String>,
}

/// Document-producing collaborator seam. Production backend is the LLM
/// client; tests substitute mocks with call counters.
#[async_trait]
pub trait DocumentModel: Send + Sync {
    async fn generate(
        &self,
        kind: DocumentKind,
        request: &DocumentRequest,
    ) -> Result<String, LlmError>;
}

/// LLM-backed document generator.
pub struct LlmDocumentModel(pub LlmClient);

#[async_trait]
impl DocumentModel for LlmDocumentModel {
    async fn generate(
        &self,
        kind: DocumentKind,
        request: &DocumentRequest,
    ) -> Result<String, LlmError> {
        let (template, system) = match kind {
            DocumentKind::CoverLetter => (COVER_LETTER_PROMPT_TEMPLATE, COVER_LETTER_SYSTEM),
            DocumentKind::TailoredResume => {
                (TAILORED_RESUME_PROMPT_TEMPLATE, TAILORED_RESUME_SYSTEM)
            }
        };
        let recruiter_line = match &request.recruiter_name {
            Some(name) => format!("ADDRESSEE: {name}"),
            None => "ADDRESSEE: the hiring team".to_string(),
        };
        let prompt = template
            .replace("{job_title}", &request.job_title)
            .replace("{company}", &request.company)
            .replace("{recruiter_line}", &recruiter_line)
            .replace("{job_description}", &request.job_description)
            .replace("{resume_text}", &request.resume_text);
        self.0.call_text(&prompt, system).await
    }
}

/// Which jobs to generate documents for.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// All jobs whose match score passed the Run's threshold.
    AllMatched,
    /// An explicit natural-key subset.
    Jobs(Vec<String>),
}

#[derive(Debug, Clone, Copy)]
pub struct GenerateOptions {
    /// Regenerate even when both documents already exist.
    pub force: bool,
    pub concurrency: usize,
    pub timeout_secs: u64,
    /// Threshold used to resolve `Selection::AllMatched` (inclusive).
    pub match_threshold: i32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            force: false,
            concurrency: 3,
            timeout_secs: 90,
            match_threshold: 60,
        }
    }
}

struct JobOutput {
    source_job_id: String,
    result: Result<(String, String), String>,
}

/// Generates documents for the selected jobs of a Run.
///
/// The `generated` progress counter is updated after every job so the Run
/// State Machine exposes live intra-stage progress. Results landing after
/// cancellation are discarded.
pub async fn generate_documents(
    store: Arc<dyn RecordStore>,
    model: Arc<dyn DocumentModel>,
    artifacts: Arc<dyn DocumentArtifacts>,
    run_id: Uuid,
    selection: Selection,
    options: GenerateOptions,
) -> Result<StageProgress, AppError> {
    let run = store
        .get_run(run_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Run {run_id} not found")))?;

    let jobs = match &selection {
        Selection::AllMatched => {
            let all = store.list_jobs(run_id, &JobFilter::default()).await?;
            let (matched, unscored) = threshold_filter(&all, options.match_threshold);
            // Unscored jobs are excluded, never defaulted to a passing score.
            for id in unscored {
                store
                    .append_error(run_id, &format!("job '{id}' has no match score, skipped"))
                    .await?;
            }
            matched
        }
        Selection::Jobs(ids) => {
            let filter = JobFilter {
                source_job_ids: Some(ids.clone()),
                ..Default::default()
            };
            store.list_jobs(run_id, &filter).await?
        }
    };
    let total = jobs.len() as u64;
    info!("Generating documents for {total} jobs in run {run_id}");
    store
        .set_stage_progress(run_id, "generated", 0, total)
        .await?;

    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut tasks: JoinSet<JobOutput> = JoinSet::new();
    let mut processed = 0u64;

    for job in &jobs {
        // Already-complete jobs count as processed without touching the
        // collaborator, keeping regeneration idempotent by default.
        if job.has_documents() && !options.force {
            processed += 1;
            store
                .set_stage_progress(run_id, "generated", processed, total)
                .await?;
            continue;
        }

        let request = DocumentRequest {
            resume_text: run.resume_text.clone(),
            job_description: job.description.clone(),
            job_title: job.title.clone(),
            company: job.company.clone(),
            recruiter_name: job
                .contacts
                .iter()
                .find(|c| c.has_name())
                .and_then(|c| c.name.clone()),
        };
        let permit_pool = semaphore.clone();
        let model = model.clone();
        let source_job_id = job.source_job_id.clone();
        let timeout = std::time::Duration::from_secs(options.timeout_secs);

        tasks.spawn(async move {
            let _permit = permit_pool.acquire_owned().await.expect("semaphore closed");
            let result = generate_pair(model.as_ref(), &request, timeout).await;
            JobOutput {
                source_job_id,
                result,
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let output = match joined {
            Ok(o) => o,
            Err(e) => {
                warn!("Generation worker panicked: {e}");
                store
                    .append_error(run_id, &format!("generation worker failed: {e}"))
                    .await?;
                processed += 1;
                store
                    .set_stage_progress(run_id, "generated", processed, total)
                    .await?;
                continue;
            }
        };

        if run_cancelled(store.as_ref(), run_id).await? {
            warn!(
                "Run {run_id} cancelled, discarding generated documents for '{}'",
                output.source_job_id
            );
            processed += 1;
            continue;
        }

        match output.result {
            Ok((cover_letter, tailored_resume)) => {
                let cover_key = artifacts
                    .put(run_id, &output.source_job_id, DocumentKind::CoverLetter, &cover_letter)
                    .await
                    .map_err(AppError::Internal)?;
                let resume_key = artifacts
                    .put(
                        run_id,
                        &output.source_job_id,
                        DocumentKind::TailoredResume,
                        &tailored_resume,
                    )
                    .await
                    .map_err(AppError::Internal)?;
                store
                    .set_documents(
                        run_id,
                        &output.source_job_id,
                        &cover_letter,
                        &tailored_resume,
                        Some(&cover_key),
                        Some(&resume_key),
                    )
                    .await?;
            }
            Err(message) => {
                warn!("{message}");
                store.append_error(run_id, &message).await?;
            }
        }

        processed += 1;
        store
            .set_stage_progress(run_id, "generated", processed, total)
            .await?;
    }

    info!("Generation for run {run_id} done: {processed}/{total}");
    Ok(StageProgress { processed, total })
}

async fn generate_pair(
    model: &dyn DocumentModel,
    request: &DocumentRequest,
    timeout: std::time::Duration,
) -> Result<(String, String), String> {
    let id = &request.company;
    let cover_letter =
        match tokio::time::timeout(timeout, model.generate(DocumentKind::CoverLetter, request))
            .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return Err(format!("cover letter generation failed for '{id}': {e}")),
            Err(_) => return Err(format!("cover letter generation timed out for '{id}'")),
        };
    let tailored_resume = match tokio::time::timeout(
        timeout,
        model.generate(DocumentKind::TailoredResume, request),
    )
    .await
    {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => return Err(format!("resume tailoring failed for '{id}': {e}")),
        Err(_) => return Err(format!("resume tailoring timed out for '{id}'")),
    };
    Ok((cover_letter, tailored_resume))
}
