//! Run State Machine — drives a Run through the fixed stage sequence
//! discover → parse → enrich → generate → email → done.
//!
//! The stage is advanced before each phase starts, so a poller always sees
//! the stage currently being worked. Stages with zero work still advance.
//! Collaborator failures inside a stage are non-fatal (appended to the Run's
//! errors); a failure of the stage itself moves the Run to `error`. A Run
//! that finishes with accumulated errors is still `done`.

pub mod handlers;

use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::artifacts::DocumentArtifacts;
use crate::clients::{ContactFinder, Discovery, Mailer};
use crate::dispatch::{send_outreach, DispatchOptions};
use crate::enrich::{enrich_run, run_cancelled, EnrichOptions};
use crate::errors::AppError;
use crate::generation::{generate_documents, DocumentModel, GenerateOptions, Selection};
use crate::matching::{MatchingEngine, ScoreMode};
use crate::models::run::{Run, RunStage, RunStatus};
use crate::store::{JobFilter, RecordStore};

/// Everything a Run execution needs, threaded explicitly. No collaborator is
/// reached through ambient globals.
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn RecordStore>,
    pub discovery: Arc<dyn Discovery>,
    pub contacts: Arc<dyn ContactFinder>,
    pub matching: Arc<MatchingEngine>,
    pub docs: Arc<dyn DocumentModel>,
    pub artifacts: Arc<dyn DocumentArtifacts>,
    pub mailer: Arc<dyn Mailer>,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Source identifiers forwarded to the discovery collaborator.
    pub sources: Vec<String>,
    pub score_mode: ScoreMode,
    pub enrich: EnrichOptions,
    pub generate: GenerateOptions,
    pub dispatch: DispatchOptions,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            score_mode: ScoreMode::default(),
            enrich: EnrichOptions::default(),
            generate: GenerateOptions::default(),
            dispatch: DispatchOptions::default(),
        }
    }
}

/// Runs the full pipeline for an existing Run. Intended to be spawned; fatal
/// failures are recorded on the Run rather than returned.
pub async fn execute_run(ctx: PipelineContext, run_id: Uuid, options: PipelineOptions) {
    if let Err(e) = drive(ctx.clone(), run_id, options).await {
        error!("Run {run_id} failed: {e}");
        fail_run(ctx.store.as_ref(), run_id, &e.to_string()).await;
    }
}

async fn drive(
    ctx: PipelineContext,
    run_id: Uuid,
    options: PipelineOptions,
) -> Result<(), AppError> {
    let run = ctx
        .store
        .get_run(run_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Run {run_id} not found")))?;

    ctx.store.set_status(run_id, RunStatus::Running).await?;
    info!("Run {run_id} started for query '{}'", run.query);

    // discover
    let raw = ctx
        .discovery
        .search(&run.query, &options.sources)
        .await
        .map_err(|e| AppError::Client(format!("discovery failed: {e}")))?;
    ctx.store
        .set_count(run_id, "discovered", raw.len() as i64)
        .await?;
    info!("Run {run_id}: discovered {} raw records", raw.len());

    // parse
    ctx.store.advance_stage(run_id, RunStage::Parse).await?;
    let summary = ctx.store.upsert_jobs(run_id, &raw).await?;
    ctx.store
        .set_count(run_id, "inserted", summary.inserted as i64)
        .await?;
    ctx.store
        .set_count(run_id, "updated", summary.updated as i64)
        .await?;
    for reason in &summary.skipped {
        warn!("Run {run_id}: skipped record: {reason}");
        ctx.store
            .append_error(run_id, &format!("skipped record: {reason}"))
            .await?;
    }

    if run_cancelled(ctx.store.as_ref(), run_id).await? {
        info!("Run {run_id} cancelled before enrich");
        return Ok(());
    }

    // enrich
    ctx.store.advance_stage(run_id, RunStage::Enrich).await?;
    enrich_run(
        ctx.store.clone(),
        ctx.contacts.clone(),
        run_id,
        options.enrich,
    )
    .await?;

    if run_cancelled(ctx.store.as_ref(), run_id).await? {
        info!("Run {run_id} cancelled before generate");
        return Ok(());
    }

    // generate (scoring first, then tailored documents for passing jobs)
    ctx.store.advance_stage(run_id, RunStage::Generate).await?;
    score_jobs(&ctx, &run, options.score_mode).await?;
    generate_documents(
        ctx.store.clone(),
        ctx.docs.clone(),
        ctx.artifacts.clone(),
        run_id,
        Selection::AllMatched,
        options.generate,
    )
    .await?;

    if run_cancelled(ctx.store.as_ref(), run_id).await? {
        info!("Run {run_id} cancelled before email");
        return Ok(());
    }

    // email
    ctx.store.advance_stage(run_id, RunStage::Email).await?;
    let dispatched = send_outreach(
        ctx.store.clone(),
        ctx.mailer.clone(),
        run_id,
        options.dispatch,
    )
    .await?;
    ctx.store
        .set_count(run_id, "sent", dispatched.sent as i64)
        .await?;

    ctx.store.advance_stage(run_id, RunStage::Done).await?;
    ctx.store.set_status(run_id, RunStatus::Completed).await?;
    info!("Run {run_id} done");
    Ok(())
}

/// Scores every not-yet-scored job against the Run's resume and persists the
/// result. Already-scored jobs are skipped so re-entry is idempotent. Counts
/// all jobs as processed either way.
async fn score_jobs(ctx: &PipelineContext, run: &Run, mode: ScoreMode) -> Result<(), AppError> {
    let jobs = ctx.store.list_jobs(run.id, &JobFilter::default()).await?;
    let total = jobs.len() as u64;
    ctx.store
        .set_stage_progress(run.id, "scored", 0, total)
        .await?;

    let mut processed = 0u64;
    for job in &jobs {
        if job.match_score.is_none() {
            let report = ctx
                .matching
                .score(&run.resume_text, &job.description, mode)
                .await;
            if report.degraded {
                ctx.store
                    .append_error(
                        run.id,
                        &format!("model scoring degraded for '{}'", job.source_job_id),
                    )
                    .await?;
            }
            ctx.store
                .set_match(run.id, &job.source_job_id, report.score as i32, &report.rationale)
                .await?;
        }
        processed += 1;
        ctx.store
            .set_stage_progress(run.id, "scored", processed, total)
            .await?;
    }
    Ok(())
}

/// Moves a Run to the terminal `error` stage. Best-effort: a store failure
/// while recording the failure is logged and swallowed.
pub async fn fail_run(store: &dyn RecordStore, run_id: Uuid, message: &str) {
    if let Err(e) = store.append_error(run_id, message).await {
        error!("Could not record failure for run {run_id}: {e}");
    }
    match store.advance_stage(run_id, RunStage::Error).await {
        Ok(()) => {}
        Err(e) => warn!("Could not move run {run_id} to error: {e}"),
    }
    if let Err(e) = store.set_status(run_id, RunStatus::Failed).await {
        error!("Could not mark run {run_id} failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{DocumentKind, MemoryArtifacts};
    use crate::clients::{ClientError, OutboundEmail, SendOutcome};
    use crate::generation::DocumentRequest;
    use crate::llm_client::LlmError;
    use crate::models::job::{Contact, RawJobRecord};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;

    struct FixedDiscovery(Vec<RawJobRecord>);

    #[async_trait]
    impl Discovery for FixedDiscovery {
        async fn search(
            &self,
            _query: &str,
            _sources: &[String],
        ) -> Result<Vec<RawJobRecord>, ClientError> {
            Ok(self.0.clone())
        }
    }

    struct FailingDiscovery;

    #[async_trait]
    impl Discovery for FailingDiscovery {
        async fn search(
            &self,
            _query: &str,
            _sources: &[String],
        ) -> Result<Vec<RawJobRecord>, ClientError> {
            Err(ClientError::Api {
                status: 503,
                message: "board unavailable".into(),
            })
        }
    }

    struct FixedContacts;

    #[async_trait]
    impl ContactFinder for FixedContacts {
        async fn find_contacts(
            &self,
            company: &str,
            _job_title: &str,
        ) -> Result<Vec<Contact>, ClientError> {
            Ok(vec![Contact {
                name: Some("Sam Recruiter".into()),
                title: Some("Technical Recruiter".into()),
                email: Some(format!("sam@{}.example", company.to_lowercase())),
                profile_url: None,
            }])
        }
    }

    struct NoContacts;

    #[async_trait]
    impl ContactFinder for NoContacts {
        async fn find_contacts(
            &self,
            _company: &str,
            _job_title: &str,
        ) -> Result<Vec<Contact>, ClientError> {
            Err(ClientError::Api {
                status: 500,
                message: "directory down".into(),
            })
        }
    }

    struct StubDocs;

    #[async_trait]
    impl DocumentModel for StubDocs {
        async fn generate(
            &self,
            kind: DocumentKind,
            request: &DocumentRequest,
        ) -> Result<String, LlmError> {
            Ok(format!("{:?} for {}", kind, request.company))
        }
    }

    struct AcceptingMailer;

    #[async_trait]
    impl Mailer for AcceptingMailer {
        async fn send(&self, _email: &OutboundEmail) -> Result<SendOutcome, ClientError> {
            Ok(SendOutcome {
                provider_message_id: Some("prov-1".into()),
                accepted: true,
            })
        }
    }

    fn raw(id: &str, company: &str) -> RawJobRecord {
        RawJobRecord {
            source_job_id: id.to_string(),
            title: "Senior Rust Engineer".into(),
            company: company.to_string(),
            location: Some("Remote".into()),
            url: None,
            description: "Rust engineer with PostgreSQL and Kubernetes experience".into(),
            source_payload: json!({}),
        }
    }

    fn context(store: Arc<MemoryStore>, discovery: Arc<dyn Discovery>) -> PipelineContext {
        PipelineContext {
            store,
            discovery,
            contacts: Arc::new(FixedContacts),
            matching: Arc::new(MatchingEngine::lexical_only()),
            docs: Arc::new(StubDocs),
            artifacts: Arc::new(MemoryArtifacts::new()),
            mailer: Arc::new(AcceptingMailer),
        }
    }

    fn options() -> PipelineOptions {
        PipelineOptions {
            generate: GenerateOptions {
                // Lexical scores for the fixture resume/description land well
                // above this, so both jobs pass.
                match_threshold: 10,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_full_pipeline_reaches_done() {
        let store = Arc::new(MemoryStore::new());
        let run = Run::new(
            "rust engineer",
            "Rust engineer with PostgreSQL and Kubernetes experience",
        );
        store.create_run(&run).await.unwrap();
        let ctx = context(
            store.clone(),
            Arc::new(FixedDiscovery(vec![raw("j1", "Acme"), raw("j2", "Globex")])),
        );

        execute_run(ctx, run.id, options()).await;

        let stored = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.stage, RunStage::Done);
        assert_eq!(stored.status, RunStatus::Completed);
        assert_eq!(stored.counts.scalar("discovered"), Some(2));
        assert_eq!(stored.counts.scalar("inserted"), Some(2));
        assert_eq!(stored.counts.scalar("sent"), Some(2));

        let jobs = store.list_jobs(run.id, &JobFilter::default()).await.unwrap();
        assert!(jobs.iter().all(|j| j.match_score.is_some()));
        assert!(jobs.iter().all(|j| j.has_documents()));
        assert_eq!(store.list_messages(run.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_discovery_failure_moves_run_to_error() {
        let store = Arc::new(MemoryStore::new());
        let run = Run::new("rust engineer", "resume");
        store.create_run(&run).await.unwrap();
        let ctx = context(store.clone(), Arc::new(FailingDiscovery));

        execute_run(ctx, run.id, options()).await;

        let stored = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.stage, RunStage::Error);
        assert_eq!(stored.status, RunStatus::Failed);
        assert!(stored.errors.iter().any(|e| e.contains("discovery failed")));
    }

    #[tokio::test]
    async fn test_zero_results_still_reaches_done() {
        let store = Arc::new(MemoryStore::new());
        let run = Run::new("underwater basket weaver", "resume");
        store.create_run(&run).await.unwrap();
        let ctx = context(store.clone(), Arc::new(FixedDiscovery(vec![])));

        execute_run(ctx, run.id, options()).await;

        let stored = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.stage, RunStage::Done);
        assert_eq!(stored.counts.scalar("discovered"), Some(0));
    }

    #[tokio::test]
    async fn test_enrichment_failures_finish_done_with_errors() {
        let store = Arc::new(MemoryStore::new());
        let run = Run::new(
            "rust engineer",
            "Rust engineer with PostgreSQL and Kubernetes experience",
        );
        store.create_run(&run).await.unwrap();
        let mut ctx = context(
            store.clone(),
            Arc::new(FixedDiscovery(vec![raw("j1", "Acme")])),
        );
        ctx.contacts = Arc::new(NoContacts);

        execute_run(ctx, run.id, options()).await;

        let stored = store.get_run(run.id).await.unwrap().unwrap();
        // No email means nothing was sendable, but the Run still finishes.
        assert_eq!(stored.stage, RunStage::Done);
        assert_eq!(stored.status, RunStatus::Completed);
        assert!(!stored.errors.is_empty());
        assert_eq!(store.list_messages(run.id).await.unwrap().len(), 0);
    }

    /// Cancels its own Run mid-search, as a user cancelling concurrently would.
    struct CancellingDiscovery {
        store: Arc<MemoryStore>,
        run_id: Uuid,
    }

    #[async_trait]
    impl Discovery for CancellingDiscovery {
        async fn search(
            &self,
            _query: &str,
            _sources: &[String],
        ) -> Result<Vec<RawJobRecord>, ClientError> {
            self.store
                .set_status(self.run_id, RunStatus::Failed)
                .await
                .map_err(|e| ClientError::Api {
                    status: 500,
                    message: e.to_string(),
                })?;
            Ok(vec![raw("j1", "Acme")])
        }
    }

    #[tokio::test]
    async fn test_cancelled_run_stops_between_stages() {
        let store = Arc::new(MemoryStore::new());
        let run = Run::new("rust engineer", "resume");
        store.create_run(&run).await.unwrap();
        let ctx = context(
            store.clone(),
            Arc::new(CancellingDiscovery {
                store: store.clone(),
                run_id: run.id,
            }),
        );

        execute_run(ctx, run.id, options()).await;

        let stored = store.get_run(run.id).await.unwrap().unwrap();
        // Parsed work committed, but the Run never advanced past parse.
        assert_eq!(stored.stage, RunStage::Parse);
        assert_eq!(stored.status, RunStatus::Failed);
        assert!(store.get_job(run.id, "j1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rescore_skips_already_scored_jobs() {
        let store = Arc::new(MemoryStore::new());
        let run = Run::new("rust engineer", "Rust and PostgreSQL");
        store.create_run(&run).await.unwrap();
        store
            .upsert_jobs(run.id, &[raw("j1", "Acme")])
            .await
            .unwrap();
        store
            .set_match(run.id, "j1", 99, "hand-set")
            .await
            .unwrap();

        let ctx = context(store.clone(), Arc::new(FixedDiscovery(vec![])));
        score_jobs(&ctx, &store.get_run(run.id).await.unwrap().unwrap(), ScoreMode::Lexical)
            .await
            .unwrap();

        let job = store.get_job(run.id, "j1").await.unwrap().unwrap();
        assert_eq!(job.match_score, Some(99));
        assert_eq!(job.match_rationale.as_deref(), Some("hand-set"));
    }
}
