//! Record Store — idempotent keyed storage for runs, job records, and
//! tracked messages.
//!
//! All pipeline mutations go through this trait. Job upserts are keyed on the
//! source-assigned natural key within a Run, scalar fields overwrite with the
//! latest value, and derived fields (contacts, documents, scores) only ever
//! gain information. Mutations are row-scoped so concurrent per-job workers
//! never clobber each other.

pub mod memory;
pub mod pg;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::job::{Contact, JobRecord, RawJobRecord};
use crate::models::message::{EngagementEvent, TrackedMessage};
use crate::models::run::{Run, RunStage, RunStatus};

pub use memory::MemoryStore;
pub use pg::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Run {0} not found")]
    RunNotFound(Uuid),

    #[error("Job {1} not found in run {0}")]
    JobNotFound(Uuid, String),

    #[error("Message {0} not found")]
    MessageNotFound(String),

    #[error("Invalid stage transition: {from} -> {to}")]
    StageRegression { from: String, to: String },

    #[error("Corrupt stored value: {0}")]
    Corrupt(String),
}

/// Outcome of one upsert batch. `skipped` carries a reason per malformed
/// input record; the valid subset still commits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertSummary {
    pub inserted: u32,
    pub updated: u32,
    pub skipped: Vec<String>,
}

/// Presence/absence filters used by the coordinators to find work remaining.
/// Each `list_jobs` call re-queries current state; results are ordered by
/// ascending natural key so repeated partial runs stay reproducible.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Only jobs with no usable contact email.
    pub missing_email: bool,
    /// Only jobs whose match score is present and >= the given threshold.
    pub min_score: Option<i32>,
    /// Only jobs missing a cover letter or a tailored resume.
    pub missing_documents: bool,
    /// Only jobs with both documents present and a usable contact email.
    pub sendable: bool,
    /// Restrict to an explicit natural-key subset.
    pub source_job_ids: Option<Vec<String>>,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    // ── Runs ────────────────────────────────────────────────────────────

    async fn create_run(&self, run: &Run) -> Result<(), StoreError>;
    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>, StoreError>;

    /// Advances the stage. Refuses regression per the forward-only rule;
    /// a refused transition is an error, not a silent no-op.
    async fn advance_stage(&self, run_id: Uuid, stage: RunStage) -> Result<(), StoreError>;

    async fn set_status(&self, run_id: Uuid, status: RunStatus) -> Result<(), StoreError>;

    /// Writes a single scalar counter. Called incrementally mid-stage so
    /// pollers observe live progress.
    async fn set_count(&self, run_id: Uuid, key: &str, value: i64) -> Result<(), StoreError>;

    /// Writes a `{processed, total}` counter for fine-grained stage progress.
    async fn set_stage_progress(
        &self,
        run_id: Uuid,
        key: &str,
        processed: u64,
        total: u64,
    ) -> Result<(), StoreError>;

    async fn append_error(&self, run_id: Uuid, message: &str) -> Result<(), StoreError>;

    // ── Job records ─────────────────────────────────────────────────────

    /// Idempotent batch upsert keyed on `(run_id, source_job_id)`. Records
    /// with an empty natural key are skipped with a reason, never fatal.
    async fn upsert_jobs(
        &self,
        run_id: Uuid,
        records: &[RawJobRecord],
    ) -> Result<UpsertSummary, StoreError>;

    async fn list_jobs(
        &self,
        run_id: Uuid,
        filter: &JobFilter,
    ) -> Result<Vec<JobRecord>, StoreError>;

    async fn get_job(
        &self,
        run_id: Uuid,
        source_job_id: &str,
    ) -> Result<Option<JobRecord>, StoreError>;

    /// Applies the non-destructive contact merge to one job row.
    async fn merge_job_contacts(
        &self,
        run_id: Uuid,
        source_job_id: &str,
        incoming: &[Contact],
    ) -> Result<(), StoreError>;

    async fn set_match(
        &self,
        run_id: Uuid,
        source_job_id: &str,
        score: i32,
        rationale: &str,
    ) -> Result<(), StoreError>;

    async fn set_documents(
        &self,
        run_id: Uuid,
        source_job_id: &str,
        cover_letter: &str,
        tailored_resume: &str,
        cover_letter_key: Option<&str>,
        resume_key: Option<&str>,
    ) -> Result<(), StoreError>;

    // ── Tracked messages ────────────────────────────────────────────────

    async fn insert_message(&self, message: &TrackedMessage) -> Result<(), StoreError>;

    async fn set_provider_message_id(
        &self,
        message_id: Uuid,
        provider_message_id: &str,
    ) -> Result<(), StoreError>;

    async fn get_message(&self, message_id: Uuid) -> Result<Option<TrackedMessage>, StoreError>;

    /// Looks up by provider message id first, then by internal id if the
    /// string parses as a UUID.
    async fn find_message(&self, message_ref: &str) -> Result<Option<TrackedMessage>, StoreError>;

    /// Appends one engagement event. Append-only; duplicates are kept.
    async fn append_event(
        &self,
        message_id: Uuid,
        event: &EngagementEvent,
    ) -> Result<(), StoreError>;

    async fn list_messages(&self, run_id: Uuid) -> Result<Vec<TrackedMessage>, StoreError>;
}

/// Shared filter predicate so both backends agree on list semantics.
pub(crate) fn matches_filter(job: &JobRecord, filter: &JobFilter) -> bool {
    if filter.missing_email && job.primary_email().is_some() {
        return false;
    }
    if let Some(min) = filter.min_score {
        match job.match_score {
            Some(score) if score >= min => {}
            _ => return false,
        }
    }
    if filter.missing_documents && job.has_documents() {
        return false;
    }
    if filter.sendable && !(job.has_documents() && job.primary_email().is_some()) {
        return false;
    }
    if let Some(ids) = &filter.source_job_ids {
        if !ids.iter().any(|id| id == &job.source_job_id) {
            return false;
        }
    }
    true
}
