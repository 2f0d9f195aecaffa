//! PostgreSQL Record Store backend.
//!
//! Row-scoped mutations: job updates run in a transaction with
//! `SELECT ... FOR UPDATE` on the natural key so concurrent per-job workers
//! serialize on the row, never on the Run. Upserts use
//! `ON CONFLICT (run_id, source_job_id)` and report insert-vs-update via the
//! `xmax = 0` trick.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool, Row};
use uuid::Uuid;

use crate::models::job::{merge_contacts, Contact, JobRecord, RawJobRecord};
use crate::models::message::{EngagementEvent, EventKind, TrackedMessage};
use crate::models::run::{Run, RunCounts, RunStage, RunStatus};

use super::{JobFilter, RecordStore, StoreError, UpsertSummary};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct RunRow {
    id: Uuid,
    query: String,
    resume_text: String,
    stage: String,
    status: String,
    counts: Value,
    errors: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RunRow {
    fn into_run(self) -> Result<Run, StoreError> {
        let stage = RunStage::parse(&self.stage)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown stage '{}'", self.stage)))?;
        let status = RunStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown status '{}'", self.status)))?;
        let counts: RunCounts = serde_json::from_value(self.counts)
            .map_err(|e| StoreError::Corrupt(format!("counts column: {e}")))?;
        Ok(Run {
            id: self.id,
            query: self.query,
            resume_text: self.resume_text,
            stage,
            status,
            counts,
            errors: self.errors,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct JobRow {
    id: Uuid,
    run_id: Uuid,
    source_job_id: String,
    title: String,
    company: String,
    location: Option<String>,
    url: Option<String>,
    description: String,
    source_payload: Value,
    contacts: Value,
    match_score: Option<i32>,
    match_rationale: Option<String>,
    cover_letter: Option<String>,
    tailored_resume: Option<String>,
    cover_letter_key: Option<String>,
    resume_key: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRow {
    fn into_record(self) -> Result<JobRecord, StoreError> {
        let contacts: Vec<Contact> = serde_json::from_value(self.contacts)
            .map_err(|e| StoreError::Corrupt(format!("contacts column: {e}")))?;
        Ok(JobRecord {
            id: self.id,
            run_id: self.run_id,
            source_job_id: self.source_job_id,
            title: self.title,
            company: self.company,
            location: self.location,
            url: self.url,
            description: self.description,
            source_payload: self.source_payload,
            contacts,
            match_score: self.match_score,
            match_rationale: self.match_rationale,
            cover_letter: self.cover_letter,
            tailored_resume: self.tailored_resume,
            cover_letter_key: self.cover_letter_key,
            resume_key: self.resume_key,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct MessageRow {
    id: Uuid,
    run_id: Uuid,
    source_job_id: Option<String>,
    provider_message_id: Option<String>,
    recipient: String,
    subject: String,
    dry_run: bool,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct EventRow {
    kind: String,
    email: Option<String>,
    url: Option<String>,
    reason: Option<String>,
    occurred_at: DateTime<Utc>,
}

impl PgStore {
    async fn load_events(&self, message_id: Uuid) -> Result<Vec<EngagementEvent>, StoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT kind, email, url, reason, occurred_at
             FROM engagement_events
             WHERE message_id = $1
             ORDER BY received_at, id",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let kind = EventKind::parse(&row.kind)
                    .ok_or_else(|| StoreError::Corrupt(format!("unknown event kind '{}'", row.kind)))?;
                Ok(EngagementEvent {
                    kind,
                    email: row.email,
                    url: row.url,
                    reason: row.reason,
                    occurred_at: row.occurred_at,
                })
            })
            .collect()
    }

    async fn hydrate_message(&self, row: MessageRow) -> Result<TrackedMessage, StoreError> {
        let events = self.load_events(row.id).await?;
        Ok(TrackedMessage {
            id: row.id,
            run_id: row.run_id,
            source_job_id: row.source_job_id,
            provider_message_id: row.provider_message_id,
            recipient: row.recipient,
            subject: row.subject,
            dry_run: row.dry_run,
            created_at: row.created_at,
            events,
        })
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn create_run(&self, run: &Run) -> Result<(), StoreError> {
        let counts = serde_json::to_value(&run.counts)
            .map_err(|e| StoreError::Corrupt(format!("counts: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO runs (id, query, resume_text, stage, status, counts, errors, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(run.id)
        .bind(&run.query)
        .bind(&run.resume_text)
        .bind(run.stage.as_str())
        .bind(run.status.as_str())
        .bind(counts)
        .bind(&run.errors)
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>, StoreError> {
        let row: Option<RunRow> = sqlx::query_as("SELECT * FROM runs WHERE id = $1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(RunRow::into_run).transpose()
    }

    async fn advance_stage(&self, run_id: Uuid, stage: RunStage) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let current: Option<String> =
            sqlx::query_scalar("SELECT stage FROM runs WHERE id = $1 FOR UPDATE")
                .bind(run_id)
                .fetch_optional(&mut *tx)
                .await?;
        let current = current.ok_or(StoreError::RunNotFound(run_id))?;
        let from = RunStage::parse(&current)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown stage '{current}'")))?;
        if !from.may_transition_to(stage) {
            return Err(StoreError::StageRegression {
                from: current,
                to: stage.as_str().to_string(),
            });
        }
        sqlx::query("UPDATE runs SET stage = $1, updated_at = now() WHERE id = $2")
            .bind(stage.as_str())
            .bind(run_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_status(&self, run_id: Uuid, status: RunStatus) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE runs SET status = $1, updated_at = now() WHERE id = $2")
            .bind(status.as_str())
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RunNotFound(run_id));
        }
        Ok(())
    }

    async fn set_count(&self, run_id: Uuid, key: &str, value: i64) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE runs
             SET counts = jsonb_set(counts, ARRAY[$1], to_jsonb($2::bigint), true),
                 updated_at = now()
             WHERE id = $3",
        )
        .bind(key)
        .bind(value)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RunNotFound(run_id));
        }
        Ok(())
    }

    async fn set_stage_progress(
        &self,
        run_id: Uuid,
        key: &str,
        processed: u64,
        total: u64,
    ) -> Result<(), StoreError> {
        let progress = serde_json::json!({ "processed": processed, "total": total });
        let result = sqlx::query(
            "UPDATE runs
             SET counts = jsonb_set(counts, ARRAY[$1], $2, true),
                 updated_at = now()
             WHERE id = $3",
        )
        .bind(key)
        .bind(progress)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RunNotFound(run_id));
        }
        Ok(())
    }

    async fn append_error(&self, run_id: Uuid, message: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE runs SET errors = array_append(errors, $1), updated_at = now() WHERE id = $2",
        )
        .bind(message)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RunNotFound(run_id));
        }
        Ok(())
    }

    async fn upsert_jobs(
        &self,
        run_id: Uuid,
        records: &[RawJobRecord],
    ) -> Result<UpsertSummary, StoreError> {
        let mut summary = UpsertSummary::default();
        let mut tx = self.pool.begin().await?;

        for raw in records {
            if raw.source_job_id.trim().is_empty() {
                summary
                    .skipped
                    .push(format!("record for '{}' has no source job id", raw.title));
                continue;
            }
            // Scalar fields overwrite with latest; derived columns untouched.
            let row = sqlx::query(
                r#"
                INSERT INTO job_records
                    (id, run_id, source_job_id, title, company, location, url, description, source_payload)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (run_id, source_job_id) DO UPDATE SET
                    title = EXCLUDED.title,
                    company = EXCLUDED.company,
                    location = EXCLUDED.location,
                    url = EXCLUDED.url,
                    description = EXCLUDED.description,
                    source_payload = EXCLUDED.source_payload,
                    updated_at = now()
                RETURNING (xmax = 0) AS inserted
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(run_id)
            .bind(&raw.source_job_id)
            .bind(&raw.title)
            .bind(&raw.company)
            .bind(&raw.location)
            .bind(&raw.url)
            .bind(&raw.description)
            .bind(&raw.source_payload)
            .fetch_one(&mut *tx)
            .await?;

            if row.try_get::<bool, _>("inserted")? {
                summary.inserted += 1;
            } else {
                summary.updated += 1;
            }
        }

        tx.commit().await?;
        Ok(summary)
    }

    async fn list_jobs(
        &self,
        run_id: Uuid,
        filter: &JobFilter,
    ) -> Result<Vec<JobRecord>, StoreError> {
        // Presence filters operate on deserialized contacts, so filtering
        // happens in Rust after the ordered fetch. Run-sized result sets are
        // small (tens of rows).
        let rows: Vec<JobRow> =
            sqlx::query_as("SELECT * FROM job_records WHERE run_id = $1 ORDER BY source_job_id")
                .bind(run_id)
                .fetch_all(&self.pool)
                .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let job = row.into_record()?;
            if super::matches_filter(&job, filter) {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    async fn get_job(
        &self,
        run_id: Uuid,
        source_job_id: &str,
    ) -> Result<Option<JobRecord>, StoreError> {
        let row: Option<JobRow> =
            sqlx::query_as("SELECT * FROM job_records WHERE run_id = $1 AND source_job_id = $2")
                .bind(run_id)
                .bind(source_job_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(JobRow::into_record).transpose()
    }

    async fn merge_job_contacts(
        &self,
        run_id: Uuid,
        source_job_id: &str,
        incoming: &[Contact],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let existing: Option<Value> = sqlx::query_scalar(
            "SELECT contacts FROM job_records
             WHERE run_id = $1 AND source_job_id = $2 FOR UPDATE",
        )
        .bind(run_id)
        .bind(source_job_id)
        .fetch_optional(&mut *tx)
        .await?;
        let existing =
            existing.ok_or_else(|| StoreError::JobNotFound(run_id, source_job_id.to_string()))?;
        let existing: Vec<Contact> = serde_json::from_value(existing)
            .map_err(|e| StoreError::Corrupt(format!("contacts column: {e}")))?;

        let merged = merge_contacts(&existing, incoming);
        let merged = serde_json::to_value(&merged)
            .map_err(|e| StoreError::Corrupt(format!("contacts: {e}")))?;

        sqlx::query(
            "UPDATE job_records SET contacts = $1, updated_at = now()
             WHERE run_id = $2 AND source_job_id = $3",
        )
        .bind(merged)
        .bind(run_id)
        .bind(source_job_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_match(
        &self,
        run_id: Uuid,
        source_job_id: &str,
        score: i32,
        rationale: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE job_records SET match_score = $1, match_rationale = $2, updated_at = now()
             WHERE run_id = $3 AND source_job_id = $4",
        )
        .bind(score)
        .bind(rationale)
        .bind(run_id)
        .bind(source_job_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(run_id, source_job_id.to_string()));
        }
        Ok(())
    }

    async fn set_documents(
        &self,
        run_id: Uuid,
        source_job_id: &str,
        cover_letter: &str,
        tailored_resume: &str,
        cover_letter_key: Option<&str>,
        resume_key: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE job_records
             SET cover_letter = $1, tailored_resume = $2,
                 cover_letter_key = $3, resume_key = $4, updated_at = now()
             WHERE run_id = $5 AND source_job_id = $6",
        )
        .bind(cover_letter)
        .bind(tailored_resume)
        .bind(cover_letter_key)
        .bind(resume_key)
        .bind(run_id)
        .bind(source_job_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(run_id, source_job_id.to_string()));
        }
        Ok(())
    }

    async fn insert_message(&self, message: &TrackedMessage) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO tracked_messages
                (id, run_id, source_job_id, provider_message_id, recipient, subject, dry_run, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(message.id)
        .bind(message.run_id)
        .bind(&message.source_job_id)
        .bind(&message.provider_message_id)
        .bind(&message.recipient)
        .bind(&message.subject)
        .bind(message.dry_run)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_provider_message_id(
        &self,
        message_id: Uuid,
        provider_message_id: &str,
    ) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE tracked_messages SET provider_message_id = $1 WHERE id = $2")
                .bind(provider_message_id)
                .bind(message_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::MessageNotFound(message_id.to_string()));
        }
        Ok(())
    }

    async fn get_message(&self, message_id: Uuid) -> Result<Option<TrackedMessage>, StoreError> {
        let row: Option<MessageRow> =
            sqlx::query_as("SELECT * FROM tracked_messages WHERE id = $1")
                .bind(message_id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate_message(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_message(&self, message_ref: &str) -> Result<Option<TrackedMessage>, StoreError> {
        let row: Option<MessageRow> =
            sqlx::query_as("SELECT * FROM tracked_messages WHERE provider_message_id = $1")
                .bind(message_ref)
                .fetch_optional(&self.pool)
                .await?;
        if let Some(row) = row {
            return Ok(Some(self.hydrate_message(row).await?));
        }
        if let Ok(id) = Uuid::parse_str(message_ref) {
            return self.get_message(id).await;
        }
        Ok(None)
    }

    async fn append_event(
        &self,
        message_id: Uuid,
        event: &EngagementEvent,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO engagement_events (message_id, kind, email, url, reason, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(message_id)
        .bind(event.kind.as_str())
        .bind(&event.email)
        .bind(&event.url)
        .bind(&event.reason)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_messages(&self, run_id: Uuid) -> Result<Vec<TrackedMessage>, StoreError> {
        let rows: Vec<MessageRow> =
            sqlx::query_as("SELECT * FROM tracked_messages WHERE run_id = $1 ORDER BY created_at")
                .bind(run_id)
                .fetch_all(&self.pool)
                .await?;
        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            messages.push(self.hydrate_message(row).await?);
        }
        Ok(messages)
    }
}
