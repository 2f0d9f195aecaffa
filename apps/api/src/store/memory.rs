//! In-memory Record Store backend.
//!
//! Used by the test suite in place of PostgreSQL and exercisable as a no-DB
//! dev mode. Semantics mirror `PgStore` exactly: same upsert/merge rules,
//! same ordering, same stage-transition enforcement. Critical sections are
//! short and never held across an await.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::models::job::{merge_contacts, Contact, JobRecord, RawJobRecord};
use crate::models::message::{EngagementEvent, TrackedMessage};
use crate::models::run::{Run, RunStage, RunStatus};

use super::{matches_filter, JobFilter, RecordStore, StoreError, UpsertSummary};

#[derive(Default)]
struct Inner {
    runs: BTreeMap<Uuid, Run>,
    /// Keyed by (run_id, source_job_id) — the natural key.
    jobs: BTreeMap<(Uuid, String), JobRecord>,
    messages: BTreeMap<Uuid, TrackedMessage>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create_run(&self, run: &Run) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        inner.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>, StoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner.runs.get(&run_id).cloned())
    }

    async fn advance_stage(&self, run_id: Uuid, stage: RunStage) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        let run = inner
            .runs
            .get_mut(&run_id)
            .ok_or(StoreError::RunNotFound(run_id))?;
        if !run.stage.may_transition_to(stage) {
            return Err(StoreError::StageRegression {
                from: run.stage.as_str().to_string(),
                to: stage.as_str().to_string(),
            });
        }
        run.stage = stage;
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn set_status(&self, run_id: Uuid, status: RunStatus) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        let run = inner
            .runs
            .get_mut(&run_id)
            .ok_or(StoreError::RunNotFound(run_id))?;
        run.status = status;
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn set_count(&self, run_id: Uuid, key: &str, value: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        let run = inner
            .runs
            .get_mut(&run_id)
            .ok_or(StoreError::RunNotFound(run_id))?;
        run.counts.set(key, value);
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn set_stage_progress(
        &self,
        run_id: Uuid,
        key: &str,
        processed: u64,
        total: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        let run = inner
            .runs
            .get_mut(&run_id)
            .ok_or(StoreError::RunNotFound(run_id))?;
        run.counts.set_progress(key, processed, total);
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn append_error(&self, run_id: Uuid, message: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        let run = inner
            .runs
            .get_mut(&run_id)
            .ok_or(StoreError::RunNotFound(run_id))?;
        run.errors.push(message.to_string());
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn upsert_jobs(
        &self,
        run_id: Uuid,
        records: &[RawJobRecord],
    ) -> Result<UpsertSummary, StoreError> {
        let mut summary = UpsertSummary::default();
        let mut inner = self.inner.write().unwrap();

        for raw in records {
            if raw.source_job_id.trim().is_empty() {
                summary
                    .skipped
                    .push(format!("record for '{}' has no source job id", raw.title));
                continue;
            }
            let key = (run_id, raw.source_job_id.clone());
            match inner.jobs.get_mut(&key) {
                Some(existing) => {
                    existing.apply_raw(raw);
                    summary.updated += 1;
                }
                None => {
                    inner.jobs.insert(key, JobRecord::from_raw(run_id, raw));
                    summary.inserted += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn list_jobs(
        &self,
        run_id: Uuid,
        filter: &JobFilter,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let inner = self.inner.read().unwrap();
        // BTreeMap range over (run_id, ..) yields ascending natural-key order.
        Ok(inner
            .jobs
            .range((run_id, String::new())..)
            .take_while(|((rid, _), _)| *rid == run_id)
            .map(|(_, job)| job)
            .filter(|job| matches_filter(job, filter))
            .cloned()
            .collect())
    }

    async fn get_job(
        &self,
        run_id: Uuid,
        source_job_id: &str,
    ) -> Result<Option<JobRecord>, StoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner.jobs.get(&(run_id, source_job_id.to_string())).cloned())
    }

    async fn merge_job_contacts(
        &self,
        run_id: Uuid,
        source_job_id: &str,
        incoming: &[Contact],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        let job = inner
            .jobs
            .get_mut(&(run_id, source_job_id.to_string()))
            .ok_or_else(|| StoreError::JobNotFound(run_id, source_job_id.to_string()))?;
        job.contacts = merge_contacts(&job.contacts, incoming);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn set_match(
        &self,
        run_id: Uuid,
        source_job_id: &str,
        score: i32,
        rationale: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        let job = inner
            .jobs
            .get_mut(&(run_id, source_job_id.to_string()))
            .ok_or_else(|| StoreError::JobNotFound(run_id, source_job_id.to_string()))?;
        job.match_score = Some(score);
        job.match_rationale = Some(rationale.to_string());
        job.updated_at = Utc::now();
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
        let mut inner = self.inner.write().unwrap();
        let job = inner
            .jobs
            .get_mut(&(run_id, source_job_id.to_string()))
            .ok_or_else(|| StoreError::JobNotFound(run_id, source_job_id.to_string()))?;
        job.cover_letter = Some(cover_letter.to_string());
        job.tailored_resume = Some(tailored_resume.to_string());
        job.cover_letter_key = cover_letter_key.map(String::from);
        job.resume_key = resume_key.map(String::from);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_message(&self, message: &TrackedMessage) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        inner.messages.insert(message.id, message.clone());
        Ok(())
    }

    async fn set_provider_message_id(
        &self,
        message_id: Uuid,
        provider_message_id: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        let message = inner
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| StoreError::MessageNotFound(message_id.to_string()))?;
        message.provider_message_id = Some(provider_message_id.to_string());
        Ok(())
    }

    async fn get_message(&self, message_id: Uuid) -> Result<Option<TrackedMessage>, StoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner.messages.get(&message_id).cloned())
    }

    async fn find_message(&self, message_ref: &str) -> Result<Option<TrackedMessage>, StoreError> {
        let inner = self.inner.read().unwrap();
        if let Some(found) = inner
            .messages
            .values()
            .find(|m| m.provider_message_id.as_deref() == Some(message_ref))
        {
            return Ok(Some(found.clone()));
        }
        if let Ok(id) = Uuid::parse_str(message_ref) {
            return Ok(inner.messages.get(&id).cloned());
        }
        Ok(None)
    }

    async fn append_event(
        &self,
        message_id: Uuid,
        event: &EngagementEvent,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap();
        let message = inner
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| StoreError::MessageNotFound(message_id.to_string()))?;
        message.events.push(event.clone());
        Ok(())
    }

    async fn list_messages(&self, run_id: Uuid) -> Result<Vec<TrackedMessage>, StoreError> {
        let inner = self.inner.read().unwrap();
        let mut messages: Vec<TrackedMessage> = inner
            .messages
            .values()
            .filter(|m| m.run_id == run_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::EventKind;
    use serde_json::json;

    fn raw(id: &str, title: &str) -> RawJobRecord {
        RawJobRecord {
            source_job_id: id.to_string(),
            title: title.to_string(),
            company: "Acme".to_string(),
            location: Some("Remote".to_string()),
            url: Some(format!("https://jobs.acme.com/{id}")),
            description: "Build things in Rust".to_string(),
            source_payload: json!({"source": "test"}),
        }
    }

    async fn run_fixture(store: &MemoryStore) -> Run {
        let run = Run::new("rust engineer", "resume text");
        store.create_run(&run).await.unwrap();
        run
    }

    #[tokio::test]
    async fn test_upsert_twice_is_idempotent() {
        // Scenario A: same discovery batch applied twice.
        let store = MemoryStore::new();
        let run = run_fixture(&store).await;
        let batch = vec![raw("j1", "A"), raw("j2", "B"), raw("j3", "C")];

        let first = store.upsert_jobs(run.id, &batch).await.unwrap();
        assert_eq!(first.inserted, 3);
        assert_eq!(first.updated, 0);

        let second = store.upsert_jobs(run.id, &batch).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 3);

        let jobs = store.list_jobs(run.id, &JobFilter::default()).await.unwrap();
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].title, "A");
    }

    #[tokio::test]
    async fn test_malformed_record_skipped_valid_subset_commits() {
        let store = MemoryStore::new();
        let run = run_fixture(&store).await;
        let batch = vec![raw("", "broken"), raw("j1", "A")];

        let summary = store.upsert_jobs(run.id, &batch).await.unwrap();
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(
            store
                .list_jobs(run.id, &JobFilter::default())
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_list_jobs_is_natural_key_ordered() {
        let store = MemoryStore::new();
        let run = run_fixture(&store).await;
        store
            .upsert_jobs(run.id, &[raw("j9", "Z"), raw("j1", "A"), raw("j5", "M")])
            .await
            .unwrap();

        let ids: Vec<String> = store
            .list_jobs(run.id, &JobFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.source_job_id)
            .collect();
        assert_eq!(ids, vec!["j1", "j5", "j9"]);
    }

    #[tokio::test]
    async fn test_missing_email_filter() {
        let store = MemoryStore::new();
        let run = run_fixture(&store).await;
        store
            .upsert_jobs(run.id, &[raw("j1", "A"), raw("j2", "B")])
            .await
            .unwrap();
        store
            .merge_job_contacts(
                run.id,
                "j1",
                &[Contact {
                    name: Some("Ada".into()),
                    email: Some("ada@acme.com".into()),
                    ..Default::default()
                }],
            )
            .await
            .unwrap();

        let filter = JobFilter {
            missing_email: true,
            ..Default::default()
        };
        let remaining = store.list_jobs(run.id, &filter).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].source_job_id, "j2");
    }

    #[tokio::test]
    async fn test_contact_merge_never_regresses() {
        let store = MemoryStore::new();
        let run = run_fixture(&store).await;
        store.upsert_jobs(run.id, &[raw("j1", "A")]).await.unwrap();

        let full = Contact {
            name: Some("Ada".into()),
            title: Some("Recruiter".into()),
            email: Some("ada@acme.com".into()),
            profile_url: None,
        };
        store.merge_job_contacts(run.id, "j1", &[full]).await.unwrap();
        // Re-enrichment returning emptier data must not lose anything.
        store.merge_job_contacts(run.id, "j1", &[]).await.unwrap();
        store
            .merge_job_contacts(
                run.id,
                "j1",
                &[Contact {
                    email: Some("ada@acme.com".into()),
                    ..Default::default()
                }],
            )
            .await
            .unwrap();

        let job = store.get_job(run.id, "j1").await.unwrap().unwrap();
        assert_eq!(job.contacts.len(), 1);
        assert_eq!(job.contacts[0].name.as_deref(), Some("Ada"));
        assert_eq!(job.contacts[0].title.as_deref(), Some("Recruiter"));
    }

    #[tokio::test]
    async fn test_stage_regression_refused() {
        let store = MemoryStore::new();
        let run = run_fixture(&store).await;
        store.advance_stage(run.id, RunStage::Generate).await.unwrap();

        let result = store.advance_stage(run.id, RunStage::Enrich).await;
        assert!(matches!(result, Err(StoreError::StageRegression { .. })));
        let current = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(current.stage, RunStage::Generate);
    }

    #[tokio::test]
    async fn test_event_append_after_done_run() {
        // Scenario D: bounce arrives after the owning Run is done.
        let store = MemoryStore::new();
        let run = run_fixture(&store).await;
        let message = TrackedMessage::new(run.id, Some("j1".into()), "ada@acme.com", "Hello", false);
        store.insert_message(&message).await.unwrap();
        store
            .set_provider_message_id(message.id, "prov-123")
            .await
            .unwrap();
        store.advance_stage(run.id, RunStage::Done).await.unwrap();

        let event = EngagementEvent {
            kind: EventKind::Bounce,
            email: Some("ada@acme.com".into()),
            url: None,
            reason: Some("mailbox full".into()),
            occurred_at: Utc::now(),
        };
        store.append_event(message.id, &event).await.unwrap();

        let stored = store.find_message("prov-123").await.unwrap().unwrap();
        assert_eq!(stored.events.len(), 1);
        assert_eq!(stored.events[0].kind, EventKind::Bounce);
        let run = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(run.stage, RunStage::Done);
    }

    #[tokio::test]
    async fn test_find_message_by_internal_id() {
        let store = MemoryStore::new();
        let run = run_fixture(&store).await;
        let message = TrackedMessage::new(run.id, None, "x@y.com", "Subject", true);
        store.insert_message(&message).await.unwrap();

        let found = store.find_message(&message.id.to_string()).await.unwrap();
        assert!(found.is_some());
        assert!(store.find_message("unknown-ref").await.unwrap().is_none());
    }
}
