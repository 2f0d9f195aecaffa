//! Enrichment Coordinator — fills recruiter contact gaps on Job Records.
//!
//! Selects jobs without a usable email, queries the enrichment collaborator
//! per job under a bounded worker pool, and merges results through the
//! Store's non-destructive contact merge. A single job's failure is a Run
//! error, never a stage abort.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clients::ContactFinder;
use crate::errors::AppError;
use crate::models::job::Contact;
use crate::store::{JobFilter, RecordStore};

/// Title keywords that mark a contact as a likely recruiting contact.
const RECRUITING_TITLE_KEYWORDS: &[&str] = &["recruit", "talent", "hr", "people", "hiring"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnrichOutcome {
    /// Jobs that gained a contact with an email address.
    pub updated_with_contact: u32,
    /// Jobs that gained contact names/titles but no email.
    pub updated_name_only: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct EnrichOptions {
    /// Re-query jobs that already hold an email (normally an idempotent no-op).
    pub force: bool,
    pub concurrency: usize,
    pub timeout_secs: u64,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self {
            force: false,
            concurrency: 4,
            timeout_secs: 45,
        }
    }
}

/// Ranks candidate contacts deterministically, first-matching-rule wins:
/// name+email, then email, then a recruiting/talent/HR title, then the rest.
/// Original provider order is preserved within each rule.
pub fn rank_contacts(candidates: &[Contact]) -> Vec<Contact> {
    let rules: [&dyn Fn(&Contact) -> bool; 4] = [
        &|c| c.has_email() && c.has_name(),
        &|c| c.has_email(),
        &|c| has_recruiting_title(c),
        &|_| true,
    ];

    let mut ranked: Vec<Contact> = Vec::with_capacity(candidates.len());
    for rule in rules {
        for contact in candidates {
            if rule(contact) && !ranked.contains(contact) {
                ranked.push(contact.clone());
            }
        }
    }
    ranked
}

fn has_recruiting_title(contact: &Contact) -> bool {
    contact
        .title
        .as_deref()
        .map(|t| {
            let lower = t.to_lowercase();
            RECRUITING_TITLE_KEYWORDS.iter().any(|k| lower.contains(k))
        })
        .unwrap_or(false)
}

/// Enriches all jobs in a Run that lack a usable contact email.
///
/// Per-item failures and timeouts are appended to the Run's errors; the
/// batch continues. The `enriched` progress counter is written after every
/// item so pollers see live progress. Results arriving after the Run has
/// been cancelled are discarded, not persisted.
pub async fn enrich_run(
    store: Arc<dyn RecordStore>,
    finder: Arc<dyn ContactFinder>,
    run_id: Uuid,
    options: EnrichOptions,
) -> Result<EnrichOutcome, AppError> {
    let filter = if options.force {
        JobFilter::default()
    } else {
        JobFilter {
            missing_email: true,
            ..Default::default()
        }
    };
    let jobs = store.list_jobs(run_id, &filter).await?;
    let total = jobs.len() as u64;
    info!("Enriching {total} jobs for run {run_id}");
    store.set_stage_progress(run_id, "enriched", 0, total).await?;

    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut tasks: JoinSet<(String, String, Result<Vec<Contact>, String>)> = JoinSet::new();

    for job in &jobs {
        let permit_pool = semaphore.clone();
        let finder = finder.clone();
        let source_job_id = job.source_job_id.clone();
        let company = job.company.clone();
        let title = job.title.clone();
        let timeout = std::time::Duration::from_secs(options.timeout_secs);

        tasks.spawn(async move {
            let _permit = permit_pool.acquire_owned().await.expect("semaphore closed");
            let result =
                match tokio::time::timeout(timeout, finder.find_contacts(&company, &title)).await {
                    Ok(Ok(contacts)) => Ok(contacts),
                    Ok(Err(e)) => Err(format!("enrichment failed for '{source_job_id}': {e}")),
                    Err(_) => Err(format!("enrichment timed out for '{source_job_id}'")),
                };
            (source_job_id, company, result)
        });
    }

    let mut outcome = EnrichOutcome::default();
    let mut processed = 0u64;

    while let Some(joined) = tasks.join_next().await {
        let (source_job_id, company, result) = match joined {
            Ok(r) => r,
            Err(e) => {
                warn!("Enrichment worker panicked: {e}");
                store
                    .append_error(run_id, &format!("enrichment worker failed: {e}"))
                    .await?;
                processed += 1;
                store
                    .set_stage_progress(run_id, "enriched", processed, total)
                    .await?;
                continue;
            }
        };

        // Discard in-flight results once the Run has been cancelled.
        if run_cancelled(store.as_ref(), run_id).await? {
            warn!("Run {run_id} cancelled, discarding enrichment result for '{source_job_id}'");
            processed += 1;
            continue;
        }

        match result {
            Ok(candidates) => {
                let ranked = rank_contacts(&candidates);
                if ranked.is_empty() {
                    info!("No contacts found for '{company}' ({source_job_id})");
                } else {
                    store
                        .merge_job_contacts(run_id, &source_job_id, &ranked)
                        .await?;
                    if ranked.iter().any(Contact::has_email) {
                        outcome.updated_with_contact += 1;
                    } else {
                        outcome.updated_name_only += 1;
                    }
                }
            }
            Err(message) => {
                warn!("{message}");
                store.append_error(run_id, &message).await?;
            }
        }

        processed += 1;
        store
            .set_stage_progress(run_id, "enriched", processed, total)
            .await?;
    }

    info!(
        "Enrichment for run {run_id} done: {} with email, {} name-only",
        outcome.updated_with_contact, outcome.updated_name_only
    );
    Ok(outcome)
}

/// A Run is cancelled once it has been marked terminal-failed by the caller.
pub(crate) async fn run_cancelled(
    store: &dyn RecordStore,
    run_id: Uuid,
) -> Result<bool, AppError> {
    use crate::models::run::{RunStage, RunStatus};
    let run = store
        .get_run(run_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Run {run_id} not found")))?;
    Ok(run.stage == RunStage::Error || run.status == RunStatus::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ClientError;
    use crate::models::job::RawJobRecord;
    use crate::models::run::Run;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn contact(name: Option<&str>, email: Option<&str>, title: Option<&str>) -> Contact {
        Contact {
            name: name.map(String::from),
            email: email.map(String::from),
            title: title.map(String::from),
            profile_url: None,
        }
    }

    /// Mock enrichment collaborator: canned responses per company, with a
    /// call counter for no-op assertions.
    struct MockFinder {
        responses: HashMap<String, Result<Vec<Contact>, ()>>,
        calls: AtomicUsize,
    }

    impl MockFinder {
        fn new(responses: HashMap<String, Result<Vec<Contact>, ()>>) -> Self {
            Self {
                responses,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ContactFinder for MockFinder {
        async fn find_contacts(
            &self,
            company: &str,
            _job_title: &str,
        ) -> Result<Vec<Contact>, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.responses.get(company) {
                Some(Ok(contacts)) => Ok(contacts.clone()),
                Some(Err(())) => Err(ClientError::Api {
                    status: 500,
                    message: "provider error".into(),
                }),
                None => Ok(vec![]),
            }
        }
    }

    fn raw(id: &str, company: &str) -> RawJobRecord {
        RawJobRecord {
            source_job_id: id.to_string(),
            title: "Engineer".to_string(),
            company: company.to_string(),
            location: None,
            url: None,
            description: "desc".to_string(),
            source_payload: serde_json::json!({}),
        }
    }

    async fn setup(records: &[RawJobRecord]) -> (Arc<MemoryStore>, Run) {
        let store = Arc::new(MemoryStore::new());
        let run = Run::new("q", "resume");
        store.create_run(&run).await.unwrap();
        store.upsert_jobs(run.id, records).await.unwrap();
        (store, run)
    }

    #[test]
    fn test_ranking_prefers_name_and_email() {
        // Scenario C: name-only vs name+email.
        let candidates = vec![
            contact(Some("Bob"), None, None),
            contact(Some("Ada"), Some("ada@acme.com"), None),
        ];
        let ranked = rank_contacts(&candidates);
        assert_eq!(ranked[0].email.as_deref(), Some("ada@acme.com"));
    }

    #[test]
    fn test_ranking_prefers_recruiting_title_among_emailless() {
        let candidates = vec![
            contact(Some("Carl"), None, Some("Staff Engineer")),
            contact(Some("Dana"), None, Some("Senior Talent Partner")),
        ];
        let ranked = rank_contacts(&candidates);
        assert_eq!(ranked[0].name.as_deref(), Some("Dana"));
    }

    #[test]
    fn test_ranking_is_deterministic_and_stable() {
        let candidates = vec![
            contact(Some("A"), Some("a@x.com"), None),
            contact(Some("B"), Some("b@x.com"), None),
        ];
        let first = rank_contacts(&candidates);
        let second = rank_contacts(&candidates);
        assert_eq!(first, second);
        assert_eq!(first[0].name.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn test_partial_failure_does_not_stop_batch() {
        let (store, run) = setup(&[raw("j1", "GoodCo"), raw("j2", "BadCo"), raw("j3", "AlsoGood")])
            .await;
        let mut responses = HashMap::new();
        responses.insert(
            "GoodCo".to_string(),
            Ok(vec![contact(Some("Ada"), Some("ada@goodco.com"), None)]),
        );
        responses.insert("BadCo".to_string(), Err(()));
        responses.insert(
            "AlsoGood".to_string(),
            Ok(vec![contact(Some("Eve"), Some("eve@alsogood.com"), None)]),
        );
        let finder = Arc::new(MockFinder::new(responses));

        let outcome = enrich_run(store.clone(), finder, run.id, EnrichOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.updated_with_contact, 2);
        let stored = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.errors.len(), 1);
        assert!(stored.errors[0].contains("j2"));
        // The Run is not failed by a per-item error.
        assert_ne!(stored.stage, crate::models::run::RunStage::Error);
    }

    #[tokio::test]
    async fn test_jobs_with_email_skipped_unless_forced() {
        let (store, run) = setup(&[raw("j1", "Acme")]).await;
        store
            .merge_job_contacts(run.id, "j1", &[contact(Some("Ada"), Some("a@acme.com"), None)])
            .await
            .unwrap();
        let finder = Arc::new(MockFinder::new(HashMap::new()));

        enrich_run(store.clone(), finder.clone(), run.id, EnrichOptions::default())
            .await
            .unwrap();
        assert_eq!(finder.calls.load(Ordering::SeqCst), 0);

        let forced = EnrichOptions {
            force: true,
            ..Default::default()
        };
        enrich_run(store.clone(), finder.clone(), run.id, forced)
            .await
            .unwrap();
        assert_eq!(finder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_name_only_contacts_counted_separately() {
        let (store, run) = setup(&[raw("j1", "Acme")]).await;
        let mut responses = HashMap::new();
        responses.insert(
            "Acme".to_string(),
            Ok(vec![contact(Some("Ada"), None, Some("Recruiter"))]),
        );
        let finder = Arc::new(MockFinder::new(responses));

        let outcome = enrich_run(store.clone(), finder, run.id, EnrichOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.updated_with_contact, 0);
        assert_eq!(outcome.updated_name_only, 1);
    }

    #[tokio::test]
    async fn test_progress_counter_reaches_total() {
        let (store, run) = setup(&[raw("j1", "A"), raw("j2", "B")]).await;
        let finder = Arc::new(MockFinder::new(HashMap::new()));
        enrich_run(store.clone(), finder, run.id, EnrichOptions::default())
            .await
            .unwrap();

        let stored = store.get_run(run.id).await.unwrap().unwrap();
        let progress = stored.counts.progress("enriched").unwrap();
        assert_eq!(progress.processed, 2);
        assert_eq!(progress.total, 2);
    }
}
