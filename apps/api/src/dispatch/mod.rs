//! Dispatch & Engagement Correlator.
//!
//! Sending: every attempt creates a Tracked Message row before the dispatch
//! collaborator is called, so a mid-call crash still leaves an "attempted"
//! record. Dry-run sends walk the identical path with the collaborator call
//! skipped.
//!
//! Ingestion: webhook events are correlated back to their message by provider
//! message id (or internal id) and appended to the ledger. Ingestion is fully
//! decoupled from Run lifecycle — events may arrive days after the Run is
//! done, after restarts, out of order, and duplicated.

pub mod handlers;

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::clients::{Mailer, OutboundEmail};
use crate::errors::AppError;
use crate::models::message::{EngagementEvent, EventKind, TrackedMessage};
use crate::store::{JobFilter, RecordStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub sent: u32,
    pub failures: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    pub max_emails: usize,
    pub dry_run: bool,
    pub timeout_secs: u64,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            max_emails: 10,
            dry_run: true,
            timeout_secs: 30,
        }
    }
}

/// Sends outreach for every sendable job in the Run (documents present and a
/// contact email available), up to `max_emails`, in natural-key order.
pub async fn send_outreach(
    store: Arc<dyn RecordStore>,
    mailer: Arc<dyn Mailer>,
    run_id: Uuid,
    options: DispatchOptions,
) -> Result<DispatchOutcome, AppError> {
    let filter = JobFilter {
        sendable: true,
        ..Default::default()
    };
    let jobs = store.list_jobs(run_id, &filter).await?;
    let batch: Vec<_> = jobs.into_iter().take(options.max_emails).collect();
    let total = batch.len() as u64;
    info!(
        "Dispatching {total} emails for run {run_id} (dry_run={})",
        options.dry_run
    );
    store.set_stage_progress(run_id, "emailed", 0, total).await?;

    let mut outcome = DispatchOutcome::default();
    let timeout = std::time::Duration::from_secs(options.timeout_secs);

    for (index, job) in batch.iter().enumerate() {
        // list_jobs(sendable) guarantees an email is present.
        let recipient = match job.primary_email() {
            Some(email) => email.to_string(),
            None => continue,
        };
        let subject = format!("Application for {} at {}", job.title, job.company);

        // Tracked row first: a crash during the send still leaves a trace.
        let message = TrackedMessage::new(
            run_id,
            Some(job.source_job_id.clone()),
            &recipient,
            &subject,
            options.dry_run,
        );
        store.insert_message(&message).await?;

        if options.dry_run {
            info!("Dry-run send to {recipient} for '{}'", job.source_job_id);
            outcome.sent += 1;
        } else {
            let email = OutboundEmail {
                to: recipient.clone(),
                subject,
                body: job.cover_letter.clone().unwrap_or_default(),
                attachments: vec![(
                    "tailored_resume.md".to_string(),
                    job.tailored_resume.clone().unwrap_or_default(),
                )],
            };
            match tokio::time::timeout(timeout, mailer.send(&email)).await {
                Ok(Ok(accepted)) if accepted.accepted => {
                    if let Some(provider_id) = accepted.provider_message_id {
                        store
                            .set_provider_message_id(message.id, &provider_id)
                            .await?;
                    }
                    outcome.sent += 1;
                }
                Ok(Ok(_)) => {
                    outcome.failures += 1;
                    store
                        .append_error(
                            run_id,
                            &format!("send rejected by provider for '{}'", job.source_job_id),
                        )
                        .await?;
                }
                Ok(Err(e)) => {
                    outcome.failures += 1;
                    store
                        .append_error(
                            run_id,
                            &format!("send failed for '{}': {e}", job.source_job_id),
                        )
                        .await?;
                }
                Err(_) => {
                    outcome.failures += 1;
                    store
                        .append_error(
                            run_id,
                            &format!("send timed out for '{}'", job.source_job_id),
                        )
                        .await?;
                }
            }
        }

        store
            .set_stage_progress(run_id, "emailed", (index + 1) as u64, total)
            .await?;
    }

    info!(
        "Dispatch for run {run_id} done: sent={}, failures={}",
        outcome.sent, outcome.failures
    );
    Ok(outcome)
}

/// One inbound provider event, as delivered by the webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEvent {
    /// Provider-assigned id (SendGrid convention).
    #[serde(default)]
    pub sg_message_id: Option<String>,
    /// Internal id echoed back via custom args, or a bare message reference.
    #[serde(default)]
    pub message_id: Option<String>,
    pub event: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    /// Unix seconds. Missing timestamps fall back to arrival time.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl ProviderEvent {
    /// The lookup key: provider id first, internal id second. SendGrid
    /// suffixes the id with routing metadata after the first dot; strip it.
    fn message_ref(&self) -> Option<String> {
        if let Some(sg) = &self.sg_message_id {
            let trimmed = sg.split('.').next().unwrap_or(sg);
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        self.message_id.clone()
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.timestamp
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(Utc::now)
    }
}

/// Folds one provider event into the owning message's ledger. Unknown
/// message ids and unknown event kinds are logged and dropped — never fatal,
/// never surfaced to any Run.
pub async fn ingest_event(
    store: Arc<dyn RecordStore>,
    event: ProviderEvent,
) -> Result<(), AppError> {
    let Some(kind) = EventKind::from_provider(&event.event) else {
        warn!("Dropping webhook event with unknown kind '{}'", event.event);
        return Ok(());
    };
    let Some(message_ref) = event.message_ref() else {
        warn!("Dropping '{}' event without a message reference", event.event);
        return Ok(());
    };
    let Some(message) = store.find_message(&message_ref).await? else {
        warn!("Dropping '{}' event for unknown message '{message_ref}'", event.event);
        return Ok(());
    };

    let engagement = EngagementEvent {
        kind,
        email: event.email.clone(),
        url: event.url.clone(),
        reason: event.reason.clone(),
        occurred_at: event.occurred_at(),
    };
    store.append_event(message.id, &engagement).await?;
    info!(
        "Recorded {} event for message {} ({})",
        kind.as_str(),
        message.id,
        message.recipient
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{ClientError, SendOutcome};
    use crate::models::job::{Contact, RawJobRecord};
    use crate::models::message::summarize;
    use crate::models::run::{Run, RunStage};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockMailer {
        calls: AtomicUsize,
        accept: bool,
    }

    impl MockMailer {
        fn new(accept: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                accept,
            }
        }
    }

    #[async_trait]
    impl Mailer for MockMailer {
        async fn send(&self, _email: &OutboundEmail) -> Result<SendOutcome, ClientError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.accept {
                Ok(SendOutcome {
                    provider_message_id: Some(format!("prov-{n}")),
                    accepted: true,
                })
            } else {
                Err(ClientError::Api {
                    status: 500,
                    message: "provider down".into(),
                })
            }
        }
    }

    async fn setup_sendable(n: usize) -> (Arc<MemoryStore>, Run) {
        let store = Arc::new(MemoryStore::new());
        let run = Run::new("q", "resume");
        store.create_run(&run).await.unwrap();
        for i in 0..n {
            let id = format!("j{i}");
            store
                .upsert_jobs(
                    run.id,
                    &[RawJobRecord {
                        source_job_id: id.clone(),
                        title: "Engineer".into(),
                        company: format!("Co{i}"),
                        location: None,
                        url: None,
                        description: "desc".into(),
                        source_payload: serde_json::json!({}),
                    }],
                )
                .await
                .unwrap();
            store
                .merge_job_contacts(
                    run.id,
                    &id,
                    &[Contact {
                        name: Some("Ada".into()),
                        email: Some(format!("ada{i}@co.com")),
                        ..Default::default()
                    }],
                )
                .await
                .unwrap();
            store
                .set_documents(run.id, &id, "letter", "resume", None, None)
                .await
                .unwrap();
        }
        (store, run)
    }

    #[tokio::test]
    async fn test_dry_run_creates_tracked_message_without_send() {
        let (store, run) = setup_sendable(2).await;
        let mailer = Arc::new(MockMailer::new(true));

        let outcome = send_outreach(
            store.clone(),
            mailer.clone(),
            run.id,
            DispatchOptions {
                dry_run: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.sent, 2);
        assert_eq!(mailer.calls.load(Ordering::SeqCst), 0);
        let messages = store.list_messages(run.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.dry_run));
    }

    #[tokio::test]
    async fn test_live_send_records_provider_message_id() {
        let (store, run) = setup_sendable(1).await;
        let mailer = Arc::new(MockMailer::new(true));

        let outcome = send_outreach(
            store.clone(),
            mailer,
            run.id,
            DispatchOptions {
                dry_run: false,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.sent, 1);
        let messages = store.list_messages(run.id).await.unwrap();
        assert_eq!(messages[0].provider_message_id.as_deref(), Some("prov-0"));
    }

    #[tokio::test]
    async fn test_failed_send_still_leaves_attempted_record() {
        let (store, run) = setup_sendable(1).await;
        let mailer = Arc::new(MockMailer::new(false));

        let outcome = send_outreach(
            store.clone(),
            mailer,
            run.id,
            DispatchOptions {
                dry_run: false,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.failures, 1);
        assert_eq!(store.list_messages(run.id).await.unwrap().len(), 1);
        let stored = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_max_emails_caps_the_batch() {
        let (store, run) = setup_sendable(5).await;
        let mailer = Arc::new(MockMailer::new(true));

        let outcome = send_outreach(
            store.clone(),
            mailer,
            run.id,
            DispatchOptions {
                max_emails: 2,
                dry_run: true,
                timeout_secs: 30,
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.sent, 2);
        assert_eq!(store.list_messages(run.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ingest_after_done_run_appends_without_touching_stage() {
        // Scenario D.
        let (store, run) = setup_sendable(1).await;
        let mailer = Arc::new(MockMailer::new(true));
        send_outreach(
            store.clone(),
            mailer,
            run.id,
            DispatchOptions {
                dry_run: false,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        store.advance_stage(run.id, RunStage::Done).await.unwrap();

        ingest_event(
            store.clone(),
            ProviderEvent {
                sg_message_id: Some("prov-0.filter001".into()),
                message_id: None,
                event: "bounce".into(),
                email: Some("ada0@co.com".into()),
                url: None,
                reason: Some("mailbox full".into()),
                timestamp: Some(1_700_000_000),
            },
        )
        .await
        .unwrap();

        let messages = store.list_messages(run.id).await.unwrap();
        assert_eq!(messages[0].events.len(), 1);
        assert_eq!(messages[0].events[0].kind, EventKind::Bounce);
        let stored = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.stage, RunStage::Done);
    }

    #[tokio::test]
    async fn test_unknown_message_id_dropped_silently() {
        let store = Arc::new(MemoryStore::new());
        let result = ingest_event(
            store,
            ProviderEvent {
                sg_message_id: Some("never-seen".into()),
                message_id: None,
                event: "open".into(),
                email: None,
                url: None,
                reason: None,
                timestamp: None,
            },
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_event_kind_dropped_silently() {
        let store = Arc::new(MemoryStore::new());
        let result = ingest_event(
            store,
            ProviderEvent {
                sg_message_id: Some("x".into()),
                message_id: None,
                event: "telepathy".into(),
                email: None,
                url: None,
                reason: None,
                timestamp: None,
            },
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_events_kept_but_score_stable() {
        let (store, run) = setup_sendable(1).await;
        let mailer = Arc::new(MockMailer::new(true));
        send_outreach(
            store.clone(),
            mailer,
            run.id,
            DispatchOptions {
                dry_run: false,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let open = ProviderEvent {
            sg_message_id: Some("prov-0".into()),
            message_id: None,
            event: "open".into(),
            email: None,
            url: None,
            reason: None,
            timestamp: Some(1_700_000_000),
        };
        // Provider retry delivers the same event twice.
        ingest_event(store.clone(), open.clone()).await.unwrap();
        ingest_event(store.clone(), open).await.unwrap();

        let messages = store.list_messages(run.id).await.unwrap();
        assert_eq!(messages[0].events.len(), 2);
        let summary = summarize(&messages[0].events);
        assert_eq!(summary.opens, 2);
        assert_eq!(summary.score, 20);
    }
}
