//! External collaborator contracts and their HTTP backends.
//!
//! The core only ever talks to discovery, contact enrichment, and email
//! dispatch through these traits, carried in `AppState` as `Arc<dyn ...>` so
//! backends swap without touching coordinator code (tests substitute mocks).

pub mod contacts;
pub mod discovery;
pub mod mailer;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::job::{Contact, RawJobRecord};

pub use contacts::HunterContactFinder;
pub use discovery::JsearchDiscovery;
pub use mailer::SendgridMailer;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Response parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Collaborator call timed out after {0}s")]
    Timeout(u64),
}

/// Job discovery collaborator. May return fewer results than requested and
/// must not duplicate within one call; cross-call duplicates are expected and
/// absorbed by the Store's idempotent upsert.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn search(
        &self,
        query: &str,
        sources: &[String],
    ) -> Result<Vec<RawJobRecord>, ClientError>;
}

/// Contact enrichment collaborator, company-scoped. May return empty.
#[async_trait]
pub trait ContactFinder: Send + Sync {
    async fn find_contacts(
        &self,
        company: &str,
        job_title: &str,
    ) -> Result<Vec<Contact>, ClientError>;
}

/// One outbound email handed to the dispatch collaborator.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// (filename, content) pairs; generated documents ride along as text.
    pub attachments: Vec<(String, String)>,
}

/// Dispatch result. `provider_message_id` is present once the provider
/// accepts the send and is the correlation key for webhook events.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub provider_message_id: Option<String>,
    pub accepted: bool,
}

/// Transactional email collaborator.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<SendOutcome, ClientError>;
}
