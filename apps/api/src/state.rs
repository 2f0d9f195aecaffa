use std::sync::Arc;

use crate::artifacts::DocumentArtifacts;
use crate::clients::{ContactFinder, Discovery, Mailer};
use crate::config::Config;
use crate::dispatch::DispatchOptions;
use crate::enrich::EnrichOptions;
use crate::generation::{DocumentModel, GenerateOptions};
use crate::matching::MatchingEngine;
use crate::pipeline::{PipelineContext, PipelineOptions};
use crate::store::RecordStore;

/// Shared application state injected into all route handlers via Axum
/// extractors. Every collaborator sits behind a trait object so tests swap in
/// in-memory fakes.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub discovery: Arc<dyn Discovery>,
    pub contacts: Arc<dyn ContactFinder>,
    pub matching: Arc<MatchingEngine>,
    pub docs: Arc<dyn DocumentModel>,
    pub artifacts: Arc<dyn DocumentArtifacts>,
    pub mailer: Arc<dyn Mailer>,
    pub config: Config,
}

impl AppState {
    pub fn pipeline_context(&self) -> PipelineContext {
        PipelineContext {
            store: self.store.clone(),
            discovery: self.discovery.clone(),
            contacts: self.contacts.clone(),
            matching: self.matching.clone(),
            docs: self.docs.clone(),
            artifacts: self.artifacts.clone(),
            mailer: self.mailer.clone(),
        }
    }

    /// Configured defaults for a new Run; per-request fields override these.
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            sources: Vec::new(),
            score_mode: Default::default(),
            enrich: EnrichOptions {
                force: false,
                concurrency: self.config.enrich_concurrency,
                timeout_secs: self.config.collaborator_timeout_secs,
            },
            generate: GenerateOptions {
                force: false,
                concurrency: self.config.generation_concurrency,
                timeout_secs: self.config.collaborator_timeout_secs.max(90),
                match_threshold: self.config.match_threshold,
            },
            dispatch: DispatchOptions {
                max_emails: self.config.max_emails_per_run,
                dry_run: !self.config.live_sends,
                timeout_secs: self.config.collaborator_timeout_secs,
            },
        }
    }
}
