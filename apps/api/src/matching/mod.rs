//! Matching Engine — computes a 0–100 compatibility score between a resume
//! and a job description.
//!
//! Two backends behind one `score` contract: a pure lexical scorer (always
//! available, deterministic) and a model-assisted scorer behind the
//! `ModelScorer` trait. Model failures never fail the call — the engine falls
//! back to lexical and flags the report as `degraded` so callers can tell a
//! degraded score from a model-sourced one.

pub mod lexical;
pub mod prompts;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::llm_client::{LlmClient, LlmError};
use crate::models::job::JobRecord;

use lexical::score_lexical;
use prompts::{MATCH_SCORE_PROMPT_TEMPLATE, MATCH_SCORE_SYSTEM};

/// Which scoring path to take. `Blended` combines both and degrades to
/// lexical-only exactly like `Model` does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreMode {
    #[default]
    Lexical,
    Model,
    Blended,
}

/// Blend weights for `ScoreMode::Blended`: 0.4 lexical, 0.6 model.
const BLEND_LEXICAL: f64 = 0.4;
const BLEND_MODEL: f64 = 0.6;

/// Structured response the model scorer must produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelScoreResponse {
    pub score: u32,
    #[serde(default)]
    pub matched_skills: Vec<String>,
    #[serde(default)]
    pub missing_skills: Vec<String>,
    #[serde(default)]
    pub experience_assessment: String,
    #[serde(default)]
    pub recommended_edits: Vec<String>,
}

/// Full scoring report returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchReport {
    pub score: u32,
    pub rationale: String,
    /// "lexical" | "model" | "blended" — which backend produced the score.
    pub backend: String,
    /// True when the model path failed and the score fell back to lexical.
    pub degraded: bool,
    pub matched_skills: Vec<String>,
    pub missing_skills: Vec<String>,
}

/// Model-assisted scoring seam. Production backend wraps the LLM client;
/// tests substitute mocks.
#[async_trait]
pub trait ModelScorer: Send + Sync {
    async fn score(
        &self,
        resume_text: &str,
        job_description: &str,
    ) -> Result<ModelScoreResponse, LlmError>;
}

/// LLM-backed model scorer. Temperature is pinned to 0 in the client so an
/// unchanged (resume, description) pair scores stably.
pub struct LlmModelScorer(pub LlmClient);

#[async_trait]
impl ModelScorer for LlmModelScorer {
    async fn score(
        &self,
        resume_text: &str,
        job_description: &str,
    ) -> Result<ModelScoreResponse, LlmError> {
        let prompt = MATCH_SCORE_PROMPT_TEMPLATE
            .replace("{resume_text}", resume_text)
            .replace("{job_description}", job_description);
        let mut response: ModelScoreResponse =
            self.0.call_json(&prompt, MATCH_SCORE_SYSTEM).await?;
        response.score = response.score.min(100);
        Ok(response)
    }
}

pub struct MatchingEngine {
    model: Option<Arc<dyn ModelScorer>>,
}

impl MatchingEngine {
    pub fn new(model: Option<Arc<dyn ModelScorer>>) -> Self {
        Self { model }
    }

    pub fn lexical_only() -> Self {
        Self { model: None }
    }

    /// Scores a resume against a job description. Never errors for
    /// empty-but-present inputs; never errors when only the model path fails.
    pub async fn score(
        &self,
        resume_text: &str,
        job_description: &str,
        mode: ScoreMode,
    ) -> MatchReport {
        let lexical = score_lexical(resume_text, job_description);

        // Empty input short-circuits every mode.
        if lexical.rationale == "insufficient input" {
            return MatchReport {
                score: 0,
                rationale: lexical.rationale,
                backend: "lexical".to_string(),
                degraded: false,
                matched_skills: Vec::new(),
                missing_skills: Vec::new(),
            };
        }

        let wants_model = matches!(mode, ScoreMode::Model | ScoreMode::Blended);
        let model_response = if wants_model {
            match &self.model {
                Some(scorer) => match scorer.score(resume_text, job_description).await {
                    Ok(response) => Some(response),
                    Err(e) => {
                        warn!("Model scoring failed, falling back to lexical: {e}");
                        None
                    }
                },
                None => None,
            }
        } else {
            None
        };

        match (mode, model_response) {
            (ScoreMode::Lexical, _) => MatchReport {
                score: lexical.score,
                rationale: lexical.rationale,
                backend: "lexical".to_string(),
                degraded: false,
                matched_skills: lexical.matched,
                missing_skills: lexical.missing,
            },
            (ScoreMode::Model, Some(model)) => MatchReport {
                score: model.score,
                rationale: model.experience_assessment.clone(),
                backend: "model".to_string(),
                degraded: false,
                matched_skills: model.matched_skills,
                missing_skills: model.missing_skills,
            },
            (ScoreMode::Blended, Some(model)) => {
                let blended = (lexical.score as f64 * BLEND_LEXICAL
                    + model.score as f64 * BLEND_MODEL)
                    .round() as u32;
                MatchReport {
                    score: blended.min(100),
                    rationale: format!(
                        "blended (lexical {} / model {}): {}",
                        lexical.score, model.score, model.experience_assessment
                    ),
                    backend: "blended".to_string(),
                    degraded: false,
                    matched_skills: model.matched_skills,
                    missing_skills: model.missing_skills,
                }
            }
            // Model path requested but unavailable or failed: lexical
            // fallback, observable via the degraded flag.
            (_, None) => MatchReport {
                score: lexical.score,
                rationale: format!("model unavailable, lexical fallback: {}", lexical.rationale),
                backend: "lexical".to_string(),
                degraded: true,
                matched_skills: lexical.matched,
                missing_skills: lexical.missing,
            },
        }
    }
}

/// Retains jobs whose stored score is >= `threshold` (inclusive boundary).
/// Jobs with no computable score are excluded — not defaulted to 0 — and
/// reported so the caller can record them as Run errors.
pub fn threshold_filter(jobs: &[JobRecord], threshold: i32) -> (Vec<JobRecord>, Vec<String>) {
    let mut matched = Vec::new();
    let mut unscored = Vec::new();
    for job in jobs {
        match job.match_score {
            Some(score) if score >= threshold => matched.push(job.clone()),
            Some(_) => {}
            None => unscored.push(job.source_job_id.clone()),
        }
    }
    (matched, unscored)
}
