//! Run — one end-to-end execution of the pipeline for a search query.
//!
//! A Run moves through a fixed stage sequence (discover → parse → enrich →
//! generate → email → done) and accumulates per-stage counts and non-fatal
//! errors along the way. The stage never regresses; `error` is reachable from
//! any non-terminal stage.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ordered pipeline stages. `Done` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStage {
    Discover,
    Parse,
    Enrich,
    Generate,
    Email,
    Done,
    Error,
}

/// Number of working stages used for progress estimation (excludes terminals).
pub const WORKING_STAGES: usize = 5;

impl RunStage {
    /// Position in the forward sequence. `Error` sorts last so the
    /// no-regression check treats it as always reachable.
    pub fn ordinal(&self) -> usize {
        match self {
            RunStage::Discover => 0,
            RunStage::Parse => 1,
            RunStage::Enrich => 2,
            RunStage::Generate => 3,
            RunStage::Email => 4,
            RunStage::Done => 5,
            RunStage::Error => 6,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStage::Done | RunStage::Error)
    }

    /// Forward-only transition rule: advance through the sequence or jump to
    /// `Error`. Terminal stages accept no further transitions.
    pub fn may_transition_to(&self, next: RunStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == RunStage::Error || next.ordinal() > self.ordinal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Discover => "discover",
            RunStage::Parse => "parse",
            RunStage::Enrich => "enrich",
            RunStage::Generate => "generate",
            RunStage::Email => "email",
            RunStage::Done => "done",
            RunStage::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<RunStage> {
        match s {
            "discover" => Some(RunStage::Discover),
            "parse" => Some(RunStage::Parse),
            "enrich" => Some(RunStage::Enrich),
            "generate" => Some(RunStage::Generate),
            "email" => Some(RunStage::Email),
            "done" => Some(RunStage::Done),
            "error" => Some(RunStage::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<RunStatus> {
        match s {
            "pending" => Some(RunStatus::Pending),
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// Fine-grained intra-stage progress for long stages (generation, enrichment).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageProgress {
    pub processed: u64,
    pub total: u64,
}

/// A single counter slot: either a scalar count (`jobs: 40`) or a
/// `{processed, total}` pair for stages that report live progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CountValue {
    Scalar(i64),
    Progress(StageProgress),
}

/// Per-stage progress counters, keyed by count name. Serialized as a JSON
/// object so the store can persist it in a single JSONB column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunCounts(pub BTreeMap<String, CountValue>);

impl RunCounts {
    pub fn set(&mut self, key: &str, value: i64) {
        self.0.insert(key.to_string(), CountValue::Scalar(value));
    }

    pub fn set_progress(&mut self, key: &str, processed: u64, total: u64) {
        self.0.insert(
            key.to_string(),
            CountValue::Progress(StageProgress { processed, total }),
        );
    }

    pub fn scalar(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(CountValue::Scalar(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn progress(&self, key: &str) -> Option<StageProgress> {
        match self.0.get(key) {
            Some(CountValue::Progress(p)) => Some(*p),
            _ => None,
        }
    }
}

/// One end-to-end pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub query: String,
    /// The resume the Run scores and tailors against. Threaded explicitly —
    /// there is no ambient "current candidate" in the core.
    #[serde(skip_serializing)]
    pub resume_text: String,
    pub stage: RunStage,
    pub status: RunStatus,
    pub counts: RunCounts,
    /// Non-fatal errors accumulated during the Run. Non-empty errors do not
    /// imply `status=failed`.
    pub errors: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(query: &str, resume_text: &str) -> Self {
        let now = Utc::now();
        Run {
            id: Uuid::new_v4(),
            query: query.to_string(),
            resume_text: resume_text.to_string(),
            stage: RunStage::Discover,
            status: RunStatus::Pending,
            counts: RunCounts::default(),
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Presentation-only progress estimate in [0,1]: completed-stage fraction
    /// plus an intra-stage estimate where the current stage reports one.
    /// Stage identity, not this number, decides whether the Run is finished.
    pub fn progress_fraction(&self) -> f64 {
        match self.stage {
            RunStage::Done => return 1.0,
            RunStage::Error => return 1.0,
            _ => {}
        }

        let base = self.stage.ordinal() as f64 / WORKING_STAGES as f64;
        let segment = 1.0 / WORKING_STAGES as f64;

        let intra = match self.stage {
            RunStage::Enrich => self.intra_estimate("enriched"),
            RunStage::Generate => self.intra_estimate("generated"),
            RunStage::Email => self.intra_estimate("emailed"),
            _ => 0.0,
        };

        (base + segment * intra).clamp(0.0, 1.0)
    }

    fn intra_estimate(&self, key: &str) -> f64 {
        if let Some(p) = self.counts.progress(key) {
            if p.total > 0 {
                return (p.processed as f64 / p.total as f64).clamp(0.0, 1.0);
            }
        }
        0.0
    }
}
