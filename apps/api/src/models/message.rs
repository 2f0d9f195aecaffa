//! Tracked Message — one outbound email and its accumulated engagement events.
//!
//! Events are append-only and ordered by arrival. Provider retries can land
//! the same event twice; the store keeps the duplicates and aggregation is
//! computed on read so replays never double-count.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Normalized engagement event kinds. Provider-specific reply variants
/// (inbound parse, "inbound-reply", "reply") all collapse to `Replied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Delivered,
    Open,
    Click,
    Bounce,
    SpamReport,
    Unsubscribe,
    Deferred,
    Dropped,
    Replied,
}

impl EventKind {
    /// Maps a provider event string to the normalized kind. Unknown strings
    /// return `None`; the correlator logs and drops those.
    pub fn from_provider(s: &str) -> Option<EventKind> {
        match s.trim().to_ascii_lowercase().as_str() {
            "delivered" | "processed" => Some(EventKind::Delivered),
            "open" | "opened" => Some(EventKind::Open),
            "click" | "clicked" => Some(EventKind::Click),
            "bounce" | "bounced" | "blocked" => Some(EventKind::Bounce),
            "spamreport" | "spam_report" | "spam-report" => Some(EventKind::SpamReport),
            "unsubscribe" | "group_unsubscribe" => Some(EventKind::Unsubscribe),
            "deferred" => Some(EventKind::Deferred),
            "dropped" => Some(EventKind::Dropped),
            "reply" | "replied" | "inbound" | "inbound-reply" | "inbound_reply" => {
                Some(EventKind::Replied)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Delivered => "delivered",
            EventKind::Open => "open",
            EventKind::Click => "click",
            EventKind::Bounce => "bounce",
            EventKind::SpamReport => "spam_report",
            EventKind::Unsubscribe => "unsubscribe",
            EventKind::Deferred => "deferred",
            EventKind::Dropped => "dropped",
            EventKind::Replied => "replied",
        }
    }

    pub fn parse(s: &str) -> Option<EventKind> {
        EventKind::from_provider(s)
    }
}

/// A single delivery/interaction signal for a Tracked Message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementEvent {
    pub kind: EventKind,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// One outbound email, created before the dispatch collaborator is called so
/// a mid-call crash still leaves an "attempted" record. Dry-run sends follow
/// the identical path with `dry_run=true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedMessage {
    pub id: Uuid,
    pub run_id: Uuid,
    pub source_job_id: Option<String>,
    /// Present once the dispatch collaborator accepts the send.
    pub provider_message_id: Option<String>,
    pub recipient: String,
    pub subject: String,
    pub dry_run: bool,
    pub created_at: DateTime<Utc>,
    pub events: Vec<EngagementEvent>,
}

impl TrackedMessage {
    pub fn new(run_id: Uuid, source_job_id: Option<String>, recipient: &str, subject: &str, dry_run: bool) -> Self {
        TrackedMessage {
            id: Uuid::new_v4(),
            run_id,
            source_job_id,
            provider_message_id: None,
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            dry_run,
            created_at: Utc::now(),
            events: Vec::new(),
        }
    }
}

/// Read-time engagement aggregation. Raw counts include provider replays;
/// the derived score is presence-based so duplicates cannot inflate it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngagementSummary {
    pub delivered: u32,
    pub opens: u32,
    pub clicks: u32,
    pub replies: u32,
    pub bounces: u32,
    /// 0–100: bounce forces 0, otherwise 20·opened + 40·clicked + 60·replied
    /// (booleans), capped at 100.
    pub score: u32,
}

pub fn summarize(events: &[EngagementEvent]) -> EngagementSummary {
    let mut summary = EngagementSummary::default();
    for event in events {
        match event.kind {
            EventKind::Delivered => summary.delivered += 1,
            EventKind::Open => summary.opens += 1,
            EventKind::Click => summary.clicks += 1,
            EventKind::Replied => summary.replies += 1,
            EventKind::Bounce => summary.bounces += 1,
            _ => {}
        }
    }

    summary.score = if summary.bounces > 0 {
        0
    } else {
        let mut score = 0u32;
        if summary.opens > 0 {
            score += 20;
        }
        if summary.clicks > 0 {
            score += 40;
        }
        if summary.replies > 0 {
            score += 60;
        }
        score.min(100)
    };

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind) -> EngagementEvent {
        EngagementEvent {
            kind,
            email: None,
            url: None,
            reason: None,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn test_provider_kinds_normalize() {
        assert_eq!(EventKind::from_provider("open"), Some(EventKind::Open));
        assert_eq!(EventKind::from_provider("OPENED"), Some(EventKind::Open));
        assert_eq!(
            EventKind::from_provider("spamreport"),
            Some(EventKind::SpamReport)
        );
        assert_eq!(EventKind::from_provider("processed"), Some(EventKind::Delivered));
        assert_eq!(EventKind::from_provider("garbage"), None);
    }

    #[test]
    fn test_reply_variants_collapse_to_replied() {
        for s in ["reply", "replied", "inbound", "inbound-reply", "inbound_reply"] {
            assert_eq!(EventKind::from_provider(s), Some(EventKind::Replied), "{s}");
        }
    }

    #[test]
    fn test_duplicate_events_do_not_inflate_score() {
        let once = summarize(&[event(EventKind::Open)]);
        let replayed = summarize(&[
            event(EventKind::Open),
            event(EventKind::Open),
            event(EventKind::Open),
        ]);
        assert_eq!(replayed.opens, 3);
        assert_eq!(once.score, replayed.score);
    }

    #[test]
    fn test_bounce_zeroes_score() {
        let summary = summarize(&[
            event(EventKind::Open),
            event(EventKind::Click),
            event(EventKind::Bounce),
        ]);
        assert_eq!(summary.score, 0);
    }

    #[test]
    fn test_full_engagement_reaches_cap() {
        let summary = summarize(&[
            event(EventKind::Open),
            event(EventKind::Click),
            event(EventKind::Replied),
        ]);
        assert_eq!(summary.score, 100);
    }
}
