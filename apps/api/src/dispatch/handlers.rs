//! HTTP handlers for the engagement webhook and message inspection.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatch::{ingest_event, ProviderEvent};
use crate::errors::AppError;
use crate::models::message::{summarize, EngagementSummary, TrackedMessage};
use crate::state::AppState;

#[derive(Serialize)]
pub struct WebhookResponse {
    pub received: usize,
}

/// POST /api/v1/webhooks/email
///
/// The provider posts a JSON array of events and retries on non-2xx, so this
/// always answers 200 once the batch has been walked; per-event problems are
/// logged and dropped inside the correlator.
pub async fn handle_email_webhook(
    State(state): State<AppState>,
    Json(events): Json<Vec<ProviderEvent>>,
) -> Result<(StatusCode, Json<WebhookResponse>), AppError> {
    let received = events.len();
    for event in events {
        ingest_event(state.store.clone(), event).await?;
    }
    Ok((StatusCode::OK, Json(WebhookResponse { received })))
}

#[derive(Deserialize)]
pub struct InboundReplyRequest {
    #[serde(default)]
    pub sg_message_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub from_email: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// POST /api/v1/webhooks/inbound
///
/// Inbound reply notifications arrive on a separate hook; they fold into the
/// same ledger as a `replied` event.
pub async fn handle_inbound_reply(
    State(state): State<AppState>,
    Json(req): Json<InboundReplyRequest>,
) -> Result<StatusCode, AppError> {
    let event = ProviderEvent {
        sg_message_id: req.sg_message_id,
        message_id: req.message_id,
        event: "inbound".to_string(),
        email: req.from_email,
        url: None,
        reason: None,
        timestamp: req.timestamp,
    };
    ingest_event(state.store.clone(), event).await?;
    Ok(StatusCode::OK)
}

/// One Tracked Message with its read-time engagement aggregation.
#[derive(Serialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: TrackedMessage,
    pub engagement: EngagementSummary,
}

impl From<TrackedMessage> for MessageView {
    fn from(message: TrackedMessage) -> Self {
        let engagement = summarize(&message.events);
        MessageView {
            message,
            engagement,
        }
    }
}

#[derive(Serialize)]
pub struct MessageListResponse {
    pub messages: Vec<MessageView>,
}

/// GET /api/v1/runs/:id/messages
pub async fn handle_list_messages(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<MessageListResponse>, AppError> {
    state
        .store
        .get_run(run_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Run {run_id}")))?;
    let messages = state
        .store
        .list_messages(run_id)
        .await?
        .into_iter()
        .map(MessageView::from)
        .collect();
    Ok(Json(MessageListResponse { messages }))
}

/// GET /api/v1/messages/:id
pub async fn handle_get_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
) -> Result<Json<MessageView>, AppError> {
    let message = state
        .store
        .get_message(message_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Message {message_id}")))?;
    Ok(Json(MessageView::from(message)))
}
