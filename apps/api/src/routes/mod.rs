pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::dispatch::handlers as dispatch_handlers;
use crate::pipeline::handlers as pipeline_handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Run lifecycle
        .route("/api/v1/runs", post(pipeline_handlers::handle_start_run))
        .route("/api/v1/runs/:id", get(pipeline_handlers::handle_get_run))
        .route(
            "/api/v1/runs/:id/jobs",
            get(pipeline_handlers::handle_list_jobs),
        )
        .route(
            "/api/v1/runs/:id/enrich",
            post(pipeline_handlers::handle_enrich),
        )
        .route(
            "/api/v1/runs/:id/generate",
            post(pipeline_handlers::handle_generate),
        )
        .route("/api/v1/runs/:id/send", post(pipeline_handlers::handle_send))
        .route(
            "/api/v1/runs/:id/cancel",
            post(pipeline_handlers::handle_cancel),
        )
        // Engagement
        .route(
            "/api/v1/runs/:id/messages",
            get(dispatch_handlers::handle_list_messages),
        )
        .route(
            "/api/v1/messages/:id",
            get(dispatch_handlers::handle_get_message),
        )
        .route(
            "/api/v1/webhooks/email",
            post(dispatch_handlers::handle_email_webhook),
        )
        .route(
            "/api/v1/webhooks/inbound",
            post(dispatch_handlers::handle_inbound_reply),
        )
        .with_state(state)
}
