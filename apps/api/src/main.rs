mod artifacts;
mod clients;
mod config;
mod db;
mod dispatch;
mod enrich;
mod errors;
mod generation;
mod llm_client;
mod matching;
mod models;
mod pipeline;
mod routes;
mod state;
mod store;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::artifacts::S3Artifacts;
use crate::clients::contacts::HunterContactFinder;
use crate::clients::discovery::JsearchDiscovery;
use crate::clients::mailer::SendgridMailer;
use crate::config::Config;
use crate::db::create_pool;
use crate::generation::LlmDocumentModel;
use crate::llm_client::LlmClient;
use crate::matching::{LlmModelScorer, MatchingEngine};
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::PgStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Outreach API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL and run migrations
    let pool = create_pool(&config.database_url).await?;
    let store = Arc::new(PgStore::new(pool));

    // Initialize S3 / MinIO
    let s3 = build_s3_client(&config).await;
    let artifacts = Arc::new(S3Artifacts::new(s3, config.s3_bucket.clone()));
    info!("S3 client initialized (bucket: {})", config.s3_bucket);

    // Initialize LLM-backed collaborators
    let llm = LlmClient::new(config.anthropic_api_key.clone());
    let matching = Arc::new(MatchingEngine::new(Some(Arc::new(LlmModelScorer(
        llm.clone(),
    )))));
    let docs = Arc::new(LlmDocumentModel(llm));
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    // External collaborators
    let discovery = Arc::new(JsearchDiscovery::new(
        config.discovery_api_url.clone(),
        config.discovery_api_key.clone(),
    ));
    let contacts = Arc::new(HunterContactFinder::new(
        config.contacts_api_url.clone(),
        config.contacts_api_key.clone(),
    ));
    let mailer = Arc::new(SendgridMailer::new(
        config.sendgrid_api_url.clone(),
        config.sendgrid_api_key.clone(),
        config.email_from.clone(),
    ));
    if !config.live_sends {
        info!("Live sends disabled; dispatch defaults to dry-run");
    }

    // Build app state
    let state = AppState {
        store,
        discovery,
        contacts,
        matching,
        docs,
        artifacts,
        mailer,
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "outreach-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}
