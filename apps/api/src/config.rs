use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub anthropic_api_key: String,
    pub discovery_api_url: String,
    pub discovery_api_key: String,
    pub contacts_api_url: String,
    pub contacts_api_key: String,
    pub sendgrid_api_url: String,
    pub sendgrid_api_key: String,
    pub email_from: String,
    /// Inclusive score threshold a job must reach to get documents.
    pub match_threshold: i32,
    pub enrich_concurrency: usize,
    pub generation_concurrency: usize,
    pub collaborator_timeout_secs: u64,
    /// Live sends are opt-in; the default dispatches dry-run only.
    pub live_sends: bool,
    pub max_emails_per_run: usize,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            discovery_api_url: env_or("DISCOVERY_API_URL", "https://jsearch.p.rapidapi.com"),
            discovery_api_key: require_env("DISCOVERY_API_KEY")?,
            contacts_api_url: env_or("CONTACTS_API_URL", "https://api.hunter.io/v2"),
            contacts_api_key: require_env("CONTACTS_API_KEY")?,
            sendgrid_api_url: env_or("SENDGRID_API_URL", "https://api.sendgrid.com"),
            sendgrid_api_key: require_env("SENDGRID_API_KEY")?,
            email_from: require_env("EMAIL_FROM")?,
            match_threshold: parse_env("MATCH_THRESHOLD", 60)?,
            enrich_concurrency: parse_env("ENRICH_CONCURRENCY", 4)?,
            generation_concurrency: parse_env("GENERATION_CONCURRENCY", 3)?,
            collaborator_timeout_secs: parse_env("COLLABORATOR_TIMEOUT_SECS", 45)?,
            live_sends: std::env::var("LIVE_SENDS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            max_emails_per_run: parse_env("MAX_EMAILS_PER_RUN", 10)?,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| anyhow::anyhow!("'{key}' has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}
