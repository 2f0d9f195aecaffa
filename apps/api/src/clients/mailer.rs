//! SendGrid v3 dispatch backend.
//!
//! Returns the provider message id from the `X-Message-Id` response header —
//! that id is what webhook events carry, so the Engagement Correlator keys
//! lookups on it.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use super::{ClientError, Mailer, OutboundEmail, SendOutcome};

pub struct SendgridMailer {
    client: Client,
    base_url: String,
    api_key: String,
    from_address: String,
}

impl SendgridMailer {
    pub fn new(base_url: String, api_key: String, from_address: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            base_url,
            api_key,
            from_address,
        }
    }
}

#[async_trait]
impl Mailer for SendgridMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<SendOutcome, ClientError> {
        let b64 = base64::engine::general_purpose::STANDARD;
        let attachments: Vec<_> = email
            .attachments
            .iter()
            .map(|(filename, content)| {
                json!({
                    "filename": filename,
                    "type": "text/markdown",
                    "content": b64.encode(content.as_bytes()),
                })
            })
            .collect();

        let mut body = json!({
            "personalizations": [{ "to": [{ "email": email.to }] }],
            "from": { "email": self.from_address },
            "subject": email.subject,
            "content": [{ "type": "text/plain", "value": email.body }],
        });
        if !attachments.is_empty() {
            body["attachments"] = json!(attachments);
        }

        let response = self
            .client
            .post(format!("{}/v3/mail/send", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let provider_message_id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        debug!(
            "Send accepted for {} (provider id: {:?})",
            email.to, provider_message_id
        );

        Ok(SendOutcome {
            provider_message_id,
            accepted: true,
        })
    }
}
