//! Hunter-style contact enrichment backend (domain search).
//!
//! The provider is company-scoped: one call per company returns candidate
//! contacts. Ranking among candidates happens in the Enrichment Coordinator,
//! not here — this backend only maps provider rows to `Contact`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::models::job::Contact;

use super::{ClientError, ContactFinder};

pub struct HunterContactFinder {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct DomainSearchResponse {
    data: DomainSearchData,
}

#[derive(Debug, Deserialize)]
struct DomainSearchData {
    #[serde(default)]
    emails: Vec<ProviderContact>,
}

#[derive(Debug, Deserialize)]
struct ProviderContact {
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    position: Option<String>,
    #[serde(default)]
    linkedin: Option<String>,
}

impl ProviderContact {
    fn into_contact(self) -> Contact {
        let name = match (self.first_name, self.last_name) {
            (Some(first), Some(last)) => Some(format!("{first} {last}")),
            (Some(first), None) => Some(first),
            (None, Some(last)) => Some(last),
            (None, None) => None,
        };
        Contact {
            name,
            title: self.position,
            email: self.value.filter(|v| !v.is_empty()),
            profile_url: self.linkedin,
        }
    }
}

impl HunterContactFinder {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl ContactFinder for HunterContactFinder {
    async fn find_contacts(
        &self,
        company: &str,
        _job_title: &str,
    ) -> Result<Vec<Contact>, ClientError> {
        let url = format!("{}/domain-search", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("company", company), ("api_key", &self.api_key)])
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

        let body: DomainSearchResponse = response.json().await?;
        let contacts: Vec<Contact> = body
            .data
            .emails
            .into_iter()
            .map(ProviderContact::into_contact)
            .collect();
        debug!("Enrichment returned {} contacts for '{company}'", contacts.len());
        Ok(contacts)
    }
}
