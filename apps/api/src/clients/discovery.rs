//! JSearch-style job discovery backend.
//!
//! Maps provider payloads to `RawJobRecord` at the edge: the natural key and
//! core fields are lifted out, the full provider object is retained verbatim
//! in `source_payload` for audit/debugging. Records the provider returns
//! without a job id are dropped here with a warning — the Store would skip
//! them anyway.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::job::RawJobRecord;

use super::{ClientError, Discovery};

pub struct JsearchDiscovery {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<Value>,
}

impl JsearchDiscovery {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .expect("Failed to build HTTP client"),
            base_url,
            api_key,
        }
    }

    fn to_raw_record(item: &Value) -> Option<RawJobRecord> {
        let source_job_id = item.get("job_id")?.as_str()?.to_string();
        if source_job_id.is_empty() {
            return None;
        }
        let text = |key: &str| {
            item.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let opt = |key: &str| {
            item.get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };
        Some(RawJobRecord {
            source_job_id,
            title: text("job_title"),
            company: text("employer_name"),
            location: opt("job_location"),
            url: opt("job_apply_link"),
            description: text("job_description"),
            source_payload: item.clone(),
        })
    }
}

#[async_trait]
impl Discovery for JsearchDiscovery {
    async fn search(
        &self,
        query: &str,
        sources: &[String],
    ) -> Result<Vec<RawJobRecord>, ClientError> {
        let url = format!("{}/search", self.base_url);
        let mut request = self
            .client
            .get(&url)
            .header("x-rapidapi-key", &self.api_key)
            .query(&[("query", query), ("num_pages", "1")]);
        if !sources.is_empty() {
            request = request.query(&[("publishers", sources.join(","))]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: SearchResponse = response.json().await?;
        let mut records = Vec::with_capacity(body.data.len());
        for item in &body.data {
            match Self::to_raw_record(item) {
                Some(record) => records.push(record),
                None => warn!("Discovery result without job id dropped: {item}"),
            }
        }
        debug!("Discovery returned {} usable postings for '{query}'", records.len());
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_payload_maps_to_raw_record() {
        let item = json!({
            "job_id": "abc-123",
            "job_title": "Rust Engineer",
            "employer_name": "Acme",
            "job_location": "Remote",
            "job_apply_link": "https://acme.example/jobs/abc-123",
            "job_description": "Write Rust.",
            "job_salary": "competitive"
        });
        let record = JsearchDiscovery::to_raw_record(&item).unwrap();
        assert_eq!(record.source_job_id, "abc-123");
        assert_eq!(record.title, "Rust Engineer");
        assert_eq!(record.company, "Acme");
        // The full provider object survives in the payload bag.
        assert_eq!(record.source_payload["job_salary"], "competitive");
    }

    #[test]
    fn test_record_without_job_id_is_dropped() {
        let item = json!({"job_title": "Mystery role"});
        assert!(JsearchDiscovery::to_raw_record(&item).is_none());
        let item = json!({"job_id": "", "job_title": "Empty id"});
        assert!(JsearchDiscovery::to_raw_record(&item).is_none());
    }

    #[test]
    fn test_missing_optional_fields_become_none() {
        let item = json!({
            "job_id": "j1",
            "job_title": "Engineer",
            "employer_name": "Acme",
            "job_description": "desc"
        });
        let record = JsearchDiscovery::to_raw_record(&item).unwrap();
        assert!(record.location.is_none());
        assert!(record.url.is_none());
    }
}
