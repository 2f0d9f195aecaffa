//! Job Record — one discovered posting plus its derived artifacts.
//!
//! The natural key is the source-assigned `source_job_id`, unique within a
//! Run. Upserts are keyed on it so repeated discovery calls stay idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A posting as returned by the discovery collaborator, before validation.
/// Everything beyond the core fields rides along in `source_payload` for
/// audit/debugging; validation happens once at the Store boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawJobRecord {
    pub source_job_id: String,
    pub title: String,
    pub company: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    pub description: String,
    #[serde(default)]
    pub source_payload: Value,
}

/// A recruiter/company contact. Any subset of fields may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub profile_url: Option<String>,
}

impl Contact {
    pub fn has_email(&self) -> bool {
        self.email.as_deref().map(|e| !e.is_empty()).unwrap_or(false)
    }

    pub fn has_name(&self) -> bool {
        self.name.as_deref().map(|n| !n.is_empty()).unwrap_or(false)
    }

    /// Rough completeness measure used by the non-destructive merge.
    pub fn completeness(&self) -> u32 {
        [
            self.name.is_some(),
            self.title.is_some(),
            self.email.is_some(),
            self.profile_url.is_some(),
        ]
        .iter()
        .filter(|b| **b)
        .count() as u32
    }
}

/// Stored representation of one posting. Derived fields stay `None`/empty
/// until the corresponding stage computes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub run_id: Uuid,
    pub source_job_id: String,
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub url: Option<String>,
    pub description: String,
    pub source_payload: Value,
    pub contacts: Vec<Contact>,
    pub match_score: Option<i32>,
    pub match_rationale: Option<String>,
    pub cover_letter: Option<String>,
    pub tailored_resume: Option<String>,
    pub cover_letter_key: Option<String>,
    pub resume_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn from_raw(run_id: Uuid, raw: &RawJobRecord) -> Self {
        let now = Utc::now();
        JobRecord {
            id: Uuid::new_v4(),
            run_id,
            source_job_id: raw.source_job_id.clone(),
            title: raw.title.clone(),
            company: raw.company.clone(),
            location: raw.location.clone(),
            url: raw.url.clone(),
            description: raw.description.clone(),
            source_payload: raw.source_payload.clone(),
            contacts: Vec::new(),
            match_score: None,
            match_rationale: None,
            cover_letter: None,
            tailored_resume: None,
            cover_letter_key: None,
            resume_key: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite-with-latest for scalar fields; derived fields are untouched.
    pub fn apply_raw(&mut self, raw: &RawJobRecord) {
        self.title = raw.title.clone();
        self.company = raw.company.clone();
        self.location = raw.location.clone();
        self.url = raw.url.clone();
        self.description = raw.description.clone();
        self.source_payload = raw.source_payload.clone();
        self.updated_at = Utc::now();
    }

    pub fn primary_email(&self) -> Option<&str> {
        self.contacts
            .iter()
            .find(|c| c.has_email())
            .and_then(|c| c.email.as_deref())
    }

    pub fn has_documents(&self) -> bool {
        self.cover_letter.is_some() && self.tailored_resume.is_some()
    }
}

/// Non-destructive contact merge: incoming contacts never reduce the
/// information already present. Contacts are matched by email (or by name
/// when neither side carries an email); matched pairs fill missing fields,
/// unmatched incoming contacts are appended. Existing ordering is preserved.
pub fn merge_contacts(existing: &[Contact], incoming: &[Contact]) -> Vec<Contact> {
    if incoming.is_empty() {
        return existing.to_vec();
    }

    let mut merged: Vec<Contact> = existing.to_vec();
    for inc in incoming {
        let slot = merged.iter_mut().find(|e| same_contact(e, inc));
        match slot {
            Some(e) => fill_missing(e, inc),
            None => merged.push(inc.clone()),
        }
    }
    merged
}

fn same_contact(a: &Contact, b: &Contact) -> bool {
    match (a.email.as_deref(), b.email.as_deref()) {
        (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
        (None, None) => match (a.name.as_deref(), b.name.as_deref()) {
            (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
            _ => false,
        },
        _ => false,
    }
}

fn fill_missing(target: &mut Contact, source: &Contact) {
    if target.name.is_none() {
        target.name = source.name.clone();
    }
    if target.title.is_none() {
        target.title = source.title.clone();
    }
    if target.email.is_none() {
        target.email = source.email.clone();
    }
    if target.profile_url.is_none() {
        target.profile_url = source.profile_url.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(name: Option<&str>, email: Option<&str>, title: Option<&str>) -> Contact {
        Contact {
            name: name.map(String::from),
            email: email.map(String::from),
            title: title.map(String::from),
            profile_url: None,
        }
    }

    #[test]
    fn test_merge_with_empty_incoming_keeps_existing() {
        let existing = vec![contact(Some("Ada"), Some("ada@acme.com"), None)];
        let merged = merge_contacts(&existing, &[]);
        assert_eq!(merged, existing);
    }

    #[test]
    fn test_merge_fills_missing_fields_without_overwriting() {
        let existing = vec![contact(Some("Ada"), Some("ada@acme.com"), None)];
        let incoming = vec![contact(
            Some("Ada Lovelace"),
            Some("ADA@acme.com"),
            Some("Technical Recruiter"),
        )];
        let merged = merge_contacts(&existing, &incoming);
        assert_eq!(merged.len(), 1);
        // Name stays as originally stored; the missing title is filled in.
        assert_eq!(merged[0].name.as_deref(), Some("Ada"));
        assert_eq!(merged[0].title.as_deref(), Some("Technical Recruiter"));
    }

    #[test]
    fn test_merge_appends_new_contacts() {
        let existing = vec![contact(Some("Ada"), Some("ada@acme.com"), None)];
        let incoming = vec![contact(Some("Grace"), Some("grace@acme.com"), None)];
        let merged = merge_contacts(&existing, &incoming);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].email.as_deref(), Some("ada@acme.com"));
    }

    #[test]
    fn test_merge_never_reduces_information() {
        let existing = vec![contact(Some("Ada"), Some("ada@acme.com"), Some("Recruiter"))];
        let incoming = vec![contact(None, Some("ada@acme.com"), None)];
        let merged = merge_contacts(&existing, &incoming);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].completeness() >= existing[0].completeness());
    }

    #[test]
    fn test_apply_raw_preserves_derived_fields() {
        let raw = RawJobRecord {
            source_job_id: "j1".into(),
            title: "Engineer".into(),
            company: "Acme".into(),
            location: None,
            url: None,
            description: "desc".into(),
            source_payload: serde_json::json!({}),
        };
        let mut record = JobRecord::from_raw(Uuid::new_v4(), &raw);
        record.match_score = Some(72);
        record.contacts = vec![contact(Some("Ada"), Some("ada@acme.com"), None)];

        let updated = RawJobRecord {
            title: "Senior Engineer".into(),
            ..raw
        };
        record.apply_raw(&updated);

        assert_eq!(record.title, "Senior Engineer");
        assert_eq!(record.match_score, Some(72));
        assert_eq!(record.contacts.len(), 1);
    }
}
