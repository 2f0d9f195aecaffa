//! Generated-document artifact storage.
//!
//! Documents are addressed by a stable, job-scoped key so repeated requests
//! for "the current cover letter for job X" resolve without re-generation.
//! Production backend is S3/MinIO; tests use the in-memory backend.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use uuid::Uuid;

/// Which tailored document a key refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    CoverLetter,
    TailoredResume,
}

impl DocumentKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            DocumentKind::CoverLetter => "cover_letter.md",
            DocumentKind::TailoredResume => "tailored_resume.md",
        }
    }
}

/// Stable artifact key for one document of one job.
pub fn document_key(run_id: Uuid, source_job_id: &str, kind: DocumentKind) -> String {
    format!("runs/{run_id}/jobs/{source_job_id}/{}", kind.file_name())
}

#[async_trait]
pub trait DocumentArtifacts: Send + Sync {
    /// Writes the document body and returns its key. Overwrites any previous
    /// version at the same key (regeneration replaces in place).
    async fn put(
        &self,
        run_id: Uuid,
        source_job_id: &str,
        kind: DocumentKind,
        body: &str,
    ) -> Result<String>;
}

/// S3-backed artifact store (MinIO locally, AWS in production).
pub struct S3Artifacts {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Artifacts {
    pub fn new(client: aws_sdk_s3::Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl DocumentArtifacts for S3Artifacts {
    async fn put(
        &self,
        run_id: Uuid,
        source_job_id: &str,
        kind: DocumentKind,
        body: &str,
    ) -> Result<String> {
        let key = document_key(run_id, source_job_id, kind);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(body.as_bytes().to_vec()))
            .content_type("text/markdown")
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("S3 upload failed for {key}: {e}"))?;
        Ok(key)
    }
}

/// In-memory artifact store used by tests.
#[derive(Default)]
pub struct MemoryArtifacts {
    objects: RwLock<HashMap<String, String>>,
}

impl MemoryArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.objects.read().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl DocumentArtifacts for MemoryArtifacts {
    async fn put(
        &self,
        run_id: Uuid,
        source_job_id: &str,
        kind: DocumentKind,
        body: &str,
    ) -> Result<String> {
        let key = document_key(run_id, source_job_id, kind);
        self.objects
            .write()
            .unwrap()
            .insert(key.clone(), body.to_string());
        Ok(key)
    }
}
