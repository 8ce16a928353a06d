//! Document processing jobs.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tally_job_queue::{BackoffPolicy, JobDefinition, JobOptions, SchemaViolation, SerdeSchema};
use uuid::Uuid;

use crate::{job_types, queues};

/// Payload for the process-document job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDocumentPayload {
    pub team_id: Uuid,
    /// Storage path segments, bucket first.
    pub file_path: Vec<String>,
    pub mime_type: String,
}

pub(crate) fn check_file_path(path: &[String]) -> Result<(), SchemaViolation> {
    if path.is_empty() {
        return Err(SchemaViolation::at("file_path", "must not be empty"));
    }
    if path.iter().any(|segment| segment.is_empty() || segment == "..") {
        return Err(SchemaViolation::at(
            "file_path",
            "segments must be non-empty and must not be \"..\"",
        ));
    }
    Ok(())
}

/// Extract text and metadata from an uploaded document.
pub static PROCESS_DOCUMENT: Lazy<JobDefinition<ProcessDocumentPayload>> = Lazy::new(|| {
    JobDefinition::new(
        job_types::PROCESS_DOCUMENT,
        queues::DOCUMENTS,
        SerdeSchema::new().check(|p: &ProcessDocumentPayload| {
            check_file_path(&p.file_path)?;
            if !p.mime_type.contains('/') {
                return Err(SchemaViolation::at("mime_type", "must be a type/subtype pair"));
            }
            Ok(())
        }),
    )
    .with_options(
        JobOptions::new()
            .attempts(3)
            .backoff(BackoffPolicy::exponential(1_000))
            .keep_completed(100),
    )
});
