//! Inbox jobs: attachment processing and provider syncs.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tally_job_queue::{FlowJob, JobDefinition, JobOptions, JobQueueError, SchemaViolation, SerdeSchema};
use uuid::Uuid;

use crate::documents::{check_file_path, ProcessDocumentPayload, PROCESS_DOCUMENT};
use crate::{job_types, queues};

/// Payload for the process-attachment job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessAttachmentPayload {
    pub team_id: Uuid,
    pub file_path: Vec<String>,
    pub mime_type: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbox_account_id: Option<Uuid>,
}

/// Payload for the sync-inbox-account job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncInboxAccountPayload {
    pub id: Uuid,
    #[serde(default)]
    pub manual_sync: bool,
}

pub static PROCESS_ATTACHMENT: Lazy<JobDefinition<ProcessAttachmentPayload>> = Lazy::new(|| {
    JobDefinition::new(
        job_types::PROCESS_ATTACHMENT,
        queues::INBOX,
        SerdeSchema::new().check(|p: &ProcessAttachmentPayload| {
            check_file_path(&p.file_path)?;
            if p.size == 0 {
                return Err(SchemaViolation::at("size", "must be greater than zero"));
            }
            Ok(())
        }),
    )
    .with_options(JobOptions::new().attempts(3).keep_completed(200).keep_failed(200))
});

/// Pull new messages from a connected inbox provider.
pub static SYNC_INBOX_ACCOUNT: Lazy<JobDefinition<SyncInboxAccountPayload>> = Lazy::new(|| {
    JobDefinition::new(
        job_types::SYNC_INBOX_ACCOUNT,
        queues::INBOX_PROVIDER,
        SerdeSchema::new(),
    )
    .with_options(JobOptions::new().attempts(2))
});

/// Attachment processing that first runs document extraction on the same
/// file. The attachment job starts once extraction has finished.
pub fn attachment_flow(payload: &ProcessAttachmentPayload) -> Result<FlowJob, JobQueueError> {
    let document = ProcessDocumentPayload {
        team_id: payload.team_id,
        file_path: payload.file_path.clone(),
        mime_type: payload.mime_type.clone(),
    };
    let parent = PROCESS_ATTACHMENT.flow(
        &to_value(job_types::PROCESS_ATTACHMENT, payload)?,
        JobOptions::new(),
    )?;
    let child = PROCESS_DOCUMENT.flow(
        &to_value(job_types::PROCESS_DOCUMENT, &document)?,
        JobOptions::new(),
    )?;
    Ok(parent.child(child))
}

fn to_value<T: Serialize>(job: &str, payload: &T) -> Result<serde_json::Value, JobQueueError> {
    serde_json::to_value(payload).map_err(|e| JobQueueError::Validation {
        job: job.to_owned(),
        index: None,
        detail: e.to_string(),
    })
}
