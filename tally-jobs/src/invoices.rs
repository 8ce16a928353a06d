//! Invoice jobs.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tally_job_queue::{JobDefinition, JobHandle, JobOptions, JobTriggerClient, SerdeSchema};
use tracing::info;
use uuid::Uuid;

use crate::error::JobsError;
use crate::{job_types, queues};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryType {
    Create,
    CreateAndSend,
}

/// Payload for the generate-invoice job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateInvoicePayload {
    pub invoice_id: Uuid,
    pub delivery_type: DeliveryType,
}

/// Payload shared by the scheduled-send and reminder jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRef {
    pub invoice_id: Uuid,
}

/// Render the invoice PDF and, for `create_and_send`, email it.
pub static GENERATE_INVOICE: Lazy<JobDefinition<GenerateInvoicePayload>> = Lazy::new(|| {
    JobDefinition::new(
        job_types::GENERATE_INVOICE,
        queues::INVOICES,
        SerdeSchema::new(),
    )
    .with_options(JobOptions::new().attempts(3).keep_completed(100).keep_failed(500))
});

/// Send an invoice at its scheduled time.
pub static SCHEDULE_INVOICE: Lazy<JobDefinition<InvoiceRef>> = Lazy::new(|| {
    JobDefinition::new(
        job_types::SCHEDULE_INVOICE,
        queues::INVOICES,
        SerdeSchema::new(),
    )
    .with_options(JobOptions::new().attempts(3))
});

pub static SEND_INVOICE_REMINDER: Lazy<JobDefinition<InvoiceRef>> = Lazy::new(|| {
    JobDefinition::new(
        job_types::SEND_INVOICE_REMINDER,
        queues::INVOICES,
        SerdeSchema::new(),
    )
});

/// Enqueue `schedule-invoice` to run at `at`.
pub async fn schedule_invoice_at(
    client: &JobTriggerClient,
    invoice_id: Uuid,
    at: DateTime<Utc>,
) -> Result<JobHandle, JobsError> {
    let delay_ms = (at - Utc::now()).num_milliseconds();
    if delay_ms < 0 {
        return Err(JobsError::ScheduleInPast(at.to_rfc3339()));
    }
    let payload = serde_json::json!({ "invoice_id": invoice_id });
    let handle = SCHEDULE_INVOICE
        .trigger_delayed(client, &payload, delay_ms, JobOptions::new())
        .await?;
    info!(%invoice_id, job_id = %handle.id, scheduled_at = %at, "invoice scheduled");
    Ok(handle)
}
