//! Activity notifications.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tally_job_queue::{JobDefinition, JobOptions, SchemaViolation, SerdeSchema};
use uuid::Uuid;

use crate::{job_types, queues};

/// Notification kinds the notification worker knows how to render.
pub const NOTIFICATION_KINDS: &[&str] = &[
    "document_uploaded",
    "document_processed",
    "invoice_scheduled",
    "invoice_sent",
    "invoice_paid",
    "invoice_refunded",
    "inbox_new",
    "transactions_exported",
];

/// Payload for the notification job. Fields beyond `type` and `team_id`
/// are kind-specific and passed through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub team_id: Uuid,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

pub static NOTIFICATION: Lazy<JobDefinition<NotificationPayload>> = Lazy::new(|| {
    JobDefinition::new(
        job_types::NOTIFICATION,
        queues::NOTIFICATIONS,
        SerdeSchema::new().check(|p: &NotificationPayload| {
            if NOTIFICATION_KINDS.contains(&p.kind.as_str()) {
                Ok(())
            } else {
                Err(SchemaViolation::at(
                    "type",
                    format!("unknown notification type {:?}", p.kind),
                ))
            }
        }),
    )
    .with_options(JobOptions::new().attempts(5).keep_completed(50))
});

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tally_job_queue::Validator;

    #[test]
    fn keeps_kind_specific_fields() {
        let team_id = Uuid::new_v4();
        let parsed = NOTIFICATION
            .schema()
            .parse(&json!({
                "type": "invoice_scheduled",
                "team_id": team_id,
                "invoice_number": "INV-0042",
                "scheduled_at": "2026-11-01T09:00:00Z"
            }))
            .expect("valid");
        assert_eq!(parsed.kind, "invoice_scheduled");
        assert_eq!(parsed.fields["invoice_number"], "INV-0042");

        let err = NOTIFICATION
            .schema()
            .parse(&json!({ "type": "pager", "team_id": team_id }))
            .unwrap_err();
        assert_eq!(err.path.as_deref(), Some("type"));
    }
}
