//! Job definitions for the Tally worker queues.
//!
//! Each job is a [`JobDefinition`](tally_job_queue::JobDefinition) binding
//! its id to a queue, a payload schema and job-level options. Callers holding
//! typed payloads use the statics directly; callers holding raw JSON (the
//! CLI, webhooks) go through the [`JobCatalog`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use tally_job_queue::{ConnectionConfig, InMemoryBroker, JobOptions, JobTriggerClient, QueueConfig};
//! use tally_jobs::invoices::GENERATE_INVOICE;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = QueueConfig::new(ConnectionConfig::new("memory://"));
//!     let client = JobTriggerClient::external(Arc::new(InMemoryBroker::new()), config);
//!     let payload = json!({
//!         "invoice_id": "0b5c5a4e-2f7e-4a53-9d59-7f2b1d6c9a10",
//!         "delivery_type": "create_and_send"
//!     });
//!     GENERATE_INVOICE
//!         .trigger(&client, &payload, JobOptions::new())
//!         .await
//!         .unwrap();
//! }
//! ```

mod catalog;
pub mod documents;
mod error;
pub mod inbox;
pub mod invoices;
pub mod notifications;

pub use catalog::{DynJob, JobCatalog};
pub use error::JobsError;

/// Job id constants for type-safe job references.
pub mod job_types {
    pub const GENERATE_INVOICE: &str = "generate-invoice";
    pub const SCHEDULE_INVOICE: &str = "schedule-invoice";
    pub const SEND_INVOICE_REMINDER: &str = "send-invoice-reminder";
    pub const PROCESS_DOCUMENT: &str = "process-document";
    pub const PROCESS_ATTACHMENT: &str = "process-attachment";
    pub const SYNC_INBOX_ACCOUNT: &str = "sync-inbox-account";
    pub const NOTIFICATION: &str = "notification";
}

/// Queue names the worker consumes.
pub mod queues {
    pub const INVOICES: &str = "invoices";
    pub const DOCUMENTS: &str = "documents";
    pub const INBOX: &str = "inbox";
    pub const INBOX_PROVIDER: &str = "inbox-provider";
    pub const NOTIFICATIONS: &str = "notifications";

    /// Every queue, for building a worker registry.
    pub const ALL: &[&str] = &[INVOICES, DOCUMENTS, INBOX, INBOX_PROVIDER, NOTIFICATIONS];
}
