//! Client-side job triggering for the Tally worker queues.
//!
//! Web handlers, scripts and the worker itself use this crate to enqueue
//! background jobs. Payloads are validated against a schema before anything
//! reaches the broker, options are resolved against the queue's defaults,
//! and queue handles are created lazily and shared.
//!
//! # Architecture
//!
//! - [`JobTriggerClient`] - validates, resolves options and submits jobs
//! - [`QueueLocator`] - finds the handle for a queue name
//!   ([`CachingLocator`] outside the worker, [`RegistryBackedLocator`] inside)
//! - [`ExternalQueueCache`] - builds each queue handle at most once
//! - [`QueueRegistry`] - the worker's own handles, read-only
//! - [`QueueConnector`] / [`QueueHandle`] - the broker boundary, backed by
//!   [`InMemoryBroker`] or, with the `redis` feature, `redis::RedisConnector`
//! - [`JobDefinition`] - a job id bound to its queue, schema and options
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use serde::{Deserialize, Serialize};
//! use serde_json::json;
//! use tally_job_queue::{
//!     ConnectionConfig, InMemoryBroker, JobOptions, JobTriggerClient, QueueConfig, SerdeSchema,
//! };
//!
//! #[derive(Deserialize, Serialize)]
//! struct GenerateInvoice {
//!     invoice_id: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tally_job_queue::JobQueueError> {
//!     let config = QueueConfig::new(ConnectionConfig::new("memory://"));
//!     let client = JobTriggerClient::external(Arc::new(InMemoryBroker::new()), config);
//!
//!     let handle = client
//!         .trigger(
//!             &SerdeSchema::<GenerateInvoice>::new(),
//!             "invoices",
//!             "generate-invoice",
//!             &json!({ "invoice_id": "inv_1" }),
//!             JobOptions::new().delay("10m"),
//!         )
//!         .await?;
//!     println!("Enqueued job: {}", handle.id);
//!
//!     client.close().await
//! }
//! ```

mod broker;
mod cache;
mod client;
mod delay;
mod error;
mod job;
mod locator;
mod memory;
mod options;
mod registry;
mod schema;
mod types;

#[cfg(feature = "redis")]
pub mod redis;

pub use broker::{
    ConnectionConfig, FlowProducer, FlowSubmission, JobSubmission, QueueConfig, QueueConnector,
    QueueHandle, SharedFlowProducer, SharedQueue, SubmittedFlow, SubmittedJob, DEFAULT_BROKER_URL,
    DEFAULT_KEY_PREFIX,
};
pub use cache::ExternalQueueCache;
pub use client::JobTriggerClient;
pub use delay::{parse_delay, Delay, DELAY_PATTERN};
pub use error::{BrokerError, ErrorKind, JobQueueError};
pub use job::JobDefinition;
pub use locator::{CachingLocator, Provenance, QueueLocator, RegistryBackedLocator, ResolvedQueue};
pub use memory::{InMemoryBroker, MemoryQueue, StoredJob};
pub use options::{
    BackoffKind, BackoffPolicy, JobOptions, PreparedOptions, QueueDefaults, RepeatPolicy,
    ResolvedJobOptions, Retention, RetentionPolicy, COMPLETED_RETENTION_AGE_SECS,
    FAILED_RETENTION_AGE_SECS, FALLBACK_ATTEMPTS, FALLBACK_PRIORITY,
};
pub use registry::{QueueRegistry, QueueRegistryBuilder};
pub use schema::{AnyPayload, FnSchema, SchemaViolation, SerdeSchema, Validator};
pub use types::{BatchItem, FlowJob, FlowNode, JobHandle};

// Re-export async_trait for implementing QueueConnector and QueueHandle
pub use async_trait::async_trait;
