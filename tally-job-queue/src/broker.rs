//! The broker boundary: queue handles, the connector that builds them, and
//! the flow producer used for parent/child job trees.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BrokerError;
use crate::options::{QueueDefaults, ResolvedJobOptions};

pub const DEFAULT_BROKER_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_KEY_PREFIX: &str = "tally";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Connection settings shared by every handle built for this process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub url: String,
    pub prefix: String,
    pub connect_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    #[inline]
    fn default() -> Self {
        Self {
            url: DEFAULT_BROKER_URL.to_owned(),
            prefix: DEFAULT_KEY_PREFIX.to_owned(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl ConnectionConfig {
    #[inline]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    #[inline]
    pub const fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Base configuration every queue is built from: the connection plus job
/// defaults, optionally overridden per queue name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueConfig {
    pub connection: ConnectionConfig,
    pub defaults: QueueDefaults,
    pub overrides: HashMap<String, QueueDefaults>,
}

impl QueueConfig {
    #[inline]
    pub fn new(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_defaults(mut self, defaults: QueueDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    #[must_use]
    pub fn with_queue(mut self, name: impl Into<String>, defaults: QueueDefaults) -> Self {
        self.overrides.insert(name.into(), defaults);
        self
    }

    /// Defaults a queue named `name` is created with.
    pub fn defaults_for(&self, name: &str) -> QueueDefaults {
        match self.overrides.get(name) {
            Some(queue) => queue.or(&self.defaults),
            None => self.defaults.clone(),
        }
    }
}

/// One job as handed to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSubmission {
    pub name: String,
    pub payload: Value,
    pub options: ResolvedJobOptions,
}

/// Broker acknowledgment for one submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedJob {
    pub id: String,
}

/// A handle bound to one named queue on the broker.
#[async_trait]
pub trait QueueHandle: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Job defaults this queue was created with.
    fn defaults(&self) -> &QueueDefaults;

    async fn submit(&self, job: JobSubmission) -> Result<SubmittedJob, BrokerError>;

    /// Submit several jobs in one broker operation. Acknowledgments are in
    /// input order.
    async fn submit_bulk(&self, jobs: Vec<JobSubmission>)
        -> Result<Vec<SubmittedJob>, BrokerError>;

    /// Release the broker connection. Later submissions through any clone of
    /// this handle fail with [`BrokerError::Closed`]. Closing twice is a no-op.
    async fn close(&self) -> Result<(), BrokerError>;
}

pub type SharedQueue = Arc<dyn QueueHandle>;

/// A node of a job tree; a parent runs after all of its children finish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSubmission {
    pub queue: String,
    pub job: JobSubmission,
    pub children: Vec<FlowSubmission>,
}

/// Broker acknowledgment for a job tree, mirroring the submitted shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedFlow {
    pub queue: String,
    pub id: String,
    pub children: Vec<SubmittedFlow>,
}

/// Submits job trees spanning any number of queues.
#[async_trait]
pub trait FlowProducer: Send + Sync + fmt::Debug {
    async fn submit_flow(&self, flow: FlowSubmission) -> Result<SubmittedFlow, BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

pub type SharedFlowProducer = Arc<dyn FlowProducer>;

/// Builds broker handles.
#[async_trait]
pub trait QueueConnector: Send + Sync {
    async fn connect(
        &self,
        name: &str,
        connection: &ConnectionConfig,
        defaults: QueueDefaults,
    ) -> Result<SharedQueue, BrokerError>;

    async fn flow_producer(
        &self,
        connection: &ConnectionConfig,
    ) -> Result<SharedFlowProducer, BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::BackoffPolicy;

    #[test]
    fn per_queue_defaults_layer_over_base() {
        let config = QueueConfig::default()
            .with_defaults(QueueDefaults {
                attempts: Some(3),
                backoff: Some(BackoffPolicy::exponential(1000)),
                ..QueueDefaults::default()
            })
            .with_queue(
                "transactions",
                QueueDefaults {
                    attempts: Some(5),
                    ..QueueDefaults::default()
                },
            );

        let tx = config.defaults_for("transactions");
        assert_eq!(tx.attempts, Some(5));
        assert_eq!(tx.backoff, Some(BackoffPolicy::exponential(1000)));

        let other = config.defaults_for("inbox");
        assert_eq!(other.attempts, Some(3));
    }

    #[test]
    fn connection_defaults() {
        let c = ConnectionConfig::default();
        assert_eq!(c.url, DEFAULT_BROKER_URL);
        assert_eq!(c.prefix, "tally");
        assert_eq!(c.connect_timeout().as_secs(), 10);
    }
}
