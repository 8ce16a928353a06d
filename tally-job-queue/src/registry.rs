//! Queue registry owned by the worker process.
//!
//! The worker builds its queues once at startup and publishes them here. The
//! triggering client only ever looks handles up; it never adds to the
//! registry and never closes what it finds in it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::broker::{QueueConfig, QueueConnector, SharedQueue};
use crate::error::BrokerError;

/// Read-only map from queue name to a worker-owned handle.
#[derive(Clone, Default)]
pub struct QueueRegistry {
    queues: Arc<HashMap<String, SharedQueue>>,
}

impl fmt::Debug for QueueRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueRegistry")
            .field("queues", &self.names())
            .finish()
    }
}

impl QueueRegistry {
    pub fn builder() -> QueueRegistryBuilder {
        QueueRegistryBuilder::default()
    }

    /// Connect every named queue with the worker's base configuration.
    pub async fn connect_all<I, S>(
        connector: &dyn QueueConnector,
        config: &QueueConfig,
        names: I,
    ) -> Result<Self, BrokerError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = Self::builder();
        for name in names {
            let name = name.as_ref();
            let handle = connector
                .connect(name, &config.connection, config.defaults_for(name))
                .await?;
            builder = builder.register(handle);
        }
        let registry = builder.build();
        info!(queues = ?registry.names(), "worker queues registered");
        Ok(registry)
    }

    #[inline]
    pub fn lookup(&self, name: &str) -> Option<SharedQueue> {
        self.queues.get(name).cloned()
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.queues.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

#[derive(Default)]
pub struct QueueRegistryBuilder {
    queues: HashMap<String, SharedQueue>,
}

impl QueueRegistryBuilder {
    /// Register a handle under its own queue name.
    #[must_use]
    pub fn register(mut self, handle: SharedQueue) -> Self {
        self.queues.insert(handle.name().to_owned(), handle);
        self
    }

    pub fn build(self) -> QueueRegistry {
        QueueRegistry {
            queues: Arc::new(self.queues),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{ConnectionConfig, QueueConfig};
    use crate::memory::InMemoryBroker;
    use crate::options::QueueDefaults;

    #[tokio::test]
    async fn connects_and_looks_up_worker_queues() {
        let broker = InMemoryBroker::new();
        let config = QueueConfig::new(ConnectionConfig::new("memory://")).with_queue(
            "transactions",
            QueueDefaults {
                attempts: Some(5),
                ..QueueDefaults::default()
            },
        );

        let registry = QueueRegistry::connect_all(&broker, &config, ["transactions", "inbox"])
            .await
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["inbox", "transactions"]);
        let tx = registry.lookup("transactions").unwrap();
        assert_eq!(tx.defaults().attempts, Some(5));
        assert!(registry.lookup("invoices").is_none());
        assert_eq!(broker.constructions("transactions").await, 1);
    }

    #[tokio::test]
    async fn connect_all_fails_fast() {
        let broker = InMemoryBroker::new();
        broker.fail_connect("inbox").await;
        let config = QueueConfig::default();
        let err = QueueRegistry::connect_all(&broker, &config, ["inbox"])
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Unavailable(_)));
    }
}
