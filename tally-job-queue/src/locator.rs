//! Queue resolution strategies.
//!
//! [`CachingLocator`] serves processes that do not own any queues: every
//! name goes through the [`ExternalQueueCache`]. [`RegistryBackedLocator`]
//! serves the worker: names found in the [`QueueRegistry`] resolve to the
//! worker's own handles, anything else falls back to a caching locator.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::broker::{QueueConfig, QueueConnector, SharedQueue};
use crate::cache::ExternalQueueCache;
use crate::error::JobQueueError;
use crate::registry::QueueRegistry;

/// Who owns the lifetime of a resolved handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    /// Owned by the worker process; never closed by the client.
    Registry,
    /// Owned by the client's external queue cache.
    Cache,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Registry => "registry",
            Self::Cache => "cache",
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedQueue {
    pub handle: SharedQueue,
    pub provenance: Provenance,
}

/// Finds the queue handle to submit to.
#[async_trait]
pub trait QueueLocator: Send + Sync + fmt::Debug {
    async fn resolve(&self, name: &str) -> Result<ResolvedQueue, JobQueueError>;

    /// Release every handle this locator owns.
    async fn close(&self) -> Result<(), JobQueueError>;
}

/// Resolves every name through an [`ExternalQueueCache`].
#[derive(Debug)]
pub struct CachingLocator {
    cache: ExternalQueueCache,
}

impl CachingLocator {
    pub fn new(connector: Arc<dyn QueueConnector>, config: Arc<QueueConfig>) -> Self {
        Self {
            cache: ExternalQueueCache::new(connector, config),
        }
    }

    #[inline]
    pub fn cache(&self) -> &ExternalQueueCache {
        &self.cache
    }
}

#[async_trait]
impl QueueLocator for CachingLocator {
    async fn resolve(&self, name: &str) -> Result<ResolvedQueue, JobQueueError> {
        let handle = self
            .cache
            .get_or_create(name)
            .await
            .map_err(|source| JobQueueError::Resolution {
                queue: name.to_owned(),
                source,
            })?;
        Ok(ResolvedQueue {
            handle,
            provenance: Provenance::Cache,
        })
    }

    async fn close(&self) -> Result<(), JobQueueError> {
        self.cache.close_all().await.map(|_| ())
    }
}

/// Prefers worker-owned handles, falling back to a [`CachingLocator`].
#[derive(Debug)]
pub struct RegistryBackedLocator {
    registry: QueueRegistry,
    fallback: CachingLocator,
}

impl RegistryBackedLocator {
    pub fn new(registry: QueueRegistry, fallback: CachingLocator) -> Self {
        Self { registry, fallback }
    }

    #[inline]
    pub fn registry(&self) -> &QueueRegistry {
        &self.registry
    }

    #[inline]
    pub fn fallback(&self) -> &CachingLocator {
        &self.fallback
    }
}

#[async_trait]
impl QueueLocator for RegistryBackedLocator {
    async fn resolve(&self, name: &str) -> Result<ResolvedQueue, JobQueueError> {
        if let Some(handle) = self.registry.lookup(name) {
            trace!(queue = name, "resolved worker-owned queue");
            return Ok(ResolvedQueue {
                handle,
                provenance: Provenance::Registry,
            });
        }
        self.fallback.resolve(name).await
    }

    // Registry handles belong to the worker; only the fallback cache is closed.
    async fn close(&self) -> Result<(), JobQueueError> {
        self.fallback.close().await
    }
}
