//! Lazily created queue handles owned by the triggering client.
//!
//! Used for queues the current process does not own through a
//! [`QueueRegistry`](crate::QueueRegistry), typically API handlers that only
//! enqueue. Each name gets a slot that is reserved under the map lock before
//! the handle is built, so concurrent callers for the same unseen name share
//! one construction instead of opening duplicate broker connections.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::broker::{QueueConfig, QueueConnector, SharedQueue};
use crate::error::{BrokerError, JobQueueError};

type Slot = Arc<OnceCell<SharedQueue>>;

pub struct ExternalQueueCache {
    connector: Arc<dyn QueueConnector>,
    config: Arc<QueueConfig>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl fmt::Debug for ExternalQueueCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalQueueCache")
            .field("config", &self.config)
            .field("slots", &"<Mutex<HashMap<String, Slot>>>")
            .finish()
    }
}

impl ExternalQueueCache {
    pub fn new(connector: Arc<dyn QueueConnector>, config: Arc<QueueConfig>) -> Self {
        Self {
            connector,
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached handle for `name`, building it on first use.
    ///
    /// A failed construction drops the slot, so the next caller retries. A
    /// handle that finishes building after [`close_all`](Self::close_all)
    /// detached its slot is closed here and reported as
    /// [`BrokerError::Closed`].
    pub async fn get_or_create(&self, name: &str) -> Result<SharedQueue, BrokerError> {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.entry(name.to_owned()).or_default().clone()
        };

        let built = slot
            .get_or_try_init(|| async {
                debug!(queue = name, "constructing external queue handle");
                self.connector
                    .connect(name, &self.config.connection, self.config.defaults_for(name))
                    .await
            })
            .await
            .cloned();

        let mut slots = self.slots.lock().await;
        let current = slots.get(name).is_some_and(|s| Arc::ptr_eq(s, &slot));
        match built {
            Ok(handle) if current => Ok(handle),
            Ok(handle) => {
                drop(slots);
                debug!(queue = name, "queue closed while its handle was being built");
                if let Err(error) = handle.close().await {
                    warn!(queue = name, %error, "failed to close detached queue handle");
                }
                Err(BrokerError::Closed)
            }
            Err(error) => {
                if current && !slot.initialized() {
                    slots.remove(name);
                }
                Err(error)
            }
        }
    }

    /// Whether a constructed handle for `name` is cached.
    pub async fn contains(&self, name: &str) -> bool {
        let slots = self.slots.lock().await;
        slots.get(name).is_some_and(|slot| slot.initialized())
    }

    /// Number of constructed handles currently cached.
    pub async fn len(&self) -> usize {
        let slots = self.slots.lock().await;
        slots.values().filter(|slot| slot.initialized()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Close and forget every cached handle.
    ///
    /// Every handle is attempted even if an earlier one fails; failures are
    /// reported together. Calling this on an empty cache is a no-op.
    pub async fn close_all(&self) -> Result<usize, JobQueueError> {
        let drained: Vec<(String, Slot)> = {
            let mut slots = self.slots.lock().await;
            slots.drain().collect()
        };

        let mut closed = 0usize;
        let mut failures = Vec::new();
        for (name, slot) in drained {
            let Some(handle) = slot.get() else {
                continue;
            };
            match handle.close().await {
                Ok(()) => {
                    closed += 1;
                    info!(queue = %name, "closed external queue");
                }
                Err(error) => {
                    warn!(queue = %name, %error, "failed to close external queue");
                    failures.push((name, error));
                }
            }
        }

        if failures.is_empty() {
            Ok(closed)
        } else {
            Err(JobQueueError::Close { failures })
        }
    }
}
