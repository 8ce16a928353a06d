//! Job trigger client implementation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::broker::{
    FlowSubmission, JobSubmission, QueueConfig, QueueConnector, SharedFlowProducer,
    SubmittedFlow,
};
use crate::delay::Delay;
use crate::error::{BrokerError, JobQueueError};
use crate::locator::{CachingLocator, QueueLocator, RegistryBackedLocator};
use crate::options::{JobOptions, QueueDefaults, RepeatPolicy};
use crate::registry::QueueRegistry;
use crate::schema::{validate_payload, Validator};
use crate::types::{BatchItem, FlowJob, FlowNode, JobHandle};

struct ClientInner {
    locator: Arc<dyn QueueLocator>,
    connector: Arc<dyn QueueConnector>,
    config: Arc<QueueConfig>,
    flows: Mutex<Option<SharedFlowProducer>>,
}

/// Submits jobs to broker queues.
///
/// Construct one per process and share it; clones share the same queue
/// cache. Payloads are validated and options checked before any queue is
/// touched, so a failed call never leaves a partial submission behind.
#[derive(Clone)]
pub struct JobTriggerClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for JobTriggerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobTriggerClient")
            .field("locator", &self.inner.locator)
            .field("connection", &self.inner.config.connection)
            .field("flows", &"<Mutex<Option<SharedFlowProducer>>>")
            .finish()
    }
}

impl JobTriggerClient {
    /// Client for processes that own no queues, such as API handlers.
    pub fn external(connector: Arc<dyn QueueConnector>, config: QueueConfig) -> Self {
        let config = Arc::new(config);
        let locator = CachingLocator::new(connector.clone(), config.clone());
        Self::with_locator(Arc::new(locator), connector, config)
    }

    /// Client running inside the worker, reusing the worker's own queues.
    pub fn in_worker(
        registry: QueueRegistry,
        connector: Arc<dyn QueueConnector>,
        config: QueueConfig,
    ) -> Self {
        let config = Arc::new(config);
        let fallback = CachingLocator::new(connector.clone(), config.clone());
        let locator = RegistryBackedLocator::new(registry, fallback);
        Self::with_locator(Arc::new(locator), connector, config)
    }

    pub fn with_locator(
        locator: Arc<dyn QueueLocator>,
        connector: Arc<dyn QueueConnector>,
        config: Arc<QueueConfig>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                locator,
                connector,
                config,
                flows: Mutex::new(None),
            }),
        }
    }

    #[inline]
    pub fn locator(&self) -> &dyn QueueLocator {
        self.inner.locator.as_ref()
    }

    /// Validate `payload` and enqueue one job.
    pub async fn trigger<T, V>(
        &self,
        schema: &V,
        queue: &str,
        job: &str,
        payload: &Value,
        options: JobOptions,
    ) -> Result<JobHandle, JobQueueError>
    where
        V: Validator<T> + ?Sized,
        T: Serialize,
    {
        let payload = validate_payload(schema, job, None, payload)?;
        let prepared = options.prepare()?;

        let resolved = self.inner.locator.resolve(queue).await?;
        let options = prepared.resolve(resolved.handle.defaults());
        let delay_ms = options.delay_ms;

        let ack = resolved
            .handle
            .submit(JobSubmission {
                name: job.to_owned(),
                payload,
                options,
            })
            .await
            .map_err(|source| submission_error(queue, job, source))?;

        info!(
            queue,
            job,
            job_id = %ack.id,
            delay_ms,
            provenance = %resolved.provenance,
            "job triggered"
        );
        Ok(JobHandle {
            id: ack.id,
            name: job.to_owned(),
        })
    }

    /// Validate every item, then enqueue them all in one bulk operation.
    ///
    /// Handles are returned in input order. If any item fails validation the
    /// error names its index and nothing is enqueued.
    pub async fn batch_trigger<T, V>(
        &self,
        schema: &V,
        queue: &str,
        job: &str,
        items: Vec<BatchItem>,
    ) -> Result<Vec<JobHandle>, JobQueueError>
    where
        V: Validator<T> + ?Sized,
        T: Serialize,
    {
        let mut prepared = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let payload = validate_payload(schema, job, Some(index), &item.payload)?;
            prepared.push((payload, item.options.prepare()?));
        }
        if prepared.is_empty() {
            debug!(queue, job, "empty batch, nothing to trigger");
            return Ok(Vec::new());
        }

        let resolved = self.inner.locator.resolve(queue).await?;
        let defaults = resolved.handle.defaults();
        let submissions: Vec<JobSubmission> = prepared
            .into_iter()
            .map(|(payload, options)| JobSubmission {
                name: job.to_owned(),
                payload,
                options: options.resolve(defaults),
            })
            .collect();

        let count = submissions.len();
        let acks = resolved
            .handle
            .submit_bulk(submissions)
            .await
            .map_err(|source| submission_error(queue, job, source))?;
        if acks.len() != count {
            return Err(submission_error(
                queue,
                job,
                BrokerError::Backend(format!(
                    "broker acknowledged {} of {count} jobs",
                    acks.len()
                )),
            ));
        }

        info!(queue, job, count, provenance = %resolved.provenance, "batch triggered");
        Ok(acks
            .into_iter()
            .map(|ack| JobHandle {
                id: ack.id,
                name: job.to_owned(),
            })
            .collect())
    }

    /// Like [`trigger`](Self::trigger), with the delay set to `delay`.
    pub async fn trigger_delayed<T, V>(
        &self,
        schema: &V,
        queue: &str,
        job: &str,
        payload: &Value,
        delay: impl Into<Delay>,
        options: JobOptions,
    ) -> Result<JobHandle, JobQueueError>
    where
        V: Validator<T> + ?Sized,
        T: Serialize,
    {
        let options = options.delay(delay);
        self.trigger(schema, queue, job, payload, options).await
    }

    /// Enqueue a job the broker repeats on the cron `pattern`.
    pub async fn trigger_recurring<T, V>(
        &self,
        schema: &V,
        queue: &str,
        job: &str,
        payload: &Value,
        pattern: &str,
        options: JobOptions,
    ) -> Result<JobHandle, JobQueueError>
    where
        V: Validator<T> + ?Sized,
        T: Serialize,
    {
        let repeat = RepeatPolicy::cron(pattern)?;
        self.trigger(schema, queue, job, payload, options.repeat(repeat))
            .await
    }

    /// Enqueue a job tree in one broker operation. Parents run after all of
    /// their children have finished.
    pub async fn trigger_flow(&self, flow: FlowJob) -> Result<FlowNode, JobQueueError> {
        let mut queues = Vec::new();
        check_flow(&flow, &mut queues)?;

        let mut defaults = HashMap::with_capacity(queues.len());
        for queue in queues {
            let resolved = self.inner.locator.resolve(&queue).await?;
            defaults.insert(queue, resolved.handle.defaults().clone());
        }
        let submission = build_flow(&flow, &defaults)?;

        let producer = self.flow_producer(&flow.queue).await?;
        let ack = producer
            .submit_flow(submission)
            .await
            .map_err(|source| submission_error(&flow.queue, &flow.name, source))?;
        let node = flow_node(&flow, ack)?;

        info!(
            queue = %flow.queue,
            job = %flow.name,
            job_id = %node.job.id,
            jobs = flow.job_count(),
            "flow triggered"
        );
        Ok(node)
    }

    /// Close every handle this client created. Handles owned by the worker
    /// registry are left open. Safe to call repeatedly.
    pub async fn close(&self) -> Result<(), JobQueueError> {
        let mut failures = Vec::new();
        match self.inner.locator.close().await {
            Ok(()) => {}
            Err(JobQueueError::Close { failures: f }) => failures.extend(f),
            Err(other) => failures.push((
                "queue-cache".to_owned(),
                BrokerError::Backend(other.to_string()),
            )),
        }

        let producer = self.inner.flows.lock().await.take();
        if let Some(producer) = producer {
            match producer.close().await {
                Ok(()) => info!("closed flow producer"),
                Err(error) => {
                    warn!(%error, "failed to close flow producer");
                    failures.push(("flow-producer".to_owned(), error));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(JobQueueError::Close { failures })
        }
    }

    /// The client's flow producer, created on first use. The lock is held
    /// across construction so at most one producer is ever built.
    async fn flow_producer(&self, queue: &str) -> Result<SharedFlowProducer, JobQueueError> {
        let mut slot = self.inner.flows.lock().await;
        if let Some(producer) = slot.as_ref() {
            return Ok(producer.clone());
        }

        debug!("constructing flow producer");
        let producer = self
            .inner
            .connector
            .flow_producer(&self.inner.config.connection)
            .await
            .map_err(|source| JobQueueError::Resolution {
                queue: queue.to_owned(),
                source,
            })?;
        *slot = Some(producer.clone());
        Ok(producer)
    }
}

#[inline]
fn submission_error(queue: &str, job: &str, source: BrokerError) -> JobQueueError {
    JobQueueError::Submission {
        queue: queue.to_owned(),
        job: job.to_owned(),
        source,
    }
}

/// Check every node's options and collect the distinct queues of the tree.
fn check_flow(flow: &FlowJob, queues: &mut Vec<String>) -> Result<(), JobQueueError> {
    flow.options.prepare()?;
    if !queues.contains(&flow.queue) {
        queues.push(flow.queue.clone());
    }
    flow.children
        .iter()
        .try_for_each(|child| check_flow(child, queues))
}

fn build_flow(
    flow: &FlowJob,
    defaults: &HashMap<String, QueueDefaults>,
) -> Result<FlowSubmission, JobQueueError> {
    let queue_defaults = defaults.get(&flow.queue).cloned().unwrap_or_default();
    let options = flow.options.prepare()?.resolve(&queue_defaults);
    let children = flow
        .children
        .iter()
        .map(|child| build_flow(child, defaults))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(FlowSubmission {
        queue: flow.queue.clone(),
        job: JobSubmission {
            name: flow.name.clone(),
            payload: flow.payload.clone(),
            options,
        },
        children,
    })
}

fn flow_node(flow: &FlowJob, ack: SubmittedFlow) -> Result<FlowNode, JobQueueError> {
    if ack.children.len() != flow.children.len() {
        return Err(submission_error(
            &flow.queue,
            &flow.name,
            BrokerError::Backend(format!(
                "broker acknowledged {} of {} child jobs",
                ack.children.len(),
                flow.children.len()
            )),
        ));
    }

    let children = flow
        .children
        .iter()
        .zip(ack.children)
        .map(|(child, ack)| flow_node(child, ack))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(FlowNode {
        queue: ack.queue,
        job: JobHandle {
            id: ack.id,
            name: flow.name.clone(),
        },
        children,
    })
}
