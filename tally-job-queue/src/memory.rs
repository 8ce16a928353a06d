//! In-memory broker.
//!
//! Keeps submitted jobs in process memory. It backs `memory://` broker URLs
//! for local development and is the broker used throughout the tests: it
//! counts handle constructions and closes, and can be told to fail
//! construction, submission or close for specific queues.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::broker::{
    ConnectionConfig, FlowProducer, FlowSubmission, JobSubmission, QueueConnector, QueueHandle,
    SharedFlowProducer, SharedQueue, SubmittedFlow, SubmittedJob,
};
use crate::error::BrokerError;
use crate::options::{QueueDefaults, ResolvedJobOptions};

/// Maximum number of jobs to keep in memory.
const MAX_STORED_JOBS: usize = 10_000;

/// A job as recorded by the in-memory broker.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredJob {
    pub id: String,
    pub queue: String,
    pub name: String,
    pub payload: Value,
    pub options: ResolvedJobOptions,
    /// `queue:id` of the parent job for flow children.
    pub parent: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct BrokerState {
    /// Job ids, oldest first.
    order: VecDeque<String>,
    jobs: HashMap<String, StoredJob>,
    constructions: HashMap<String, usize>,
    closes: HashMap<String, usize>,
    flow_producers: usize,
    unreachable: HashSet<String>,
    rejecting: HashSet<String>,
    failing_close: HashSet<String>,
    connect_delay: Option<Duration>,
}

impl BrokerState {
    fn insert(&mut self, job: StoredJob) {
        let id = job.id.clone();
        self.jobs.insert(id.clone(), job);
        self.order.push_back(id);

        while self.order.len() > MAX_STORED_JOBS {
            if let Some(old_id) = self.order.pop_front() {
                self.jobs.remove(&old_id);
            }
        }
    }

    fn check_accepts(&self, queue: &str) -> Result<(), BrokerError> {
        if self.rejecting.contains(queue) {
            return Err(BrokerError::Rejected(format!(
                "queue {queue} is not accepting jobs"
            )));
        }
        Ok(())
    }

    fn store(&mut self, queue: &str, job: JobSubmission, parent: Option<String>) -> String {
        let id = Uuid::new_v4().to_string();
        self.insert(StoredJob {
            id: id.clone(),
            queue: queue.to_owned(),
            name: job.name,
            payload: job.payload,
            options: job.options,
            parent,
            enqueued_at: Utc::now(),
        });
        id
    }

    fn check_flow(&self, flow: &FlowSubmission) -> Result<(), BrokerError> {
        self.check_accepts(&flow.queue)?;
        flow.children.iter().try_for_each(|c| self.check_flow(c))
    }

    fn store_flow(&mut self, flow: FlowSubmission, parent: Option<String>) -> SubmittedFlow {
        let FlowSubmission {
            queue,
            job,
            children,
        } = flow;
        let id = self.store(&queue, job, parent);
        let key = format!("{queue}:{id}");
        let children = children
            .into_iter()
            .map(|child| self.store_flow(child, Some(key.clone())))
            .collect();
        SubmittedFlow {
            queue,
            id,
            children,
        }
    }
}

/// Process-local broker. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<RwLock<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every handle construction, widening the window in which
    /// concurrent callers can race on an unseen queue name.
    pub async fn set_connect_delay(&self, delay: Duration) {
        self.state.write().await.connect_delay = Some(delay);
    }

    /// Make handle construction for `queue` fail as unreachable.
    pub async fn fail_connect(&self, queue: impl Into<String>) {
        self.state.write().await.unreachable.insert(queue.into());
    }

    /// Make submissions to `queue` fail as rejected.
    pub async fn reject_submissions(&self, queue: impl Into<String>) {
        self.state.write().await.rejecting.insert(queue.into());
    }

    /// Make closing handles for `queue` fail.
    pub async fn fail_close(&self, queue: impl Into<String>) {
        self.state.write().await.failing_close.insert(queue.into());
    }

    /// Clear every injected failure.
    pub async fn heal(&self) {
        let mut state = self.state.write().await;
        state.unreachable.clear();
        state.rejecting.clear();
        state.failing_close.clear();
    }

    /// Number of handles constructed for `queue`.
    pub async fn constructions(&self, queue: &str) -> usize {
        let state = self.state.read().await;
        state.constructions.get(queue).copied().unwrap_or(0)
    }

    /// Number of handles for `queue` that have been closed.
    pub async fn closes(&self, queue: &str) -> usize {
        let state = self.state.read().await;
        state.closes.get(queue).copied().unwrap_or(0)
    }

    pub async fn flow_producers(&self) -> usize {
        self.state.read().await.flow_producers
    }

    /// Jobs submitted to `queue`, oldest first.
    pub async fn jobs(&self, queue: &str) -> Vec<StoredJob> {
        let state = self.state.read().await;
        state
            .order
            .iter()
            .filter_map(|id| state.jobs.get(id))
            .filter(|job| job.queue == queue)
            .cloned()
            .collect()
    }

    pub async fn job(&self, id: &str) -> Option<StoredJob> {
        self.state.read().await.jobs.get(id).cloned()
    }

    /// Total jobs held across all queues.
    pub async fn job_count(&self) -> usize {
        self.state.read().await.jobs.len()
    }
}

#[async_trait]
impl QueueConnector for InMemoryBroker {
    async fn connect(
        &self,
        name: &str,
        _connection: &ConnectionConfig,
        defaults: QueueDefaults,
    ) -> Result<SharedQueue, BrokerError> {
        let delay = self.state.read().await.connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().await;
        if state.unreachable.contains(name) {
            return Err(BrokerError::Unavailable(format!(
                "cannot reach broker for queue {name}"
            )));
        }
        *state.constructions.entry(name.to_owned()).or_default() += 1;

        Ok(Arc::new(MemoryQueue {
            name: name.to_owned(),
            defaults,
            broker: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn flow_producer(
        &self,
        _connection: &ConnectionConfig,
    ) -> Result<SharedFlowProducer, BrokerError> {
        self.state.write().await.flow_producers += 1;
        Ok(Arc::new(MemoryFlowProducer {
            broker: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Queue handle of the in-memory broker.
#[derive(Debug)]
pub struct MemoryQueue {
    name: String,
    defaults: QueueDefaults,
    broker: InMemoryBroker,
    closed: AtomicBool,
}

impl MemoryQueue {
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.is_closed() {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl QueueHandle for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn defaults(&self) -> &QueueDefaults {
        &self.defaults
    }

    async fn submit(&self, job: JobSubmission) -> Result<SubmittedJob, BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.write().await;
        state.check_accepts(&self.name)?;
        let id = state.store(&self.name, job, None);
        Ok(SubmittedJob { id })
    }

    async fn submit_bulk(
        &self,
        jobs: Vec<JobSubmission>,
    ) -> Result<Vec<SubmittedJob>, BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.state.write().await;
        state.check_accepts(&self.name)?;
        Ok(jobs
            .into_iter()
            .map(|job| SubmittedJob {
                id: state.store(&self.name, job, None),
            })
            .collect())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Ok(());
        }
        let mut state = self.broker.state.write().await;
        if state.failing_close.contains(&self.name) {
            return Err(BrokerError::Backend(format!(
                "connection for queue {} did not shut down cleanly",
                self.name
            )));
        }
        *state.closes.entry(self.name.clone()).or_default() += 1;
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryFlowProducer {
    broker: InMemoryBroker,
    closed: AtomicBool,
}

#[async_trait]
impl FlowProducer for MemoryFlowProducer {
    async fn submit_flow(&self, flow: FlowSubmission) -> Result<SubmittedFlow, BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        let mut state = self.broker.state.write().await;
        state.check_flow(&flow)?;
        Ok(state.store_flow(flow, None))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
