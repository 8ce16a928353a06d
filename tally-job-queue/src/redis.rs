//! Redis-backed broker.
//!
//! Key layout, all under `<prefix>:<queue>`:
//! - `:id` job id counter
//! - `:<id>` job hash (`name`, `data`, `opts`, `priority`, `delay`, `timestamp`, `parent`)
//! - `:wait` list of ready jobs
//! - `:prioritized` sorted set of ready jobs with a priority above the fallback
//! - `:delayed` sorted set scored by the due timestamp in milliseconds
//! - `:repeat` hash of `<job name>:<pattern>` to the template job id
//! - `:waiting-children` set of flow parents, with `:<id>:dependencies`
//!
//! Every submission is written in one MULTI/EXEC pipeline, so a bulk or
//! flow submission lands entirely or not at all.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::debug;

use crate::broker::{
    ConnectionConfig, FlowProducer, FlowSubmission, JobSubmission, QueueConnector, QueueHandle,
    SharedFlowProducer, SharedQueue, SubmittedFlow, SubmittedJob,
};
use crate::error::BrokerError;
use crate::options::{QueueDefaults, FALLBACK_PRIORITY};

fn broker_error(e: ::redis::RedisError) -> BrokerError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_timeout() || e.is_connection_dropped()
    {
        BrokerError::Unavailable(e.to_string())
    } else {
        BrokerError::Backend(e.to_string())
    }
}

async fn open(connection: &ConnectionConfig) -> Result<ConnectionManager, BrokerError> {
    let client = ::redis::Client::open(connection.url.as_str())
        .map_err(|e| BrokerError::Unavailable(format!("invalid redis url: {e}")))?;
    match tokio::time::timeout(connection.connect_timeout(), ConnectionManager::new(client)).await
    {
        Ok(conn) => conn.map_err(broker_error),
        Err(_) => Err(BrokerError::Unavailable(format!(
            "timed out after {}s connecting to redis",
            connection.connect_timeout_secs
        ))),
    }
}

/// Builds Redis queue handles and flow producers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisConnector;

impl RedisConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl QueueConnector for RedisConnector {
    async fn connect(
        &self,
        name: &str,
        connection: &ConnectionConfig,
        defaults: QueueDefaults,
    ) -> Result<SharedQueue, BrokerError> {
        let conn = open(connection).await?;
        debug!(queue = name, "connected redis queue");
        Ok(Arc::new(RedisQueue {
            keys: QueueKeys::new(&connection.prefix, name),
            name: name.to_owned(),
            defaults,
            conn: RwLock::new(Some(conn)),
        }))
    }

    async fn flow_producer(
        &self,
        connection: &ConnectionConfig,
    ) -> Result<SharedFlowProducer, BrokerError> {
        let conn = open(connection).await?;
        Ok(Arc::new(RedisFlowProducer {
            prefix: connection.prefix.clone(),
            conn: RwLock::new(Some(conn)),
        }))
    }
}

#[derive(Debug, Clone)]
struct QueueKeys {
    base: String,
}

impl QueueKeys {
    fn new(prefix: &str, queue: &str) -> Self {
        Self {
            base: format!("{prefix}:{queue}"),
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{suffix}", self.base)
    }

    fn job(&self, id: u64) -> String {
        format!("{}:{id}", self.base)
    }
}

/// Reserve `count` consecutive ids, returning the first.
async fn reserve_ids(
    conn: &mut ConnectionManager,
    keys: &QueueKeys,
    count: u64,
) -> Result<u64, BrokerError> {
    let last: u64 = conn
        .incr(keys.key("id"), count)
        .await
        .map_err(broker_error)?;
    Ok(last + 1 - count)
}

/// Queue the writes for one job onto an atomic pipeline.
fn stage_job(
    pipe: &mut ::redis::Pipeline,
    keys: &QueueKeys,
    id: u64,
    job: &JobSubmission,
    parent: Option<&str>,
    waits_for_children: bool,
    now_ms: i64,
) -> Result<(), BrokerError> {
    let data = serde_json::to_string(&job.payload)
        .map_err(|e| BrokerError::Rejected(format!("payload is not serializable: {e}")))?;
    let opts = serde_json::to_string(&job.options)
        .map_err(|e| BrokerError::Rejected(format!("options are not serializable: {e}")))?;
    let opts_ref = &job.options;

    let mut fields = vec![
        ("name", job.name.clone()),
        ("data", data),
        ("opts", opts),
        ("priority", opts_ref.priority.to_string()),
        ("delay", opts_ref.delay_ms.to_string()),
        ("timestamp", now_ms.to_string()),
    ];
    if let Some(parent) = parent {
        fields.push(("parent", parent.to_owned()));
    }
    let job_key = keys.job(id);
    pipe.hset_multiple(&job_key, fields.as_slice()).ignore();

    if let Some(repeat) = &opts_ref.repeat {
        pipe.hset(
            keys.key("repeat"),
            format!("{}:{}", job.name, repeat.pattern),
            id,
        )
        .ignore();
    }

    if waits_for_children {
        pipe.sadd(keys.key("waiting-children"), id).ignore();
    } else if opts_ref.delay_ms > 0 {
        let due = now_ms.saturating_add(i64::try_from(opts_ref.delay_ms).unwrap_or(i64::MAX));
        pipe.zadd(keys.key("delayed"), id, due).ignore();
    } else if opts_ref.priority > FALLBACK_PRIORITY {
        pipe.zadd(keys.key("prioritized"), id, opts_ref.priority).ignore();
    } else {
        pipe.lpush(keys.key("wait"), id).ignore();
    }
    Ok(())
}

struct RedisQueue {
    name: String,
    keys: QueueKeys,
    defaults: QueueDefaults,
    /// `None` once closed.
    conn: RwLock<Option<ConnectionManager>>,
}

impl fmt::Debug for RedisQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisQueue")
            .field("name", &self.name)
            .field("keys", &self.keys)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

/// Clone the live connection, or fail if the handle was closed.
async fn live(conn: &RwLock<Option<ConnectionManager>>) -> Result<ConnectionManager, BrokerError> {
    conn.read().await.clone().ok_or(BrokerError::Closed)
}

#[async_trait]
impl QueueHandle for RedisQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn defaults(&self) -> &QueueDefaults {
        &self.defaults
    }

    async fn submit(&self, job: JobSubmission) -> Result<SubmittedJob, BrokerError> {
        let mut acks = self.submit_bulk(vec![job]).await?;
        acks.pop()
            .ok_or_else(|| BrokerError::Backend("redis returned no job id".into()))
    }

    async fn submit_bulk(
        &self,
        jobs: Vec<JobSubmission>,
    ) -> Result<Vec<SubmittedJob>, BrokerError> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = live(&self.conn).await?;
        let first = reserve_ids(&mut conn, &self.keys, jobs.len() as u64).await?;
        let now_ms = chrono::Utc::now().timestamp_millis();

        let mut pipe = ::redis::pipe();
        pipe.atomic();
        let mut acks = Vec::with_capacity(jobs.len());
        for (offset, job) in jobs.iter().enumerate() {
            let id = first + offset as u64;
            stage_job(&mut pipe, &self.keys, id, job, None, false, now_ms)?;
            acks.push(SubmittedJob { id: id.to_string() });
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(broker_error)?;
        Ok(acks)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        // Dropping the manager closes the socket once in-flight commands finish.
        if self.conn.write().await.take().is_some() {
            debug!(queue = %self.name, "closed redis queue");
        }
        Ok(())
    }
}

struct RedisFlowProducer {
    prefix: String,
    conn: RwLock<Option<ConnectionManager>>,
}

impl fmt::Debug for RedisFlowProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisFlowProducer")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl RedisFlowProducer {
    /// Reserve ids for every node, depth first, parent before children.
    async fn reserve(
        &self,
        conn: &mut ConnectionManager,
        flow: &FlowSubmission,
        out: &mut Vec<u64>,
    ) -> Result<(), BrokerError> {
        let mut stack = vec![flow];
        while let Some(node) = stack.pop() {
            let keys = QueueKeys::new(&self.prefix, &node.queue);
            out.push(reserve_ids(conn, &keys, 1).await?);
            stack.extend(node.children.iter().rev());
        }
        Ok(())
    }

    /// Stage `flow` and its subtree, returning the acknowledgment and the
    /// node's job key.
    fn stage(
        &self,
        pipe: &mut ::redis::Pipeline,
        flow: &FlowSubmission,
        ids: &mut std::slice::Iter<'_, u64>,
        parent: Option<&str>,
        now_ms: i64,
    ) -> Result<(SubmittedFlow, String), BrokerError> {
        let id = *ids
            .next()
            .ok_or_else(|| BrokerError::Backend("flow id reservation mismatch".into()))?;
        let keys = QueueKeys::new(&self.prefix, &flow.queue);
        let has_children = !flow.children.is_empty();
        stage_job(pipe, &keys, id, &flow.job, parent, has_children, now_ms)?;

        let job_key = keys.job(id);
        let dependencies = format!("{job_key}:dependencies");
        let mut children = Vec::with_capacity(flow.children.len());
        for child in &flow.children {
            let (ack, child_key) = self.stage(pipe, child, ids, Some(&job_key), now_ms)?;
            pipe.sadd(&dependencies, child_key).ignore();
            children.push(ack);
        }

        let ack = SubmittedFlow {
            queue: flow.queue.clone(),
            id: id.to_string(),
            children,
        };
        Ok((ack, job_key))
    }
}

#[async_trait]
impl FlowProducer for RedisFlowProducer {
    async fn submit_flow(&self, flow: FlowSubmission) -> Result<SubmittedFlow, BrokerError> {
        let mut conn = live(&self.conn).await?;
        let mut ids = Vec::new();
        self.reserve(&mut conn, &flow, &mut ids).await?;

        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut pipe = ::redis::pipe();
        pipe.atomic();
        let (ack, _) = self.stage(&mut pipe, &flow, &mut ids.iter(), None, now_ms)?;
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(broker_error)?;
        Ok(ack)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.conn.write().await.take();
        Ok(())
    }
}
