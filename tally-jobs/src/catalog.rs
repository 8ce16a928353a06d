//! Lookup of job definitions by id, for callers that only have raw JSON.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tally_job_queue::{BatchItem, JobDefinition, JobHandle, JobOptions, JobQueueError, JobTriggerClient};
use tracing::debug;

use crate::error::JobsError;
use crate::{documents, inbox, invoices, notifications};

/// A job definition with its payload type erased.
#[async_trait]
pub trait DynJob: Send + Sync {
    fn id(&self) -> &str;
    fn queue(&self) -> &str;

    async fn trigger(
        &self,
        client: &JobTriggerClient,
        payload: &Value,
        options: JobOptions,
    ) -> Result<JobHandle, JobQueueError>;

    async fn batch_trigger(
        &self,
        client: &JobTriggerClient,
        items: Vec<BatchItem>,
    ) -> Result<Vec<JobHandle>, JobQueueError>;
}

#[async_trait]
impl<T> DynJob for JobDefinition<T>
where
    T: Serialize + Send + Sync + 'static,
{
    fn id(&self) -> &str {
        JobDefinition::id(self)
    }

    fn queue(&self) -> &str {
        JobDefinition::queue(self)
    }

    async fn trigger(
        &self,
        client: &JobTriggerClient,
        payload: &Value,
        options: JobOptions,
    ) -> Result<JobHandle, JobQueueError> {
        JobDefinition::trigger(self, client, payload, options).await
    }

    async fn batch_trigger(
        &self,
        client: &JobTriggerClient,
        items: Vec<BatchItem>,
    ) -> Result<Vec<JobHandle>, JobQueueError> {
        JobDefinition::batch_trigger(self, client, items).await
    }
}

/// Every job this crate defines, keyed by id.
pub struct JobCatalog {
    jobs: BTreeMap<&'static str, &'static dyn DynJob>,
}

impl JobCatalog {
    /// The catalog of all Tally jobs.
    pub fn standard() -> Self {
        let all: [&'static dyn DynJob; 7] = [
            &*invoices::GENERATE_INVOICE,
            &*invoices::SCHEDULE_INVOICE,
            &*invoices::SEND_INVOICE_REMINDER,
            &*documents::PROCESS_DOCUMENT,
            &*inbox::PROCESS_ATTACHMENT,
            &*inbox::SYNC_INBOX_ACCOUNT,
            &*notifications::NOTIFICATION,
        ];
        let jobs = all
            .into_iter()
            .map(|job| (job.id(), job))
            .collect();
        Self { jobs }
    }

    pub fn get(&self, id: &str) -> Result<&'static dyn DynJob, JobsError> {
        self.jobs
            .get(id)
            .copied()
            .ok_or_else(|| JobsError::UnknownJob(id.to_owned()))
    }

    /// Jobs in id order.
    pub fn iter(&self) -> impl Iterator<Item = &'static dyn DynJob> + '_ {
        self.jobs.values().copied()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub async fn trigger(
        &self,
        client: &JobTriggerClient,
        id: &str,
        payload: &Value,
        options: JobOptions,
    ) -> Result<JobHandle, JobsError> {
        let job = self.get(id)?;
        debug!(job = id, queue = job.queue(), "triggering catalog job");
        Ok(job.trigger(client, payload, options).await?)
    }

    pub async fn batch_trigger(
        &self,
        client: &JobTriggerClient,
        id: &str,
        items: Vec<BatchItem>,
    ) -> Result<Vec<JobHandle>, JobsError> {
        let job = self.get(id)?;
        debug!(job = id, queue = job.queue(), count = items.len(), "triggering catalog batch");
        Ok(job.batch_trigger(client, items).await?)
    }
}

impl Default for JobCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
