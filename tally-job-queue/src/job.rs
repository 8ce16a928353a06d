//! Typed job definitions.
//!
//! A [`JobDefinition`] binds a job id to its queue, payload schema and
//! job-level options, so call sites trigger by value instead of repeating
//! the queue name and schema. Job-level options fill whatever the per-call
//! options leave unset; the merged result then resolves against the queue
//! defaults as usual.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::client::JobTriggerClient;
use crate::delay::Delay;
use crate::error::JobQueueError;
use crate::options::JobOptions;
use crate::schema::Validator;
use crate::types::{BatchItem, FlowJob, JobHandle};

pub struct JobDefinition<T> {
    id: String,
    queue: String,
    schema: Arc<dyn Validator<T>>,
    options: JobOptions,
}

impl<T> Clone for JobDefinition<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            queue: self.queue.clone(),
            schema: self.schema.clone(),
            options: self.options.clone(),
        }
    }
}

impl<T> fmt::Debug for JobDefinition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDefinition")
            .field("id", &self.id)
            .field("queue", &self.queue)
            .field("options", &self.options)
            .finish()
    }
}

impl<T: Serialize + 'static> JobDefinition<T> {
    pub fn new(
        id: impl Into<String>,
        queue: impl Into<String>,
        schema: impl Validator<T> + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            queue: queue.into(),
            schema: Arc::new(schema),
            options: JobOptions::default(),
        }
    }

    /// Set the job-level options.
    #[must_use]
    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    #[inline]
    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    #[inline]
    pub fn schema(&self) -> &dyn Validator<T> {
        self.schema.as_ref()
    }

    pub async fn trigger(
        &self,
        client: &JobTriggerClient,
        payload: &Value,
        options: JobOptions,
    ) -> Result<JobHandle, JobQueueError> {
        client
            .trigger(
                self.schema.as_ref(),
                &self.queue,
                &self.id,
                payload,
                options.or(&self.options),
            )
            .await
    }

    /// Serialize `payload` and trigger it with the job-level options.
    pub async fn enqueue(
        &self,
        client: &JobTriggerClient,
        payload: &T,
    ) -> Result<JobHandle, JobQueueError> {
        let value = serde_json::to_value(payload).map_err(|e| JobQueueError::Validation {
            job: self.id.clone(),
            index: None,
            detail: e.to_string(),
        })?;
        self.trigger(client, &value, JobOptions::default()).await
    }

    pub async fn batch_trigger(
        &self,
        client: &JobTriggerClient,
        items: Vec<BatchItem>,
    ) -> Result<Vec<JobHandle>, JobQueueError> {
        let items = items
            .into_iter()
            .map(|item| BatchItem {
                payload: item.payload,
                options: item.options.or(&self.options),
            })
            .collect();
        client
            .batch_trigger(self.schema.as_ref(), &self.queue, &self.id, items)
            .await
    }

    pub async fn trigger_delayed(
        &self,
        client: &JobTriggerClient,
        payload: &Value,
        delay: impl Into<Delay>,
        options: JobOptions,
    ) -> Result<JobHandle, JobQueueError> {
        self.trigger(client, payload, options.delay(delay)).await
    }

    pub async fn trigger_recurring(
        &self,
        client: &JobTriggerClient,
        payload: &Value,
        pattern: &str,
        options: JobOptions,
    ) -> Result<JobHandle, JobQueueError> {
        client
            .trigger_recurring(
                self.schema.as_ref(),
                &self.queue,
                &self.id,
                payload,
                pattern,
                options.or(&self.options),
            )
            .await
    }

    /// Validate `payload` now and return a flow node for this job.
    pub fn flow(&self, payload: &Value, options: JobOptions) -> Result<FlowJob, JobQueueError> {
        FlowJob::new(
            self.schema.as_ref(),
            &self.queue,
            &self.id,
            payload,
            options.or(&self.options),
        )
    }
}
