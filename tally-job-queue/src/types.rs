//! Request and result types of the trigger client.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::JobQueueError;
use crate::options::JobOptions;
use crate::schema::{validate_payload, Validator};

/// Result returned after a job has been enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: String,
    pub name: String,
}

/// One entry of a batch trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub payload: Value,
    #[serde(default)]
    pub options: JobOptions,
}

impl BatchItem {
    #[inline]
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            options: JobOptions::default(),
        }
    }

    #[inline]
    pub fn with_options(payload: Value, options: JobOptions) -> Self {
        Self { payload, options }
    }
}

/// A node of a job tree. The payload is validated when the node is built.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowJob {
    pub(crate) queue: String,
    pub(crate) name: String,
    pub(crate) payload: Value,
    pub(crate) options: JobOptions,
    pub(crate) children: Vec<FlowJob>,
}

impl FlowJob {
    pub fn new<T, V>(
        schema: &V,
        queue: impl Into<String>,
        name: impl Into<String>,
        payload: &Value,
        options: JobOptions,
    ) -> Result<Self, JobQueueError>
    where
        V: Validator<T> + ?Sized,
        T: Serialize,
    {
        let name = name.into();
        let payload = validate_payload(schema, &name, None, payload)?;
        Ok(Self {
            queue: queue.into(),
            name,
            payload,
            options,
            children: Vec::new(),
        })
    }

    /// Add a job that must finish before this one runs.
    #[must_use]
    pub fn child(mut self, child: FlowJob) -> Self {
        self.children.push(child);
        self
    }

    #[must_use]
    pub fn children(mut self, children: impl IntoIterator<Item = FlowJob>) -> Self {
        self.children.extend(children);
        self
    }

    #[inline]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of jobs in this tree, this node included.
    pub fn job_count(&self) -> usize {
        1 + self.children.iter().map(FlowJob::job_count).sum::<usize>()
    }
}

/// Handles of a submitted job tree, in the shape it was submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowNode {
    pub queue: String,
    pub job: JobHandle,
    pub children: Vec<FlowNode>,
}
