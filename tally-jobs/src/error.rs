//! Errors of the job catalog.

use tally_job_queue::JobQueueError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobsError {
    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error("scheduled time {0} is in the past")]
    ScheduleInPast(String),

    #[error(transparent)]
    Queue(#[from] JobQueueError),
}
