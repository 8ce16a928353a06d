//! Error types for the job triggering client.

use thiserror::Error;

/// Errors reported by a broker connection, queue handle or flow producer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker is unavailable: {0}")]
    Unavailable(String),

    #[error("broker rejected the request: {0}")]
    Rejected(String),

    #[error("queue handle is closed")]
    Closed,

    #[error("broker error: {0}")]
    Backend(String),
}

/// Coarse classification of [`JobQueueError`], for callers that translate
/// errors into their own boundary representation (HTTP status, exit code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Format,
    Validation,
    InvalidOptions,
    Resolution,
    Submission,
    Close,
}

/// Errors surfaced by [`JobTriggerClient`](crate::JobTriggerClient).
#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("invalid duration {input:?}: expected {expected}")]
    Format {
        input: String,
        expected: &'static str,
    },

    #[error(
        "validation failed for {job}{}: {detail}",
        .index.map(|i| format!(" (item {i})")).unwrap_or_default()
    )]
    Validation {
        job: String,
        index: Option<usize>,
        detail: String,
    },

    #[error("invalid job options: {0}")]
    InvalidOptions(String),

    #[error("failed to resolve queue {queue}")]
    Resolution {
        queue: String,
        #[source]
        source: BrokerError,
    },

    #[error("failed to submit {job} to queue {queue}")]
    Submission {
        queue: String,
        job: String,
        #[source]
        source: BrokerError,
    },

    #[error("failed to close {} queue handle(s)", .failures.len())]
    Close { failures: Vec<(String, BrokerError)> },
}

impl JobQueueError {
    #[inline]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Format { .. } => ErrorKind::Format,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::InvalidOptions(_) => ErrorKind::InvalidOptions,
            Self::Resolution { .. } => ErrorKind::Resolution,
            Self::Submission { .. } => ErrorKind::Submission,
            Self::Close { .. } => ErrorKind::Close,
        }
    }

    /// Index of the failing batch item, for batch validation failures.
    #[inline]
    pub const fn failed_index(&self) -> Option<usize> {
        match self {
            Self::Validation { index, .. } => *index,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn validation_message_names_the_item() {
        let err = JobQueueError::Validation {
            job: "invoice.generate-pdf".into(),
            index: Some(1),
            detail: "missing field `invoice_id`".into(),
        };
        assert_eq!(
            err.to_string(),
            "validation failed for invoice.generate-pdf (item 1): missing field `invoice_id`"
        );
        assert_eq!(err.failed_index(), Some(1));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn submission_keeps_broker_source() {
        let err = JobQueueError::Submission {
            queue: "invoices".into(),
            job: "invoice.generate-pdf".into(),
            source: BrokerError::Rejected("queue is paused".into()),
        };
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "broker rejected the request: queue is paused");
    }
}
