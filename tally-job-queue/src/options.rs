//! Job options and their resolution against queue defaults.
//!
//! Every submitted job carries a fully resolved [`ResolvedJobOptions`]. Each
//! field is taken from the per-call [`JobOptions`] if set, else from the
//! queue's [`QueueDefaults`], else from a fixed fallback
//! ([`FALLBACK_PRIORITY`], [`FALLBACK_ATTEMPTS`], keep-all retention, no
//! delay).

use serde::{Deserialize, Serialize};

use crate::delay::Delay;
use crate::error::JobQueueError;

pub const FALLBACK_PRIORITY: u32 = 1;
pub const FALLBACK_ATTEMPTS: u32 = 3;

/// Maximum age for completed-job records when only a count is configured.
pub const COMPLETED_RETENTION_AGE_SECS: u64 = 24 * 3600;
/// Maximum age for failed-job records when only a count is configured.
pub const FAILED_RETENTION_AGE_SECS: u64 = 7 * 24 * 3600;

/// How many finished job records the broker keeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum RetentionPolicy {
    /// Queue default: the broker keeps everything.
    #[default]
    KeepAll,
    Limit { count: u64, max_age_secs: u64 },
}

impl RetentionPolicy {
    /// Keep the last `count` completed jobs for at most a day.
    #[inline]
    pub const fn completed(count: u64) -> Self {
        Self::Limit {
            count,
            max_age_secs: COMPLETED_RETENTION_AGE_SECS,
        }
    }

    /// Keep the last `count` failed jobs for at most a week.
    #[inline]
    pub const fn failed(count: u64) -> Self {
        Self::Limit {
            count,
            max_age_secs: FAILED_RETENTION_AGE_SECS,
        }
    }
}

/// Retention for both terminal states of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retention {
    pub complete: RetentionPolicy,
    pub failed: RetentionPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// Retry spacing applied by the broker between execution attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub kind: BackoffKind,
    pub delay_ms: u64,
}

impl BackoffPolicy {
    #[inline]
    pub const fn fixed(delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            delay_ms,
        }
    }

    #[inline]
    pub const fn exponential(delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            delay_ms,
        }
    }
}

/// Recurrence handed to the broker, as a cron pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepeatPolicy {
    pub pattern: String,
}

impl RepeatPolicy {
    /// Build a repeat policy, checking the pattern has 5 or 6 fields.
    pub fn cron(pattern: impl Into<String>) -> Result<Self, JobQueueError> {
        let pattern = pattern.into();
        let fields = pattern.split_whitespace().count();
        if !(5..=6).contains(&fields) {
            return Err(JobQueueError::InvalidOptions(format!(
                "repeat pattern {pattern:?} must have 5 or 6 fields, found {fields}"
            )));
        }
        Ok(Self { pattern })
    }
}

/// Job defaults a queue was created with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueDefaults {
    pub priority: Option<u32>,
    pub attempts: Option<u32>,
    pub remove_on_complete: Option<RetentionPolicy>,
    pub remove_on_fail: Option<RetentionPolicy>,
    pub backoff: Option<BackoffPolicy>,
}

impl QueueDefaults {
    /// Fill unset fields from `base`.
    pub fn or(&self, base: &QueueDefaults) -> QueueDefaults {
        QueueDefaults {
            priority: self.priority.or(base.priority),
            attempts: self.attempts.or(base.attempts),
            remove_on_complete: self.remove_on_complete.or(base.remove_on_complete),
            remove_on_fail: self.remove_on_fail.or(base.remove_on_fail),
            backoff: self.backoff.or(base.backoff),
        }
    }
}

/// Per-call options. Unset fields fall through to the queue defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    pub priority: Option<u32>,
    pub attempts: Option<u32>,
    pub delay: Option<Delay>,
    pub remove_on_complete: Option<RetentionPolicy>,
    pub remove_on_fail: Option<RetentionPolicy>,
    pub backoff: Option<BackoffPolicy>,
    pub repeat: Option<RepeatPolicy>,
}

impl JobOptions {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    #[must_use]
    pub fn delay(mut self, delay: impl Into<Delay>) -> Self {
        self.delay = Some(delay.into());
        self
    }

    /// Keep the last `count` completed jobs (for at most a day).
    #[must_use]
    pub fn keep_completed(mut self, count: u64) -> Self {
        self.remove_on_complete = Some(RetentionPolicy::completed(count));
        self
    }

    /// Keep the last `count` failed jobs (for at most a week).
    #[must_use]
    pub fn keep_failed(mut self, count: u64) -> Self {
        self.remove_on_fail = Some(RetentionPolicy::failed(count));
        self
    }

    #[must_use]
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    #[must_use]
    pub fn repeat(mut self, repeat: RepeatPolicy) -> Self {
        self.repeat = Some(repeat);
        self
    }

    /// Fill unset fields from `base`, keeping every field set on `self`.
    pub fn or(self, base: &JobOptions) -> JobOptions {
        JobOptions {
            priority: self.priority.or(base.priority),
            attempts: self.attempts.or(base.attempts),
            delay: self.delay.or_else(|| base.delay.clone()),
            remove_on_complete: self.remove_on_complete.or(base.remove_on_complete),
            remove_on_fail: self.remove_on_fail.or(base.remove_on_fail),
            backoff: self.backoff.or(base.backoff),
            repeat: self.repeat.or_else(|| base.repeat.clone()),
        }
    }

    /// Check everything that can be checked without the queue: the delay
    /// expression, attempts and the repeat pattern.
    pub fn prepare(&self) -> Result<PreparedOptions, JobQueueError> {
        let delay_ms = match &self.delay {
            Some(delay) => {
                let ms = delay.to_millis()?;
                let ms = u64::try_from(ms).map_err(|_| {
                    JobQueueError::InvalidOptions(format!("delay must not be negative: {ms}"))
                })?;
                Some(ms)
            }
            None => None,
        };

        if self.attempts == Some(0) {
            return Err(JobQueueError::InvalidOptions(
                "attempts must be at least 1".into(),
            ));
        }

        if let Some(repeat) = &self.repeat {
            RepeatPolicy::cron(repeat.pattern.as_str())?;
        }

        Ok(PreparedOptions {
            options: self.clone(),
            delay_ms,
        })
    }

    /// Prepare and resolve in one step.
    pub fn resolve(&self, defaults: &QueueDefaults) -> Result<ResolvedJobOptions, JobQueueError> {
        Ok(self.prepare()?.resolve(defaults))
    }
}

/// Options that passed [`JobOptions::prepare`] and only need queue defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedOptions {
    options: JobOptions,
    delay_ms: Option<u64>,
}

impl PreparedOptions {
    pub fn resolve(&self, defaults: &QueueDefaults) -> ResolvedJobOptions {
        let o = &self.options;
        ResolvedJobOptions {
            priority: o.priority.or(defaults.priority).unwrap_or(FALLBACK_PRIORITY),
            // Queue defaults are configuration; a zero there still yields one attempt.
            attempts: o
                .attempts
                .or(defaults.attempts)
                .unwrap_or(FALLBACK_ATTEMPTS)
                .max(1),
            delay_ms: self.delay_ms.unwrap_or(0),
            retention: Retention {
                complete: o
                    .remove_on_complete
                    .or(defaults.remove_on_complete)
                    .unwrap_or_default(),
                failed: o
                    .remove_on_fail
                    .or(defaults.remove_on_fail)
                    .unwrap_or_default(),
            },
            backoff: o.backoff.or(defaults.backoff),
            repeat: o.repeat.clone(),
        }
    }
}

/// Final options submitted with a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedJobOptions {
    pub priority: u32,
    pub attempts: u32,
    pub delay_ms: u64,
    pub retention: Retention,
    pub backoff: Option<BackoffPolicy>,
    pub repeat: Option<RepeatPolicy>,
}
