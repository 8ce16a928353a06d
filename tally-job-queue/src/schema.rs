//! Payload schemas.
//!
//! The client never inspects payloads itself: every trigger call is handed a
//! [`Validator`] that turns the raw JSON into the job's payload type or
//! reports a [`SchemaViolation`].

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::JobQueueError;

/// Why a payload did not satisfy its schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub path: Option<String>,
    pub message: String,
}

impl SchemaViolation {
    #[inline]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            path: None,
            message: message.into(),
        }
    }

    #[inline]
    pub fn at(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{path}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for SchemaViolation {}

/// A payload schema producing `T`.
pub trait Validator<T>: Send + Sync {
    fn parse(&self, input: &Value) -> Result<T, SchemaViolation>;
}

type Check<T> = Box<dyn Fn(&T) -> Result<(), SchemaViolation> + Send + Sync>;

/// Schema backed by `T`'s `Deserialize` impl plus optional checks run on the
/// decoded value.
pub struct SerdeSchema<T> {
    checks: Vec<Check<T>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeSchema<T> {
    pub fn new() -> Self {
        Self {
            checks: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Add a check that runs after deserialization succeeds.
    #[must_use]
    pub fn check<F>(mut self, check: F) -> Self
    where
        F: Fn(&T) -> Result<(), SchemaViolation> + Send + Sync + 'static,
    {
        self.checks.push(Box::new(check));
        self
    }
}

impl<T> Default for SerdeSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SerdeSchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerdeSchema")
            .field("type", &std::any::type_name::<T>())
            .field("checks", &self.checks.len())
            .finish()
    }
}

impl<T: DeserializeOwned> Validator<T> for SerdeSchema<T> {
    fn parse(&self, input: &Value) -> Result<T, SchemaViolation> {
        let value = T::deserialize(input).map_err(|e| SchemaViolation::new(e.to_string()))?;
        for check in &self.checks {
            check(&value)?;
        }
        Ok(value)
    }
}

/// Schema from a plain function.
#[derive(Clone)]
pub struct FnSchema<F>(pub F);

impl<T, F> Validator<T> for FnSchema<F>
where
    F: Fn(&Value) -> Result<T, SchemaViolation> + Send + Sync,
{
    fn parse(&self, input: &Value) -> Result<T, SchemaViolation> {
        (self.0)(input)
    }
}

/// Accepts any JSON value unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyPayload;

impl Validator<Value> for AnyPayload {
    fn parse(&self, input: &Value) -> Result<Value, SchemaViolation> {
        Ok(input.clone())
    }
}

/// Run `schema` over `payload` and re-encode the validated value for the
/// broker. `index` identifies the failing item of a batch.
pub(crate) fn validate_payload<T, V>(
    schema: &V,
    job: &str,
    index: Option<usize>,
    payload: &Value,
) -> Result<Value, JobQueueError>
where
    V: Validator<T> + ?Sized,
    T: Serialize,
{
    let invalid = |detail: String| JobQueueError::Validation {
        job: job.to_owned(),
        index,
        detail,
    };
    let validated = schema.parse(payload).map_err(|v| invalid(v.to_string()))?;
    serde_json::to_value(validated).map_err(|e| invalid(e.to_string()))
}
