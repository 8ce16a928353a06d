//! Relative delay expressions ("30s", "5m", "1h", "1d") and their conversion
//! to milliseconds.

use std::fmt;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::JobQueueError;

/// Shape accepted for string delays (ASCII digits and a unit), reported in
/// [`JobQueueError::Format`].
pub const DELAY_PATTERN: &str = "^([0-9]+)([smhd])$";

const MS_PER_SECOND: i64 = 1_000;
const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

static DELAY_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(DELAY_PATTERN).unwrap());

/// A delay given either as literal milliseconds or as a `<n><unit>` string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Delay {
    Millis(i64),
    Expr(String),
}

impl Delay {
    /// Convert to milliseconds. See [`parse_delay`].
    pub fn to_millis(&self) -> Result<i64, JobQueueError> {
        match self {
            Self::Millis(ms) => Ok(*ms),
            Self::Expr(expr) => parse_expr(expr),
        }
    }
}

impl fmt::Display for Delay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Millis(ms) => write!(f, "{ms}ms"),
            Self::Expr(expr) => f.write_str(expr),
        }
    }
}

impl From<i64> for Delay {
    #[inline]
    fn from(ms: i64) -> Self {
        Self::Millis(ms)
    }
}

impl From<u32> for Delay {
    #[inline]
    fn from(ms: u32) -> Self {
        Self::Millis(i64::from(ms))
    }
}

impl From<Duration> for Delay {
    #[inline]
    fn from(d: Duration) -> Self {
        Self::Millis(i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
    }
}

impl From<&str> for Delay {
    #[inline]
    fn from(s: &str) -> Self {
        Self::Expr(s.to_owned())
    }
}

impl From<String> for Delay {
    #[inline]
    fn from(s: String) -> Self {
        Self::Expr(s)
    }
}

/// Normalize a delay to milliseconds.
///
/// Numeric input is returned unchanged, negative values included; callers
/// that submit jobs reject negative delays themselves. Strings must match
/// [`DELAY_PATTERN`] exactly, anything else is a [`JobQueueError::Format`].
pub fn parse_delay(input: impl Into<Delay>) -> Result<i64, JobQueueError> {
    input.into().to_millis()
}

fn parse_expr(input: &str) -> Result<i64, JobQueueError> {
    let format_error = || JobQueueError::Format {
        input: input.to_owned(),
        expected: DELAY_PATTERN,
    };

    let caps = DELAY_REGEX.captures(input).ok_or_else(format_error)?;
    let amount: i64 = caps[1].parse().map_err(|_| format_error())?;
    let factor = match &caps[2] {
        "s" => MS_PER_SECOND,
        "m" => MS_PER_MINUTE,
        "h" => MS_PER_HOUR,
        "d" => MS_PER_DAY,
        _ => return Err(format_error()),
    };

    amount.checked_mul(factor).ok_or_else(format_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_each_unit() {
        assert_eq!(parse_delay("30s").unwrap(), 30_000);
        assert_eq!(parse_delay("5m").unwrap(), 300_000);
        assert_eq!(parse_delay("1h").unwrap(), 3_600_000);
        assert_eq!(parse_delay("1d").unwrap(), 86_400_000);
        assert_eq!(parse_delay("0s").unwrap(), 0);
        assert_eq!(parse_delay("90m").unwrap(), 90 * 60_000);
    }

    #[test]
    fn numeric_input_is_passed_through() {
        assert_eq!(parse_delay(5000i64).unwrap(), 5000);
        assert_eq!(parse_delay(-1i64).unwrap(), -1);
        assert_eq!(parse_delay(Duration::from_secs(2)).unwrap(), 2000);
    }

    #[test]
    fn rejects_malformed_strings() {
        for input in ["5", "m5", "5x", "", " 5m", "5m ", "5 m", "-5m", "1.5h", "5M", "٥m"] {
            match parse_delay(input) {
                Err(JobQueueError::Format { input: got, expected }) => {
                    assert_eq!(got, input);
                    assert_eq!(expected, DELAY_PATTERN);
                }
                other => panic!("expected format error for {input:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn rejects_overflowing_amounts() {
        assert!(matches!(
            parse_delay("99999999999999999999d"),
            Err(JobQueueError::Format { .. })
        ));
        assert!(matches!(
            parse_delay("9223372036854775807d"),
            Err(JobQueueError::Format { .. })
        ));
    }

    #[test]
    fn deserializes_from_number_or_string() {
        let d: Delay = serde_json::from_str("1500").unwrap();
        assert_eq!(d, Delay::Millis(1500));
        let d: Delay = serde_json::from_str("\"2h\"").unwrap();
        assert_eq!(d.to_millis().unwrap(), 7_200_000);
    }
}
