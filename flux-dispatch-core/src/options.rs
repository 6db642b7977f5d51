//! Retry configuration owned by each [`Action`](crate::Action)

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::OptionsError;

/// Default cap on deferred dispatch attempts
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before each deferred attempt
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(15);

/// Retry policy for dispatches that collide with an in-flight dispatch.
///
/// - `max_retries`: a deferred attempt whose count exceeds this fails
/// - `timeout`: delay before each deferred attempt
///
/// Deserializes from `{ "maxRetries": 5, "timeout": 10 }` with `timeout` in
/// milliseconds. Missing or `null` fields fall back to the defaults. An
/// explicit `0` is kept as zero, it does not select the default.
///
/// Any JSON number is accepted: `maxRetries` is floored and `timeout` is
/// rounded to whole milliseconds. Negative values are rejected.
///
/// # Example
/// ```
/// use flux_dispatch_core::ActionOptions;
/// use std::time::Duration;
///
/// let options = ActionOptions::from_json(r#"{ "maxRetries": 5 }"#).unwrap();
/// assert_eq!(options.max_retries(), 5);
/// assert_eq!(options.timeout(), Duration::from_millis(15));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawOptions")]
pub struct ActionOptions {
    max_retries: u32,
    timeout: Duration,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOptions {
    #[serde(default)]
    max_retries: Option<f64>,
    #[serde(default)]
    timeout: Option<f64>,
}

impl TryFrom<RawOptions> for ActionOptions {
    type Error = OptionsError;

    fn try_from(raw: RawOptions) -> Result<Self, OptionsError> {
        let mut options = Self::default();
        if let Some(max_retries) = raw.max_retries {
            options.max_retries = retry_count(max_retries)?;
        }
        if let Some(timeout) = raw.timeout {
            options.timeout = timeout_millis(timeout)?;
        }
        Ok(options)
    }
}

fn retry_count(value: f64) -> Result<u32, OptionsError> {
    let count = value.floor();
    if !count.is_finite() || count < 0.0 || count > f64::from(u32::MAX) {
        return Err(OptionsError::InvalidField {
            field: "maxRetries",
        });
    }
    Ok(count as u32)
}

fn timeout_millis(value: f64) -> Result<Duration, OptionsError> {
    let millis = value.round();
    if !millis.is_finite() || millis < 0.0 {
        return Err(OptionsError::InvalidField { field: "timeout" });
    }
    Ok(Duration::from_millis(millis as u64))
}

impl Default for ActionOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ActionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retry cap
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay before each deferred attempt
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Validate and build options from a loosely typed JSON value.
    ///
    /// `null` yields the defaults. Each recognised field must be a
    /// non-negative number or `null`; unknown keys are ignored.
    pub fn from_value(value: &Value) -> Result<Self, OptionsError> {
        let map = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            _ => return Err(OptionsError::NotAnObject),
        };

        Self::try_from(RawOptions {
            max_retries: numeric_field(map.get("maxRetries"), "maxRetries")?,
            timeout: numeric_field(map.get("timeout"), "timeout")?,
        })
    }

    /// Parse options from a JSON document, see [`ActionOptions::from_value`]
    pub fn from_json(json: &str) -> Result<Self, OptionsError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(&value)
    }
}

fn numeric_field(value: Option<&Value>, field: &'static str) -> Result<Option<f64>, OptionsError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or(OptionsError::InvalidField { field }),
        Some(_) => Err(OptionsError::InvalidField { field }),
    }
}
