// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;
use std::time::Duration;

use crate::LinearBackoff;
use crate::constants::{
    DEFAULT_BASE_DELAY, DEFAULT_COMPLETION_FIELD, DEFAULT_FAILURE_THRESHOLD, DEFAULT_MAX_RETRIES, DEFAULT_SUPPRESSION_WINDOW,
    DEFAULT_TIMEOUT,
};

/// Resilience settings for calls to one service.
///
/// A configuration is built once per service, either through [`ResilienceConfig::builder`] or,
/// with the `serde` feature, by deserializing it. It is immutable afterwards and is validated when
/// built, so every `ResilienceConfig` in circulation is usable.
///
/// # Defaults
///
/// | Parameter | Default Value | Description | Configured By |
/// |-----------|---------------|-------------|---------------|
/// | Max retries | `3` (4 attempts total) | Retries performed after the initial attempt | [`max_retries`][ResilienceConfigBuilder::max_retries] |
/// | Base delay | `1000` milliseconds | Base of the linear backoff schedule | [`base_delay`][ResilienceConfigBuilder::base_delay] |
/// | Timeout | `2000` seconds | Timeout applied to every single attempt | [`timeout`][ResilienceConfigBuilder::timeout] |
/// | Failure threshold | `2` | Recorded failures after which the service is suppressed | [`failure_threshold`][ResilienceConfigBuilder::failure_threshold] |
/// | Suppression window | `5` minutes | How long a recorded failure counts against the service | [`suppression_window`][ResilienceConfigBuilder::suppression_window] |
/// | Completion field | `"completed"` | JSON payload flag that marks an unfinished remote operation | [`completion_field`][ResilienceConfigBuilder::completion_field] |
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
///
/// use backstop::ResilienceConfig;
///
/// let config = ResilienceConfig::builder()
///     .max_retries(5)
///     .base_delay(Duration::from_millis(200))
///     .failure_threshold(3)
///     .build()?;
///
/// assert_eq!(config.max_retries(), 5);
/// assert_eq!(config.backoff().delay(2), Duration::from_millis(400));
/// # Ok::<(), backstop::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Deserialize), serde(try_from = "RawConfig"))]
pub struct ResilienceConfig {
    max_retries: u32,
    base_delay: Duration,
    timeout: Duration,
    failure_threshold: u32,
    suppression_window: Duration,
    completion_field: Cow<'static, str>,
}

impl ResilienceConfig {
    /// Starts building a configuration from the defaults.
    #[must_use]
    pub fn builder() -> ResilienceConfigBuilder {
        ResilienceConfigBuilder::default()
    }

    /// Number of retries performed after the initial attempt.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Base delay of the backoff schedule.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// The backoff schedule derived from [`base_delay`][Self::base_delay].
    #[must_use]
    pub fn backoff(&self) -> LinearBackoff {
        LinearBackoff::new(self.base_delay)
    }

    /// Timeout applied to each attempt.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of live failures at which the service becomes suppressed.
    #[must_use]
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// How long a recorded failure keeps counting against the service.
    #[must_use]
    pub fn suppression_window(&self) -> Duration {
        self.suppression_window
    }

    /// Name of the JSON payload flag that marks an unfinished remote operation.
    #[must_use]
    pub fn completion_field(&self) -> &str {
        &self.completion_field
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            timeout: DEFAULT_TIMEOUT,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            suppression_window: DEFAULT_SUPPRESSION_WINDOW,
            completion_field: Cow::Borrowed(DEFAULT_COMPLETION_FIELD),
        }
    }
}

/// Builds a validated [`ResilienceConfig`].
///
/// Obtained from [`ResilienceConfig::builder`]. Every setter is optional; unset values keep
/// their defaults.
#[derive(Debug, Clone, Default)]
pub struct ResilienceConfigBuilder {
    config: ResilienceConfig,
}

impl ResilienceConfigBuilder {
    /// Sets the number of retries performed after the initial attempt. `0` disables retries.
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Sets the base delay of the linear backoff schedule. May be zero.
    #[must_use]
    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.config.base_delay = base_delay;
        self
    }

    /// Sets the timeout applied to each attempt. Must be positive.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Sets the number of live failures at which the service becomes suppressed. Must be positive.
    #[must_use]
    pub fn failure_threshold(mut self, failure_threshold: u32) -> Self {
        self.config.failure_threshold = failure_threshold;
        self
    }

    /// Sets how long a recorded failure keeps counting against the service. Must be positive.
    #[must_use]
    pub fn suppression_window(mut self, suppression_window: Duration) -> Self {
        self.config.suppression_window = suppression_window;
        self
    }

    /// Sets the JSON payload flag that marks an unfinished remote operation. Must not be empty.
    #[must_use]
    pub fn completion_field(mut self, completion_field: impl Into<Cow<'static, str>>) -> Self {
        self.config.completion_field = completion_field.into();
        self
    }

    /// Validates and returns the configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the first invalid setting.
    pub fn build(self) -> Result<ResilienceConfig, ConfigError> {
        let config = self.config;

        if config.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }

        if config.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }

        if config.suppression_window.is_zero() {
            return Err(ConfigError::ZeroSuppressionWindow);
        }

        if config.completion_field.is_empty() {
            return Err(ConfigError::EmptyCompletionField);
        }

        Ok(config)
    }
}

/// A [`ResilienceConfig`] setting is out of range.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The per-attempt timeout is zero.
    #[error("timeout must be positive")]
    ZeroTimeout,

    /// The failure threshold is zero.
    #[error("failure threshold must be positive")]
    ZeroFailureThreshold,

    /// The suppression window is zero.
    #[error("suppression window must be positive")]
    ZeroSuppressionWindow,

    /// The completion field name is empty.
    #[error("completion field must not be empty")]
    EmptyCompletionField,
}

/// Wire shape of a [`ResilienceConfig`]. Durations are plain integers in the units of their names.
#[cfg(any(feature = "serde", test))]
#[derive(Debug, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    max_retries: u32,
    base_delay_millis: u64,
    timeout_seconds: u64,
    failure_threshold: u32,
    suppression_window_minutes: u64,
    completion_field: String,
}

#[cfg(any(feature = "serde", test))]
impl Default for RawConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_millis: u64::try_from(DEFAULT_BASE_DELAY.as_millis()).unwrap_or(u64::MAX),
            timeout_seconds: DEFAULT_TIMEOUT.as_secs(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            suppression_window_minutes: DEFAULT_SUPPRESSION_WINDOW.as_secs() / 60,
            completion_field: DEFAULT_COMPLETION_FIELD.to_string(),
        }
    }
}

#[cfg(any(feature = "serde", test))]
impl TryFrom<RawConfig> for ResilienceConfig {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        Self::builder()
            .max_retries(raw.max_retries)
            .base_delay(Duration::from_millis(raw.base_delay_millis))
            .timeout(Duration::from_secs(raw.timeout_seconds))
            .failure_threshold(raw.failure_threshold)
            .suppression_window(Duration::from_secs(raw.suppression_window_minutes.saturating_mul(60)))
            .completion_field(raw.completion_field)
            .build()
    }
}
