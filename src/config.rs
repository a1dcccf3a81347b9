//! Configuration management for the agent runtime.
//!
//! Configuration can be set via environment variables:
//! - `OPENROUTER_API_KEY` - Optional. Enables the semantic complexity classifier.
//! - `CLASSIFIER_MODEL` - Optional. Classifier model. Defaults to `openai/gpt-4o-mini`.
//! - `CLASSIFIER_TIMEOUT_MS` - Optional. Per-request classifier deadline. Defaults to `10000`.
//! - `BREAKER_FAILURE_THRESHOLD` - Optional. Failures that open a circuit. Defaults to `5`.
//! - `BREAKER_SUCCESS_THRESHOLD` - Optional. Half-open successes that close it. Defaults to `2`.
//! - `BREAKER_TIMEOUT_MS` - Optional. Cooldown before a trial call. Defaults to `30000`.
//! - `BREAKER_RESET_TIMEOUT_MS` - Optional. Defaults to `60000`.
//! - `RETRY_MAX_RETRIES` - Optional. Retries after the first attempt. Defaults to `2`.
//! - `RETRY_DELAY_MS` - Optional. First backoff delay. Defaults to `1000`.
//! - `RETRY_BACKOFF_MULTIPLIER` - Optional. Defaults to `2.0`.
//! - `RESULT_MAX_LENGTH` - Optional. Result payload budget. Defaults to `1000`.
//! - `PIPELINE_MAX_CONCURRENCY` - Optional. Subtasks at once per batch. Defaults to `4`.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::agents::{
    PipelineOptions, DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_CLASSIFIER_MODEL, DEFAULT_MAX_CONCURRENCY,
};
use crate::resilience::{BreakerConfig, RetryConfig};
use crate::tools::DEFAULT_MAX_LENGTH;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Semantic classifier configuration.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// OpenRouter API key; the classifier is disabled without one
    pub api_key: Option<String>,

    /// Model identifier (OpenRouter format)
    pub model: String,

    /// Deadline for one classification request; the retry loop runs on top
    pub timeout: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_CLASSIFIER_MODEL.to_string(),
            timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

impl ClassifierConfig {
    /// Check if the classifier is enabled (API key configured)
    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub classifier: ClassifierConfig,

    /// Defaults for every circuit breaker in the registry
    pub breaker: BreakerConfig,

    /// Retry policy for tool and classifier calls
    pub retry: RetryConfig,

    /// Serialized-size budget for result payloads
    pub max_result_length: usize,

    /// Subtasks running at once within a batch
    pub max_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
            max_result_length: DEFAULT_MAX_LENGTH,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let defaults_breaker = BreakerConfig::default();
        let defaults_retry = RetryConfig::default();

        let classifier = ClassifierConfig {
            api_key: lookup("OPENROUTER_API_KEY").filter(|k| !k.trim().is_empty()),
            model: lookup("CLASSIFIER_MODEL").unwrap_or_else(|| DEFAULT_CLASSIFIER_MODEL.to_string()),
            timeout: millis(&lookup, "CLASSIFIER_TIMEOUT_MS", DEFAULT_ATTEMPT_TIMEOUT)?,
        };

        let breaker = BreakerConfig {
            failure_threshold: parse(&lookup, "BREAKER_FAILURE_THRESHOLD", defaults_breaker.failure_threshold)?,
            success_threshold: parse(&lookup, "BREAKER_SUCCESS_THRESHOLD", defaults_breaker.success_threshold)?,
            timeout: millis(&lookup, "BREAKER_TIMEOUT_MS", defaults_breaker.timeout)?,
            reset_timeout: millis(&lookup, "BREAKER_RESET_TIMEOUT_MS", defaults_breaker.reset_timeout)?,
        };
        if breaker.failure_threshold == 0 {
            return Err(ConfigError::InvalidValue(
                "BREAKER_FAILURE_THRESHOLD".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if breaker.success_threshold == 0 {
            return Err(ConfigError::InvalidValue(
                "BREAKER_SUCCESS_THRESHOLD".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let backoff_multiplier: f64 =
            parse(&lookup, "RETRY_BACKOFF_MULTIPLIER", defaults_retry.backoff_multiplier)?;
        if !backoff_multiplier.is_finite() || backoff_multiplier < 0.0 {
            return Err(ConfigError::InvalidValue(
                "RETRY_BACKOFF_MULTIPLIER".to_string(),
                format!("{} is not a non-negative number", backoff_multiplier),
            ));
        }
        let retry = RetryConfig::new(
            parse(&lookup, "RETRY_MAX_RETRIES", defaults_retry.max_retries)?,
            millis(&lookup, "RETRY_DELAY_MS", defaults_retry.retry_delay)?,
            backoff_multiplier,
        );

        let max_result_length = parse(&lookup, "RESULT_MAX_LENGTH", DEFAULT_MAX_LENGTH)?;
        let max_concurrency: usize = parse(&lookup, "PIPELINE_MAX_CONCURRENCY", DEFAULT_MAX_CONCURRENCY)?;
        if max_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "PIPELINE_MAX_CONCURRENCY".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            classifier,
            breaker,
            retry,
            max_result_length,
            max_concurrency,
        })
    }

    /// Pipeline tuning derived from this configuration.
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            retry: self.retry.clone(),
            max_result_length: self.max_result_length,
            max_concurrency: self.max_concurrency,
        }
    }
}

fn parse<L, T>(lookup: &L, key: &str, default: T) -> Result<T, ConfigError>
where
    L: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), format!("{}", e))),
        None => Ok(default),
    }
}

fn millis<L>(lookup: &L, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    L: Fn(&str) -> Option<String>,
{
    parse(lookup, key, default.as_millis() as u64).map(Duration::from_millis)
}
