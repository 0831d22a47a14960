use std::time::Duration;

use serde::Deserialize;

/// Dispatcher and worker-pool configuration
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatcherConfig {
    /// Worker pool size; the only parallelism boundary in the engine
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Bounded depth of the shared work queue
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Per-attempt timeout on the provider call (duration string)
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
    /// Retry/backoff policy
    #[serde(default)]
    pub retry: RetryConfig,
}

impl DispatcherConfig {
    /// Parsed per-attempt timeout
    pub fn request_timeout(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.request_timeout)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            queue_depth: default_queue_depth(),
            request_timeout: default_request_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry/backoff policy configuration
///
/// Delay for attempt N is `base_delay * multiplier^(N-1)` plus uniform
/// jitter, capped at `max_delay`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Maximum adapter invocations per job, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry delay (duration string)
    #[serde(default = "default_base_delay")]
    pub base_delay: String,
    /// Exponential backoff multiplier
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Upper bound on any single delay (duration string)
    #[serde(default = "default_max_delay")]
    pub max_delay: String,
    /// Upper bound on random jitter added to each delay (duration string)
    #[serde(default = "default_jitter")]
    pub jitter: String,
}

impl RetryConfig {
    pub fn base_delay(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.base_delay)
    }

    pub fn max_delay(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.max_delay)
    }

    pub fn jitter(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.jitter)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            multiplier: default_multiplier(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    duration_str::parse(s).map_err(|e| anyhow::anyhow!("invalid duration '{s}': {e}"))
}

fn default_concurrency() -> usize {
    4
}

fn default_queue_depth() -> usize {
    256
}

fn default_request_timeout() -> String {
    "60s".to_owned()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> String {
    "500ms".to_owned()
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay() -> String {
    "30s".to_owned()
}

fn default_jitter() -> String {
    "250ms".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let config = DispatcherConfig::default();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.request_timeout().unwrap(), Duration::from_secs(60));
        assert_eq!(config.retry.base_delay().unwrap(), Duration::from_millis(500));
        assert_eq!(config.retry.max_delay().unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn bad_duration_rejected() {
        let config = DispatcherConfig {
            request_timeout: "not-a-duration".to_owned(),
            ..DispatcherConfig::default()
        };
        assert!(config.request_timeout().is_err());
    }
}
