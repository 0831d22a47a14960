//! Per-provider outbound rate limiting
//!
//! One token bucket per active provider, so the dispatcher's worker-pool
//! size and a provider's published limits stay decoupled: raising
//! concurrency never raises outbound calls per second beyond the bucket.
//! Every adapter invocation, retries included, goes through [`ProviderLimiters::acquire`].

#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use easel_config::RateConfig;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use thiserror::Error;

/// Bucket applied to providers with no explicit rate configuration
const DEFAULT_RATE: RateConfig = RateConfig {
    capacity: 4,
    per_second: 2.0,
};

/// Rate limiting errors
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Configuration error
    #[error("rate limit configuration error: {0}")]
    Config(String),

    /// No bucket exists for the named provider
    #[error("no rate limiter for provider '{0}'")]
    UnknownProvider(String),
}

/// Token buckets for all active providers
pub struct ProviderLimiters {
    buckets: HashMap<String, Arc<DefaultDirectRateLimiter>>,
}

impl ProviderLimiters {
    /// Build one bucket per provider
    ///
    /// Providers without an explicit rate get a conservative default bucket
    /// of their own; buckets are never shared between providers.
    pub fn new<'a>(
        providers: impl IntoIterator<Item = (&'a str, Option<RateConfig>)>,
    ) -> Result<Self, RateLimitError> {
        let mut buckets = HashMap::new();
        for (name, rate) in providers {
            let rate = rate.unwrap_or(DEFAULT_RATE);
            buckets.insert(name.to_owned(), Arc::new(build_bucket(name, rate)?));
        }
        Ok(Self { buckets })
    }

    /// Suspend until a token is available for the provider, then consume it
    ///
    /// # Errors
    ///
    /// Returns `UnknownProvider` if the provider has no bucket, which means
    /// it was not active at construction time
    pub async fn acquire(&self, provider: &str) -> Result<(), RateLimitError> {
        let bucket = self
            .buckets
            .get(provider)
            .ok_or_else(|| RateLimitError::UnknownProvider(provider.to_owned()))?;
        bucket.until_ready().await;
        Ok(())
    }

    /// Whether a bucket exists for the provider
    pub fn has(&self, provider: &str) -> bool {
        self.buckets.contains_key(provider)
    }
}

fn build_bucket(name: &str, rate: RateConfig) -> Result<DefaultDirectRateLimiter, RateLimitError> {
    if rate.per_second <= 0.0 {
        return Err(RateLimitError::Config(format!(
            "refill rate for provider '{name}' must be > 0"
        )));
    }
    let burst = NonZeroU32::new(rate.capacity)
        .ok_or_else(|| RateLimitError::Config(format!("capacity for provider '{name}' must be > 0")))?;

    let period = Duration::from_secs_f64(1.0 / rate.per_second);
    let quota = Quota::with_period(period)
        .ok_or_else(|| RateLimitError::Config(format!("invalid refill period for provider '{name}'")))?
        .allow_burst(burst);

    tracing::debug!(provider = name, capacity = rate.capacity, per_second = rate.per_second, "rate bucket built");
    Ok(RateLimiter::direct(quota))
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn limiters(capacity: u32, per_second: f64) -> ProviderLimiters {
        ProviderLimiters::new([("gemini", Some(RateConfig { capacity, per_second }))]).unwrap()
    }

    #[tokio::test]
    async fn burst_up_to_capacity_is_immediate() {
        let limiters = limiters(3, 1000.0);
        let start = Instant::now();
        for _ in 0..3 {
            limiters.acquire("gemini").await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn acquires_are_spaced_by_refill_rate() {
        // Capacity 1, 20 tokens/sec: 4 sequential acquires need 3 refills,
        // so at least 150ms must elapse
        let limiters = limiters(1, 20.0);
        let start = Instant::now();
        for _ in 0..4 {
            limiters.acquire("gemini").await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn concurrent_acquires_respect_the_bucket() {
        let limiters = Arc::new(limiters(1, 20.0));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiters = Arc::clone(&limiters);
            handles.push(tokio::spawn(async move {
                limiters.acquire("gemini").await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn unknown_provider_is_rejected() {
        let limiters = limiters(1, 1.0);
        assert!(matches!(
            limiters.acquire("unconfigured").await,
            Err(RateLimitError::UnknownProvider(_))
        ));
    }

    #[test]
    fn zero_capacity_rejected() {
        let result = ProviderLimiters::new([(
            "gemini",
            Some(RateConfig {
                capacity: 0,
                per_second: 1.0,
            }),
        )]);
        assert!(matches!(result, Err(RateLimitError::Config(_))));
    }

    #[test]
    fn default_bucket_when_unconfigured() {
        let limiters = ProviderLimiters::new([("gemini", None)]).unwrap();
        assert!(limiters.has("gemini"));
    }
}
