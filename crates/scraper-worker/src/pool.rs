//! Bounded fetch pool
//!
//! Every page request of the worker goes through one pool. The semaphore is a
//! global ceiling on requests in flight, shared by all publications of a
//! batch. The rate limiter spaces requests out on top of that.

use crate::errors::ScrapeError;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use scholarflow_common::config::ScraperConfig;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::debug;
use url::Url;

#[derive(Clone)]
pub struct FetchPool {
    client: reqwest::Client,
    permits: Arc<Semaphore>,
    limiter: Arc<DefaultDirectRateLimiter>,
    capacity: usize,
}

impl FetchPool {
    pub fn new(config: &ScraperConfig) -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ScrapeError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        let rps = NonZeroU32::new(config.requests_per_second).ok_or_else(|| {
            ScrapeError::ConfigError("scraper.requests_per_second must be positive".to_string())
        })?;
        let capacity = config.pool_size.max(1);

        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(capacity)),
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
            capacity,
        })
    }

    /// Maximum requests in flight
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// GET a page and return its body
    pub async fn get(&self, url: &Url) -> Result<String, ScrapeError> {
        let _permit = self.permits.acquire().await.map_err(|_| ScrapeError::PoolClosed)?;
        self.limiter.until_ready().await;

        let start = Instant::now();
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        debug!(url = %url, elapsed_ms = start.elapsed().as_millis() as u64, "Fetched page");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_rate_rejected() {
        let config = ScraperConfig {
            requests_per_second: 0,
            ..Default::default()
        };
        assert!(matches!(FetchPool::new(&config), Err(ScrapeError::ConfigError(_))));
    }

    #[test]
    fn test_capacity_from_config() {
        let config = ScraperConfig {
            pool_size: 7,
            ..Default::default()
        };
        assert_eq!(FetchPool::new(&config).unwrap().capacity(), 7);
    }
}
