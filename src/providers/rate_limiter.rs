//! Token bucket rate limiting owned by each provider adapter.
//!
//! An adapter holds one bucket per documented ceiling (per minute, per day).
//! A request pays its credits into every bucket, so the strictest ceiling wins.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core::error::MarketDataError;
use crate::core::symbol::ProviderId;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// A documented request ceiling: `limit` credits per `period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u32,
    pub period: Duration,
}

impl RateLimit {
    pub const fn per_minute(limit: u32) -> Self {
        RateLimit {
            limit,
            period: Duration::from_secs(60),
        }
    }

    pub const fn per_day(limit: u32) -> Self {
        RateLimit { limit, period: DAY }
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    period: Duration,
    /// Tokens per second.
    rate: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(limit: RateLimit) -> Self {
        let capacity = limit.limit.max(1) as f64;
        Self {
            tokens: capacity,
            capacity,
            period: limit.period,
            rate: capacity / limit.period.as_secs_f64(),
            last_update: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_update = now;
    }

    fn time_until(&self, credits: f64) -> Duration {
        if self.tokens >= credits {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((credits - self.tokens) / self.rate)
        }
    }
}

pub struct RateLimiter {
    provider: ProviderId,
    buckets: Mutex<Vec<TokenBucket>>,
    max_wait: Duration,
}

impl RateLimiter {
    pub fn new(provider: ProviderId, limits: &[RateLimit], max_wait: Duration) -> Self {
        Self {
            provider,
            buckets: Mutex::new(limits.iter().copied().map(TokenBucket::new).collect()),
            max_wait,
        }
    }

    /// A limiter that never waits.
    pub fn unlimited(provider: ProviderId) -> Self {
        Self::new(provider, &[], Duration::ZERO)
    }

    /// Largest number of credits a single request may take at once.
    pub fn max_batch(&self) -> Option<u32> {
        self.lock_buckets()
            .iter()
            .map(|b| b.capacity as u32)
            .min()
    }

    /// Credits available per day under the strictest day-long ceiling.
    pub fn daily_limit(&self) -> Option<u32> {
        self.lock_buckets()
            .iter()
            .filter(|b| b.period >= DAY)
            .map(|b| b.capacity as u32)
            .min()
    }

    fn lock_buckets(&self) -> MutexGuard<'_, Vec<TokenBucket>> {
        self.buckets.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Suspends until every bucket can pay `credits`.
    ///
    /// Fails with `QuotaExhausted` instead of sleeping when the wait would
    /// exceed `max_wait`, e.g. when a daily quota is spent.
    pub async fn acquire(&self, credits: u32) -> Result<(), MarketDataError> {
        let credits = credits.max(1) as f64;
        loop {
            let wait = {
                let mut buckets = self.lock_buckets();
                if buckets.iter().any(|b| credits > b.capacity) {
                    return Err(MarketDataError::ProviderError {
                        provider: self.provider,
                        message: format!("batch of {credits} credits exceeds rate ceiling"),
                    });
                }

                let mut wait = Duration::ZERO;
                for bucket in buckets.iter_mut() {
                    bucket.refill();
                    wait = wait.max(bucket.time_until(credits));
                }

                if wait.is_zero() {
                    for bucket in buckets.iter_mut() {
                        bucket.tokens -= credits;
                    }
                    return Ok(());
                }
                wait
            };

            if wait > self.max_wait {
                warn!(
                    provider = %self.provider,
                    ?wait,
                    "Rate ceiling reached, quota exhausted for now"
                );
                return Err(MarketDataError::QuotaExhausted {
                    provider: self.provider,
                    retry_after: wait,
                });
            }

            debug!(provider = %self.provider, ?wait, "Rate limiter: waiting for refill");
            tokio::time::sleep(wait).await;
        }
    }
}
