//! In-memory cache that keeps serving the last good value after a failed refresh.
//!
//! Entries are never evicted. A successful fetch overwrites the entry, and
//! an expired entry stays around as the fallback for the next failure.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::core::clock::Clock;
use crate::core::quote::QuotaTier;

const HISTORY_TTL_FACTOR: u32 = 4;
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// One quotes refresh for a deduplicated symbol list.
    Quotes(Vec<String>),
    History(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    Quote,
    History,
}

impl CacheKey {
    pub fn quotes(symbols: &[String]) -> Self {
        CacheKey::Quotes(symbols.to_vec())
    }

    pub fn history(symbol: &str) -> Self {
        CacheKey::History(symbol.to_string())
    }

    pub fn class(&self) -> KeyClass {
        match self {
            CacheKey::Quotes(_) => KeyClass::Quote,
            CacheKey::History(_) => KeyClass::History,
        }
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::Quotes(symbols) if symbols.is_empty() => write!(f, "quotes"),
            CacheKey::Quotes(symbols) => write!(f, "quotes:{}", symbols.join(",")),
            CacheKey::History(symbol) => write!(f, "history_{symbol}"),
        }
    }
}

/// Time-to-live per key class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub quotes: Duration,
    pub history: Duration,
}

impl TtlPolicy {
    /// Stricter quotas buy longer TTLs so a daily budget lasts the whole day.
    pub fn for_tier(tier: QuotaTier) -> Self {
        let quotes = match tier {
            QuotaTier::Unlimited => Duration::from_secs(30),
            QuotaTier::PerMinute => Duration::from_secs(5 * 60),
            QuotaTier::Daily => Duration::from_secs(60 * 60),
        };
        TtlPolicy {
            quotes,
            history: quotes * HISTORY_TTL_FACTOR,
        }
    }

    pub fn with_overrides(mut self, quotes: Option<Duration>, history: Option<Duration>) -> Self {
        if let Some(quotes) = quotes {
            self.quotes = quotes;
        }
        if let Some(history) = history {
            self.history = history;
        }
        self
    }

    /// Shortest quote TTL at which refreshes costing `credits` each stay
    /// within `daily_budget` over a `window` of trading time. A refresh the
    /// budget cannot cover even once is allowed once a day.
    pub fn budget_ttl(daily_budget: u32, credits: usize, window: Duration) -> Duration {
        let refreshes = daily_budget as usize / credits.max(1);
        if refreshes == 0 {
            return DAY;
        }
        window / u32::try_from(refreshes).unwrap_or(u32::MAX)
    }

    pub fn ttl(&self, class: KeyClass) -> Duration {
        match class {
            KeyClass::Quote => self.quotes,
            KeyClass::History => self.history,
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::for_tier(QuotaTier::Unlimited)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Empty,
    Fresh,
    Stale,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    data: V,
    fetched_at: DateTime<Utc>,
    ttl: Duration,
}

#[derive(Clone)]
pub struct Cache<V>
where
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<Mutex<HashMap<CacheKey, CacheEntry<V>>>>,
    policy: TtlPolicy,
    clock: Arc<dyn Clock>,
}

impl<V> Cache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(policy: TtlPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> TtlPolicy {
        self.policy
    }

    /// Cached data and whether it is still within its TTL.
    pub async fn get(&self, key: &CacheKey) -> (Option<V>, bool) {
        let cache = self.inner.lock().await;
        match cache.get(key) {
            Some(entry) => {
                let fresh = self.is_fresh(entry);
                if fresh {
                    debug!(%key, "Cache HIT");
                } else {
                    debug!(%key, "Cache STALE");
                }
                (Some(entry.data.clone()), fresh)
            }
            None => {
                debug!(%key, "Cache MISS");
                (None, false)
            }
        }
    }

    pub async fn put(&self, key: CacheKey, data: V) {
        let ttl = self.policy.ttl(key.class());
        self.put_with_ttl(key, data, ttl).await;
    }

    /// Stores `data` with a TTL that overrides the policy for this entry.
    pub async fn put_with_ttl(&self, key: CacheKey, data: V, ttl: Duration) {
        let fetched_at = self.clock.now();
        let mut cache = self.inner.lock().await;
        debug!(%key, ?ttl, "Cache PUT");
        cache.insert(
            key,
            CacheEntry {
                data,
                fetched_at,
                ttl,
            },
        );
    }

    /// Last stored data regardless of age.
    pub async fn peek(&self, key: &CacheKey) -> Option<V> {
        self.inner.lock().await.get(key).map(|e| e.data.clone())
    }

    pub async fn state(&self, key: &CacheKey) -> EntryState {
        let cache = self.inner.lock().await;
        match cache.get(key) {
            None => EntryState::Empty,
            Some(entry) if self.is_fresh(entry) => EntryState::Fresh,
            Some(_) => EntryState::Stale,
        }
    }

    pub async fn fetched_at(&self, key: &CacheKey) -> Option<DateTime<Utc>> {
        self.inner.lock().await.get(key).map(|e| e.fetched_at)
    }

    /// Serves fresh data without fetching; otherwise fetches and falls back
    /// to stale data when the fetch fails. Errors only when nothing is cached.
    pub async fn refresh_or_serve_stale<F, Fut, E>(&self, key: CacheKey, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Display,
    {
        let ttl = self.policy.ttl(key.class());
        self.refresh_or_serve_stale_with_ttl(key, ttl, fetch).await
    }

    /// [`Cache::refresh_or_serve_stale`] storing fresh data under `ttl`.
    pub async fn refresh_or_serve_stale_with_ttl<F, Fut, E>(
        &self,
        key: CacheKey,
        ttl: Duration,
        fetch: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Display,
    {
        let (cached, fresh) = self.get(&key).await;
        if fresh {
            if let Some(data) = cached {
                return Ok(data);
            }
        }

        match fetch().await {
            Ok(data) => {
                self.put_with_ttl(key, data.clone(), ttl).await;
                Ok(data)
            }
            Err(e) => match cached {
                Some(stale) => {
                    warn!(%key, error = %e, "Refresh failed, serving stale data");
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    fn is_fresh(&self, entry: &CacheEntry<V>) -> bool {
        let age = (self.clock.now() - entry.fetched_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        age < entry.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use anyhow::anyhow;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(30);
    const EPSILON: Duration = Duration::from_millis(1);

    fn setup() -> (Arc<ManualClock>, Cache<Vec<f64>>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 3, 15, 0, 0).unwrap(),
        ));
        let policy = TtlPolicy {
            quotes: TTL,
            history: TTL * 4,
        };
        let cache = Cache::new(policy, clock.clone());
        (clock, cache)
    }

    fn key() -> CacheKey {
        CacheKey::quotes(&["AAPL".to_string()])
    }

    #[tokio::test]
    async fn test_cache_get_put() {
        let (_, cache) = setup();

        assert_eq!(cache.get(&key()).await, (None, false));
        assert_eq!(cache.state(&key()).await, EntryState::Empty);

        cache.put(key(), vec![1.0]).await;

        assert_eq!(cache.get(&key()).await, (Some(vec![1.0]), true));
        assert_eq!(cache.state(&key()).await, EntryState::Fresh);
        assert!(cache.get(&CacheKey::history("AAPL")).await.0.is_none());
    }

    #[tokio::test]
    async fn test_fresh_entry_skips_fetch() {
        let (clock, cache) = setup();
        let calls = AtomicUsize::new(0);

        let first = cache
            .refresh_or_serve_stale(key(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(vec![1.0, 2.0])
            })
            .await
            .unwrap();

        clock.advance(TTL - EPSILON);
        let second = cache
            .refresh_or_serve_stale(key(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(vec![9.0])
            })
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_refetches() {
        let (clock, cache) = setup();
        cache.put(key(), vec![1.0]).await;

        clock.advance(TTL + EPSILON);
        assert_eq!(cache.state(&key()).await, EntryState::Stale);

        let calls = AtomicUsize::new(0);
        let refreshed = cache
            .refresh_or_serve_stale(key(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(vec![2.0])
            })
            .await
            .unwrap();

        assert_eq!(refreshed, vec![2.0]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.state(&key()).await, EntryState::Fresh);
    }

    #[tokio::test]
    async fn test_failed_refresh_serves_stale() {
        let (clock, cache) = setup();
        cache.put(key(), vec![1.0]).await;
        let fetched_at = cache.fetched_at(&key()).await;

        clock.advance(TTL + EPSILON);
        let result = cache
            .refresh_or_serve_stale(key(), || async {
                Err::<Vec<f64>, _>(anyhow!("upstream down"))
            })
            .await
            .unwrap();

        assert_eq!(result, vec![1.0]);
        // The stale entry is not touched by a failed refresh.
        assert_eq!(cache.fetched_at(&key()).await, fetched_at);
        assert_eq!(cache.state(&key()).await, EntryState::Stale);
    }

    #[tokio::test]
    async fn test_cold_start_failure_propagates() {
        let (_, cache) = setup();

        let result = cache
            .refresh_or_serve_stale(key(), || async {
                Err::<Vec<f64>, _>(anyhow!("upstream down"))
            })
            .await;

        assert_eq!(result.unwrap_err().to_string(), "upstream down");
        assert_eq!(cache.state(&key()).await, EntryState::Empty);
    }

    #[tokio::test]
    async fn test_history_class_uses_longer_ttl() {
        let (clock, cache) = setup();
        let history = CacheKey::history("^GSPC");
        cache.put(key(), vec![1.0]).await;
        cache.put(history.clone(), vec![1.0]).await;

        clock.advance(TTL + EPSILON);
        assert_eq!(cache.state(&key()).await, EntryState::Stale);
        assert_eq!(cache.state(&history).await, EntryState::Fresh);

        clock.advance(TTL * 3);
        assert_eq!(cache.state(&history).await, EntryState::Stale);
    }

    #[test]
    fn test_ttl_policy_tiers() {
        let unlimited = TtlPolicy::for_tier(QuotaTier::Unlimited);
        let daily = TtlPolicy::for_tier(QuotaTier::Daily);
        let per_minute = TtlPolicy::for_tier(QuotaTier::PerMinute);

        assert_eq!(unlimited.quotes, Duration::from_secs(30));
        assert_eq!(unlimited.history, Duration::from_secs(120));
        assert!(daily.quotes > per_minute.quotes);
        assert!(per_minute.quotes > unlimited.quotes);
        for policy in [unlimited, per_minute, daily] {
            assert!(policy.ttl(KeyClass::History) > policy.ttl(KeyClass::Quote));
        }

        let overridden = daily.with_overrides(Some(Duration::from_secs(10)), None);
        assert_eq!(overridden.quotes, Duration::from_secs(10));
        assert_eq!(overridden.history, daily.history);
    }

    #[tokio::test]
    async fn test_entry_ttl_overrides_policy() {
        let (clock, cache) = setup();
        let ttl = Duration::from_secs(3 * 60 * 60);
        cache
            .refresh_or_serve_stale_with_ttl(key(), ttl, || async {
                Ok::<_, anyhow::Error>(vec![1.0])
            })
            .await
            .unwrap();

        clock.advance(TTL * 10);
        assert_eq!(cache.state(&key()).await, EntryState::Fresh);
        clock.advance(ttl);
        assert_eq!(cache.state(&key()).await, EntryState::Stale);
        assert_eq!(cache.peek(&key()).await, Some(vec![1.0]));
    }

    #[test]
    fn test_budget_ttl_spreads_refreshes_over_window() {
        let session = Duration::from_secs(6 * 3600 + 30 * 60);
        // 25 credits, 15 per refresh: one refresh per session.
        assert_eq!(TtlPolicy::budget_ttl(25, 15, session), session);
        // 25 credits, 5 per refresh: five refreshes.
        assert_eq!(TtlPolicy::budget_ttl(25, 5, session), session / 5);
        // Not even one refresh fits.
        assert_eq!(TtlPolicy::budget_ttl(25, 30, session), DAY);
        assert!(TtlPolicy::budget_ttl(800, 3, session) < Duration::from_secs(120));
    }

    #[test]
    fn test_cache_key_display() {
        assert_eq!(CacheKey::Quotes(vec![]).to_string(), "quotes");
        assert_eq!(
            CacheKey::quotes(&["AAPL".to_string(), "^GSPC".to_string()]).to_string(),
            "quotes:AAPL,^GSPC"
        );
        assert_eq!(CacheKey::history("^DJI").to_string(), "history_^DJI");
    }
}
