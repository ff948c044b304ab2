//! Cached quote, history and sparkline operations on top of the aggregator.

use anyhow::Result;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::aggregator::{ProviderRoutes, QuoteAggregator};
use crate::core::cache::{Cache, CacheKey, TtlPolicy};
use crate::core::clock::Clock;
use crate::core::config::AppConfig;
use crate::core::error::MarketDataError;
use crate::core::market_hours::MarketHours;
use crate::core::quote::{HistorySeries, Quote, QuoteSnapshot, Sparklines};
use crate::core::universe::{SymbolUniverse, dedupe};

pub struct MarketService {
    aggregator: QuoteAggregator,
    quotes: Cache<Vec<Quote>>,
    history: Cache<HistorySeries>,
    clock: Arc<dyn Clock>,
    /// Trading time a daily request budget has to last.
    session: Duration,
}

impl MarketService {
    pub fn new(aggregator: QuoteAggregator, policy: TtlPolicy, clock: Arc<dyn Clock>) -> Self {
        MarketService {
            aggregator,
            quotes: Cache::new(policy, clock.clone()),
            history: Cache::new(policy, clock.clone()),
            clock,
            session: MarketHours::default().session_length(),
        }
    }

    pub fn with_session_length(mut self, session: Duration) -> Self {
        self.session = session;
        self
    }

    /// Wires `routes` with the TTL policy and market hours from `config`.
    /// The TTL policy follows the strictest quota among the routed providers.
    pub fn from_config(
        config: &AppConfig,
        routes: ProviderRoutes,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let policy = TtlPolicy::for_tier(routes.quota_tier())
            .with_overrides(config.cache.quotes_ttl(), config.cache.history_ttl());
        let session = config.market_hours.to_market_hours()?.session_length();
        debug!(tier = ?routes.quota_tier(), ?policy, ?session, "Cache policy selected");
        Ok(Self::new(QuoteAggregator::new(routes), policy, clock).with_session_length(session))
    }

    pub fn ttl_policy(&self) -> TtlPolicy {
        self.quotes.policy()
    }

    /// Quote TTL for one refresh of `symbols`: the policy TTL, stretched so
    /// that every capped provider's daily budget lasts the session.
    pub fn quote_ttl(&self, symbols: &[String]) -> Duration {
        self.aggregator
            .refresh_costs(symbols)
            .into_iter()
            .map(|(budget, credits)| TtlPolicy::budget_ttl(budget, credits, self.session))
            .fold(self.quotes.policy().quotes, Duration::max)
    }

    /// Quotes for every symbol of `universe`, keyed in group order.
    ///
    /// A refresh in which no symbol could be priced counts as failed: stale
    /// data is served when there is some, otherwise the error surfaces. A
    /// partial refresh keeps the previous quote for every symbol it could
    /// not price.
    pub async fn get_quotes(
        &self,
        universe: &SymbolUniverse,
    ) -> Result<QuoteSnapshot, MarketDataError> {
        let symbols = universe.all_symbols();
        let key = CacheKey::quotes(&symbols);
        let ttl = self.quote_ttl(&symbols);

        let mut quotes = self
            .quotes
            .refresh_or_serve_stale_with_ttl(key.clone(), ttl, || async {
                let quotes = self.aggregator.get_quotes(&symbols).await;
                if !quotes.is_empty() && quotes.iter().all(Quote::is_placeholder) {
                    return Err(MarketDataError::AllProvidersFailed);
                }
                let previous = self.quotes.peek(&key).await.unwrap_or_default();
                Ok(keep_priced(quotes, previous))
            })
            .await?;

        // Providers without a display name echo the symbol back.
        for quote in quotes.iter_mut() {
            if !quote.is_placeholder() && quote.name == quote.symbol {
                if let Some(name) = universe.name_of(&quote.symbol) {
                    quote.name = name.to_string();
                }
            }
        }

        let timestamp = self
            .quotes
            .fetched_at(&key)
            .await
            .unwrap_or_else(|| self.clock.now());
        Ok(QuoteSnapshot::new(quotes, timestamp))
    }

    /// Closing prices for `symbol`, oldest first.
    pub async fn get_history(&self, symbol: &str) -> Result<HistorySeries, MarketDataError> {
        self.history
            .refresh_or_serve_stale(CacheKey::history(symbol), || {
                self.aggregator.get_history(symbol)
            })
            .await
    }

    /// History per index symbol. A symbol whose history cannot be obtained
    /// gets an empty series.
    pub async fn get_sparklines(&self, index_symbols: &[String]) -> Sparklines {
        let symbols = dedupe(index_symbols);
        let series = join_all(symbols.iter().map(|s| self.get_history(s))).await;

        Sparklines(
            symbols
                .into_iter()
                .zip(series)
                .map(|(symbol, result)| match result {
                    Ok(history) => (symbol, history),
                    Err(e) => {
                        warn!(%symbol, error = %e, "No sparkline data");
                        (symbol, Vec::new())
                    }
                })
                .collect(),
        )
    }
}

/// Replaces placeholders in `fresh` with the previous priced quote, if any.
fn keep_priced(fresh: Vec<Quote>, previous: Vec<Quote>) -> Vec<Quote> {
    let mut previous: HashMap<String, Quote> = previous
        .into_iter()
        .filter(|q| !q.is_placeholder())
        .map(|q| (q.symbol.clone(), q))
        .collect();
    fresh
        .into_iter()
        .map(|quote| match quote.is_placeholder() {
            true => match previous.remove(&quote.symbol) {
                Some(kept) => {
                    warn!(symbol = %quote.symbol, "No fresh quote, keeping previous");
                    kept
                }
                None => quote,
            },
            false => quote,
        })
        .collect()
}
