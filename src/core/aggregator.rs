//! Routes symbols to providers and merges their answers into one list.
//!
//! Routing precedence per instrument class: the specialized provider for the
//! class if one is configured and capable, otherwise the first capable
//! generic provider in configuration order.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::error::MarketDataError;
use crate::core::quote::{HistorySeries, QuotaTier, Quote, QuoteProvider};
use crate::core::symbol::{InstrumentClass, SymbolRouter};
use crate::core::universe::dedupe;

#[derive(Default, Clone)]
pub struct ProviderRoutes {
    specialized: HashMap<InstrumentClass, Arc<dyn QuoteProvider>>,
    generic: Vec<Arc<dyn QuoteProvider>>,
}

impl ProviderRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_specialized(
        mut self,
        class: InstrumentClass,
        provider: Arc<dyn QuoteProvider>,
    ) -> Self {
        self.specialized.insert(class, provider);
        self
    }

    pub fn with_generic(mut self, provider: Arc<dyn QuoteProvider>) -> Self {
        self.generic.push(provider);
        self
    }

    pub fn resolve(&self, class: InstrumentClass) -> Option<Arc<dyn QuoteProvider>> {
        self.specialized
            .get(&class)
            .filter(|p| p.supports(class))
            .or_else(|| self.generic.iter().find(|p| p.supports(class)))
            .cloned()
    }

    /// Strictest quota among the providers that can actually be routed to.
    pub fn quota_tier(&self) -> QuotaTier {
        [InstrumentClass::Index, InstrumentClass::Equity]
            .into_iter()
            .filter_map(|class| self.resolve(class))
            .map(|p| p.quota_tier())
            .max()
            .unwrap_or(QuotaTier::Unlimited)
    }

    pub fn is_empty(&self) -> bool {
        self.specialized.is_empty() && self.generic.is_empty()
    }
}

pub struct QuoteAggregator {
    router: SymbolRouter,
    routes: ProviderRoutes,
}

impl QuoteAggregator {
    pub fn new(routes: ProviderRoutes) -> Self {
        QuoteAggregator {
            router: SymbolRouter::new(),
            routes,
        }
    }

    pub fn routes(&self) -> &ProviderRoutes {
        &self.routes
    }

    /// Distinct symbols grouped by the provider that serves them, in
    /// first-seen order. Symbols no provider can serve are left out.
    fn partition(&self, symbols: &[String]) -> Vec<(Arc<dyn QuoteProvider>, Vec<String>)> {
        let mut partitions: Vec<(Arc<dyn QuoteProvider>, Vec<String>)> = Vec::new();
        for symbol in dedupe(symbols) {
            let class = self.router.classify(&symbol);
            let Some(provider) = self.routes.resolve(class) else {
                warn!(%symbol, %class, "No provider for instrument class");
                continue;
            };
            match partitions.iter_mut().find(|(p, _)| p.id() == provider.id()) {
                Some((_, batch)) => batch.push(symbol),
                None => partitions.push((provider, vec![symbol])),
            }
        }
        partitions
    }

    /// `(daily budget, credits)` for every capped provider one refresh of
    /// `symbols` would draw on.
    pub fn refresh_costs(&self, symbols: &[String]) -> Vec<(u32, usize)> {
        self.partition(symbols)
            .into_iter()
            .filter_map(|(provider, batch)| provider.daily_budget().map(|b| (b, batch.len())))
            .collect()
    }

    /// One quote per distinct input symbol, in input order.
    ///
    /// Never fails: anything no provider could price comes back as a
    /// placeholder.
    pub async fn get_quotes(&self, symbols: &[String]) -> Vec<Quote> {
        let partitions = self.partition(symbols);
        let symbols = dedupe(symbols);

        let results = join_all(partitions.iter().map(|(provider, batch)| async move {
            debug!(provider = %provider.id(), count = batch.len(), "Dispatching partition");
            (provider.id(), batch, provider.fetch_quotes(batch).await)
        }))
        .await;

        let mut priced: HashMap<String, Quote> = HashMap::new();
        for (provider, batch, result) in results {
            match result {
                Ok(quotes) => {
                    for quote in quotes {
                        if batch.contains(&quote.symbol) {
                            priced.insert(quote.symbol.clone(), quote);
                        }
                    }
                }
                Err(e) => {
                    warn!(%provider, error = %e, count = batch.len(), "Provider failed, using placeholders");
                }
            }
        }

        symbols
            .iter()
            .map(|s| priced.remove(s).unwrap_or_else(|| Quote::placeholder(s)))
            .collect()
    }

    pub async fn get_history(&self, symbol: &str) -> Result<HistorySeries, MarketDataError> {
        let class = self.router.classify(symbol);
        match self.routes.resolve(class) {
            Some(provider) => provider.fetch_history(symbol).await,
            None => Err(MarketDataError::AllProvidersFailed),
        }
    }

    pub fn quota_tier(&self) -> QuotaTier {
        self.routes.quota_tier()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::quote::MarketState;
    use crate::core::symbol::ProviderId;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider double that prices every symbol at 100 and records requests.
    pub(crate) struct MockProvider {
        pub id: ProviderId,
        pub classes: Vec<InstrumentClass>,
        pub tier: QuotaTier,
        pub budget: Option<u32>,
        pub fail: bool,
        pub state: MarketState,
        pub quote_calls: AtomicUsize,
        pub history_calls: AtomicUsize,
        pub requests: Mutex<Vec<Vec<String>>>,
    }

    impl MockProvider {
        pub(crate) fn new(id: ProviderId, classes: &[InstrumentClass]) -> Self {
            MockProvider {
                id,
                classes: classes.to_vec(),
                tier: QuotaTier::Unlimited,
                budget: None,
                fail: false,
                state: MarketState::Closed,
                quote_calls: AtomicUsize::new(0),
                history_calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing(id: ProviderId, classes: &[InstrumentClass]) -> Self {
            MockProvider {
                fail: true,
                ..Self::new(id, classes)
            }
        }

        pub(crate) fn requested(&self) -> Vec<Vec<String>> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl QuoteProvider for MockProvider {
        fn id(&self) -> ProviderId {
            self.id
        }

        fn supports(&self, class: InstrumentClass) -> bool {
            self.classes.contains(&class)
        }

        fn quota_tier(&self) -> QuotaTier {
            self.tier
        }

        fn daily_budget(&self) -> Option<u32> {
            self.budget
        }

        async fn fetch_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, MarketDataError> {
            self.quote_calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(symbols.to_vec());
            if self.fail {
                return Err(MarketDataError::ProviderError {
                    provider: self.id,
                    message: "down".to_string(),
                });
            }
            Ok(symbols
                .iter()
                .map(|s| Quote {
                    symbol: s.clone(),
                    name: format!("{s} ({})", self.id),
                    price: 100.0,
                    change: 1.0,
                    change_percent: 1.0,
                    previous_close: 99.0,
                    market_state: self.state,
                })
                .collect())
        }

        async fn fetch_history(&self, _symbol: &str) -> Result<HistorySeries, MarketDataError> {
            self.history_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(MarketDataError::ProviderError {
                    provider: self.id,
                    message: "down".to_string(),
                });
            }
            Ok(vec![1.0, 2.0, 3.0])
        }
    }

    const BOTH: &[InstrumentClass] = &[InstrumentClass::Index, InstrumentClass::Equity];

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_totality_and_order_with_duplicates() {
        let local = Arc::new(MockProvider::new(ProviderId::Yahoo, BOTH));
        let aggregator = QuoteAggregator::new(ProviderRoutes::new().with_generic(local.clone()));

        let quotes = aggregator
            .get_quotes(&symbols(&["MSFT", "^GSPC", "AAPL", "MSFT", "^GSPC"]))
            .await;

        let returned: Vec<_> = quotes.iter().map(|q| q.symbol.as_str()).collect();
        assert_eq!(returned, vec!["MSFT", "^GSPC", "AAPL"]);
        // One physical request naming each symbol once.
        assert_eq!(local.requested(), vec![symbols(&["MSFT", "^GSPC", "AAPL"])]);
    }

    #[tokio::test]
    async fn test_specialized_first_then_generic() {
        let index = Arc::new(MockProvider::new(ProviderId::TwelveData, BOTH));
        let equity = Arc::new(MockProvider::new(
            ProviderId::AlphaVantage,
            &[InstrumentClass::Equity],
        ));
        let local = Arc::new(MockProvider::new(ProviderId::Yahoo, BOTH));
        let routes = ProviderRoutes::new()
            .with_specialized(InstrumentClass::Index, index.clone())
            .with_specialized(InstrumentClass::Equity, equity.clone())
            .with_generic(local.clone());
        let aggregator = QuoteAggregator::new(routes);

        let quotes = aggregator
            .get_quotes(&symbols(&["AAPL", "^GSPC", "XLK", "^DJI"]))
            .await;

        assert_eq!(index.requested(), vec![symbols(&["^GSPC", "^DJI"])]);
        assert_eq!(equity.requested(), vec![symbols(&["AAPL", "XLK"])]);
        assert_eq!(local.quote_calls.load(Ordering::SeqCst), 0);
        assert_eq!(quotes[0].name, "AAPL (ALPHA_VANTAGE)");
        assert_eq!(quotes[1].name, "^GSPC (TWELVE_DATA)");
    }

    #[tokio::test]
    async fn test_generic_serves_class_without_specialist() {
        let equity = Arc::new(MockProvider::new(
            ProviderId::AlphaVantage,
            &[InstrumentClass::Equity],
        ));
        let local = Arc::new(MockProvider::new(ProviderId::Yahoo, BOTH));
        let routes = ProviderRoutes::new()
            .with_specialized(InstrumentClass::Equity, equity.clone())
            .with_generic(local.clone());

        let resolved = routes.resolve(InstrumentClass::Index).unwrap();
        assert_eq!(resolved.id(), ProviderId::Yahoo);

        // A specialist that cannot serve its class is skipped.
        let routes = ProviderRoutes::new()
            .with_specialized(InstrumentClass::Index, equity)
            .with_generic(local);
        assert_eq!(
            routes.resolve(InstrumentClass::Index).unwrap().id(),
            ProviderId::Yahoo
        );
    }

    #[tokio::test]
    async fn test_every_provider_failing_yields_placeholders() {
        let index = Arc::new(MockProvider::failing(ProviderId::TwelveData, BOTH));
        let local = Arc::new(MockProvider::failing(ProviderId::Yahoo, BOTH));
        let routes = ProviderRoutes::new()
            .with_specialized(InstrumentClass::Index, index)
            .with_generic(local);
        let aggregator = QuoteAggregator::new(routes);

        let input = symbols(&["^GSPC", "AAPL", "MSFT"]);
        let quotes = aggregator.get_quotes(&input).await;

        assert_eq!(quotes.len(), 3);
        for (quote, symbol) in quotes.iter().zip(&input) {
            assert_eq!(&quote.symbol, symbol);
            assert_eq!(&quote.name, symbol);
            assert_eq!(quote.price, 0.0);
            assert_eq!(quote.change, 0.0);
            assert_eq!(quote.change_percent, 0.0);
            assert_eq!(quote.market_state, MarketState::Unknown);
        }
    }

    #[tokio::test]
    async fn test_one_failing_partition_does_not_block_the_other() {
        let index = Arc::new(MockProvider::failing(ProviderId::TwelveData, BOTH));
        let local = Arc::new(MockProvider::new(ProviderId::Yahoo, BOTH));
        let routes = ProviderRoutes::new()
            .with_specialized(InstrumentClass::Index, index)
            .with_generic(local);
        let aggregator = QuoteAggregator::new(routes);

        let quotes = aggregator.get_quotes(&symbols(&["^GSPC", "AAPL"])).await;
        assert!(quotes[0].is_placeholder());
        assert_eq!(quotes[1].price, 100.0);
    }

    #[tokio::test]
    async fn test_no_routes_yields_placeholders() {
        let aggregator = QuoteAggregator::new(ProviderRoutes::new());
        let quotes = aggregator.get_quotes(&symbols(&["AAPL"])).await;
        assert_eq!(quotes.len(), 1);
        assert!(quotes[0].is_placeholder());
        assert!(matches!(
            aggregator.get_history("AAPL").await,
            Err(MarketDataError::AllProvidersFailed)
        ));
    }

    #[tokio::test]
    async fn test_history_routes_by_class() {
        let index = Arc::new(MockProvider::new(ProviderId::TwelveData, BOTH));
        let local = Arc::new(MockProvider::new(ProviderId::Yahoo, BOTH));
        let routes = ProviderRoutes::new()
            .with_specialized(InstrumentClass::Index, index.clone())
            .with_generic(local.clone());
        let aggregator = QuoteAggregator::new(routes);

        assert_eq!(aggregator.get_history("^GSPC").await.unwrap(), vec![1.0, 2.0, 3.0]);
        aggregator.get_history("AAPL").await.unwrap();
        assert_eq!(index.history_calls.load(Ordering::SeqCst), 1);
        assert_eq!(local.history_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_quota_tier_is_strictest_routed() {
        let mut daily = MockProvider::new(ProviderId::AlphaVantage, &[InstrumentClass::Equity]);
        daily.tier = QuotaTier::Daily;
        let routes = ProviderRoutes::new()
            .with_specialized(InstrumentClass::Equity, Arc::new(daily))
            .with_generic(Arc::new(MockProvider::new(ProviderId::Yahoo, BOTH)));
        assert_eq!(routes.quota_tier(), QuotaTier::Daily);
        assert_eq!(ProviderRoutes::new().quota_tier(), QuotaTier::Unlimited);
    }

    #[test]
    fn test_refresh_costs_count_capped_partitions() {
        let mut equity = MockProvider::new(ProviderId::AlphaVantage, &[InstrumentClass::Equity]);
        equity.budget = Some(25);
        let routes = ProviderRoutes::new()
            .with_specialized(InstrumentClass::Equity, Arc::new(equity))
            .with_generic(Arc::new(MockProvider::new(ProviderId::Yahoo, BOTH)));
        let aggregator = QuoteAggregator::new(routes);

        let costs = aggregator.refresh_costs(&symbols(&["^GSPC", "AAPL", "MSFT", "AAPL"]));
        assert_eq!(costs, vec![(25, 2)]);
    }
}
