//! Builds the provider routes from configuration.

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::aggregator::ProviderRoutes;
use crate::core::clock::Clock;
use crate::core::config::AppConfig;
use crate::core::quote::QuoteProvider;
use crate::core::symbol::{InstrumentClass, ProviderId};
use crate::providers::alpha_vantage::AlphaVantageProvider;
use crate::providers::rate_limiter::{RateLimit, RateLimiter};
use crate::providers::twelve_data::TwelveDataProvider;
use crate::providers::yahoo_finance::YahooFinanceProvider;

/// Active providers for the keys and flags in `config`.
///
/// Index: Twelve Data when keyed. Equity: Alpha Vantage when keyed.
/// Generic order: Twelve Data when keyed, then Yahoo when the local
/// fallback is enabled.
pub fn build_routes(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<ProviderRoutes> {
    let providers = &config.providers;
    let retry = providers.retry_policy();
    let max_wait = providers.max_rate_wait();
    let mut routes = ProviderRoutes::new();

    if let Some(key) = providers.twelve_data_key() {
        let td = &providers.twelve_data;
        let limiter = RateLimiter::new(
            ProviderId::TwelveData,
            &[
                RateLimit::per_minute(td.requests_per_minute),
                RateLimit::per_day(td.requests_per_day),
            ],
            max_wait,
        );
        let provider: Arc<dyn QuoteProvider> =
            Arc::new(TwelveDataProvider::new(&td.base_url, key, limiter, retry)?);
        routes = routes
            .with_specialized(InstrumentClass::Index, provider.clone())
            .with_generic(provider);
        debug!("Twelve Data enabled for indices");
    }

    if let Some(key) = providers.alpha_vantage_key() {
        let av = &providers.alpha_vantage;
        let limiter = RateLimiter::new(
            ProviderId::AlphaVantage,
            &[
                RateLimit::per_minute(av.requests_per_minute),
                RateLimit::per_day(av.requests_per_day),
            ],
            max_wait,
        );
        let hours = config.market_hours.to_market_hours()?;
        let provider =
            AlphaVantageProvider::new(&av.base_url, key, limiter, retry, hours, clock.clone())?;
        routes = routes.with_specialized(InstrumentClass::Equity, Arc::new(provider));
        debug!("Alpha Vantage enabled for equities");
    }

    if providers.local_fallback {
        let provider = YahooFinanceProvider::new(&providers.yahoo.base_url, retry, clock)?;
        routes = routes.with_generic(Arc::new(provider));
    }

    if routes.is_empty() {
        warn!("No quote provider configured, every quote will be a placeholder");
    }
    Ok(routes)
}
