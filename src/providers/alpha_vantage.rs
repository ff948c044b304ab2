//! Alpha Vantage: equities only, 5 requests a minute and 25 a day on the
//! free tier. Every symbol costs one request, so the caller's cache TTL is
//! what keeps the daily budget alive.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{instrument, warn};

use crate::core::clock::Clock;
use crate::core::error::MarketDataError;
use crate::core::market_hours::MarketHours;
use crate::core::quote::{HistorySeries, MarketState, QuotaTier, Quote, QuoteProvider};
use crate::core::symbol::{InstrumentClass, ProviderId, SymbolRouter};
use crate::providers::rate_limiter::RateLimiter;
use crate::providers::util::{
    RetryPolicy, build_url, collect_symbol_results, get_json, http_client, with_retry,
};

pub const HISTORY_SESSIONS: usize = 30;

const PROVIDER: ProviderId = ProviderId::AlphaVantage;

pub struct AlphaVantageProvider {
    base_url: String,
    api_key: String,
    client: Client,
    router: SymbolRouter,
    limiter: RateLimiter,
    retry: RetryPolicy,
    hours: MarketHours,
    clock: Arc<dyn Clock>,
}

/// Fields shared by every Alpha Vantage payload when something went wrong.
#[derive(Deserialize, Debug, Default)]
struct ApiStatus {
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

impl ApiStatus {
    fn check(&self, symbol: &str) -> Result<(), MarketDataError> {
        if let Some(msg) = &self.error_message {
            if msg.contains("Invalid API call") || msg.contains("not found") {
                return Err(MarketDataError::SymbolNotFound(symbol.to_string()));
            }
            return Err(MarketDataError::ProviderError {
                provider: PROVIDER,
                message: msg.clone(),
            });
        }
        // Both are how the free tier reports a spent quota.
        if let Some(msg) = self.note.as_ref().or(self.information.as_ref()) {
            warn!(%symbol, message = %msg, "Alpha Vantage throttled request");
            return Err(MarketDataError::RateLimited { provider: PROVIDER });
        }
        Ok(())
    }
}

#[derive(Deserialize, Debug)]
struct GlobalQuoteResponse {
    #[serde(flatten)]
    status: ApiStatus,
    #[serde(rename = "Global Quote")]
    global_quote: Option<GlobalQuote>,
}

#[derive(Deserialize, Debug, Default)]
struct GlobalQuote {
    #[serde(rename = "05. price")]
    price: Option<String>,
    #[serde(rename = "07. latest trading day")]
    latest_trading_day: Option<String>,
    #[serde(rename = "08. previous close")]
    previous_close: Option<String>,
    #[serde(rename = "09. change")]
    change: Option<String>,
    #[serde(rename = "10. change percent")]
    change_percent: Option<String>,
}

#[derive(Deserialize, Debug)]
struct DailySeriesResponse {
    #[serde(flatten)]
    status: ApiStatus,
    #[serde(rename = "Time Series (Daily)")]
    series: Option<BTreeMap<String, DailyBar>>,
}

#[derive(Deserialize, Debug)]
struct DailyBar {
    #[serde(rename = "4. close")]
    close: String,
}

fn parse_number(symbol: &str, raw: &str) -> Result<f64, MarketDataError> {
    raw.trim()
        .trim_end_matches('%')
        .parse::<f64>()
        .map_err(|_| MarketDataError::MalformedResponse {
            provider: PROVIDER,
            message: format!("{symbol}: not a number: {raw:?}"),
        })
}

fn parse_optional(symbol: &str, raw: Option<&str>) -> Result<f64, MarketDataError> {
    raw.map_or(Ok(0.0), |raw| parse_number(symbol, raw))
}

impl AlphaVantageProvider {
    pub fn new(
        base_url: &str,
        api_key: &str,
        limiter: RateLimiter,
        retry: RetryPolicy,
        hours: MarketHours,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, MarketDataError> {
        Ok(AlphaVantageProvider {
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            client: http_client()?,
            router: SymbolRouter::new(),
            limiter,
            retry,
            hours,
            clock,
        })
    }

    async fn query<T: serde::de::DeserializeOwned>(
        &self,
        function: &str,
        symbol: &str,
        extra: &[(&str, &str)],
    ) -> Result<T, MarketDataError> {
        let native = self.router.to_provider_symbol(PROVIDER, symbol);
        let mut params = vec![
            ("function", function),
            ("symbol", native.as_str()),
            ("apikey", self.api_key.as_str()),
        ];
        params.extend_from_slice(extra);
        let url = build_url(PROVIDER, &self.base_url, "/query", &params)?;

        self.limiter.acquire(1).await?;
        with_retry(
            || get_json(&self.client, PROVIDER, url.clone(), symbol),
            self.retry.retries,
            self.retry.delay_ms,
        )
        .await
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        let response: GlobalQuoteResponse = self.query("GLOBAL_QUOTE", symbol, &[]).await?;
        response.status.check(symbol)?;

        let quote = response.global_quote.unwrap_or_default();
        // An unknown symbol yields an empty "Global Quote" object.
        let Some(price) = quote.price.as_deref() else {
            return Err(MarketDataError::SymbolNotFound(symbol.to_string()));
        };

        Ok(Quote {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            price: parse_number(symbol, price)?,
            change: parse_optional(symbol, quote.change.as_deref())?,
            change_percent: parse_optional(symbol, quote.change_percent.as_deref())?,
            previous_close: parse_optional(symbol, quote.previous_close.as_deref())?,
            market_state: self.market_state(quote.latest_trading_day.as_deref()),
        })
    }

    /// No session flag on the wire: the quote is live only when it belongs
    /// to today's session and the exchange is open right now.
    fn market_state(&self, latest_trading_day: Option<&str>) -> MarketState {
        let now = self.clock.now();
        let traded_today = latest_trading_day
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .is_some_and(|d| d == self.hours.session_date(now));
        if traded_today && self.hours.is_open(now) {
            MarketState::Regular
        } else {
            MarketState::Closed
        }
    }
}

#[async_trait]
impl QuoteProvider for AlphaVantageProvider {
    fn id(&self) -> ProviderId {
        PROVIDER
    }

    fn supports(&self, class: InstrumentClass) -> bool {
        class == InstrumentClass::Equity
    }

    fn quota_tier(&self) -> QuotaTier {
        QuotaTier::Daily
    }

    fn daily_budget(&self) -> Option<u32> {
        self.limiter.daily_limit()
    }

    #[instrument(
        name = "AlphaVantageQuoteFetch",
        skip(self, symbols),
        fields(provider = %PROVIDER, count = symbols.len())
    )]
    async fn fetch_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, MarketDataError> {
        let mut results = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            results.push((symbol.clone(), self.fetch_quote(symbol).await));
        }
        collect_symbol_results(PROVIDER, results)
    }

    #[instrument(
        name = "AlphaVantageHistoryFetch",
        skip(self),
        fields(provider = %PROVIDER, symbol = %symbol)
    )]
    async fn fetch_history(&self, symbol: &str) -> Result<HistorySeries, MarketDataError> {
        let response: DailySeriesResponse = self
            .query("TIME_SERIES_DAILY", symbol, &[("outputsize", "compact")])
            .await?;

        match response.status.check(symbol) {
            Ok(()) => {}
            Err(MarketDataError::SymbolNotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }

        let Some(series) = response.series else {
            return Ok(Vec::new());
        };

        // ISO dates sort chronologically.
        let closes = series
            .values()
            .map(|bar| parse_number(symbol, &bar.close))
            .collect::<Result<Vec<_>, _>>()?;
        let skip = closes.len().saturating_sub(HISTORY_SESSIONS);
        Ok(closes.into_iter().skip(skip).collect())
    }
}
