use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::core::clock::Clock;
use crate::core::error::MarketDataError;
use crate::core::quote::{HistorySeries, MarketState, QuotaTier, Quote, QuoteProvider};
use crate::core::symbol::{InstrumentClass, ProviderId, SymbolRouter};
use crate::providers::rate_limiter::RateLimiter;
use crate::providers::util::{
    RetryPolicy, build_url, collect_symbol_results, get_json, http_client, with_retry,
};


const PROVIDER: ProviderId = ProviderId::Yahoo;

/// Keyless chart API. Best effort: no documented quota, no guarantees.
pub struct YahooFinanceProvider {
    base_url: String,
    client: Client,
    router: SymbolRouter,
    limiter: RateLimiter,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl YahooFinanceProvider {
    pub fn new(
        base_url: &str,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, MarketDataError> {
        Ok(YahooFinanceProvider {
            base_url: base_url.to_string(),
            client: http_client()?,
            router: SymbolRouter::new(),
            limiter: RateLimiter::unlimited(PROVIDER),
            retry,
            clock,
        })
    }

    async fn fetch_chart(
        &self,
        symbol: &str,
        params: &[(&str, &str)],
    ) -> Result<ChartItem, MarketDataError> {
        let native = self.router.to_provider_symbol(PROVIDER, symbol);
        let url = build_url(
            PROVIDER,
            &self.base_url,
            &format!("/v8/finance/chart/{native}"),
            params,
        )?;

        self.limiter.acquire(1).await?;
        let response: ChartResponse = with_retry(
            || get_json(&self.client, PROVIDER, url.clone(), symbol),
            self.retry.retries,
            self.retry.delay_ms,
        )
        .await?;

        if let Some(error) = response.chart.error {
            debug!(%symbol, code = %error.code, "Yahoo chart error");
            return Err(MarketDataError::SymbolNotFound(symbol.to_string()));
        }

        response
            .chart
            .result
            .and_then(|items| items.into_iter().next())
            .ok_or_else(|| MarketDataError::SymbolNotFound(symbol.to_string()))
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        let item = self
            .fetch_chart(symbol, &[("range", "1d"), ("interval", "1d")])
            .await?;
        to_quote(symbol, &item.meta, self.clock.now())
    }
}

#[derive(Deserialize, Debug)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    result: Option<Vec<ChartItem>>,
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    code: String,
}

#[derive(Deserialize, Debug)]
struct ChartItem {
    meta: ChartMeta,
    indicators: Option<Indicators>,
}

#[derive(Deserialize, Debug)]
struct Indicators {
    quote: Vec<IndicatorQuote>,
}

#[derive(Deserialize, Debug)]
struct IndicatorQuote {
    close: Option<Vec<Option<f64>>>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    short_name: Option<String>,
    long_name: Option<String>,
    regular_market_price: Option<f64>,
    previous_close: Option<f64>,
    chart_previous_close: Option<f64>,
    current_trading_period: Option<TradingPeriods>,
}

#[derive(Deserialize, Debug)]
struct TradingPeriods {
    regular: Option<TradingPeriod>,
}

#[derive(Deserialize, Debug)]
struct TradingPeriod {
    start: i64,
    end: i64,
}

fn to_quote(symbol: &str, meta: &ChartMeta, now: DateTime<Utc>) -> Result<Quote, MarketDataError> {
    let price = meta
        .regular_market_price
        .ok_or_else(|| MarketDataError::MalformedResponse {
            provider: PROVIDER,
            message: format!("{symbol}: missing regularMarketPrice"),
        })?;
    let previous_close = meta
        .previous_close
        .or(meta.chart_previous_close)
        .unwrap_or(0.0);
    let (change, change_percent) = if previous_close > 0.0 {
        let change = price - previous_close;
        (change, change / previous_close * 100.0)
    } else {
        (0.0, 0.0)
    };

    let name = meta
        .short_name
        .as_deref()
        .or(meta.long_name.as_deref())
        .filter(|n| !n.is_empty())
        .unwrap_or(symbol)
        .to_string();

    Ok(Quote {
        symbol: symbol.to_string(),
        name,
        price,
        change,
        change_percent,
        previous_close,
        market_state: market_state(meta, now),
    })
}

fn market_state(meta: &ChartMeta, now: DateTime<Utc>) -> MarketState {
    let ts = now.timestamp();
    match meta
        .current_trading_period
        .as_ref()
        .and_then(|p| p.regular.as_ref())
    {
        Some(regular) if ts >= regular.start && ts < regular.end => MarketState::Regular,
        _ => MarketState::Closed,
    }
}

fn closes(item: ChartItem) -> HistorySeries {
    item.indicators
        .and_then(|i| i.quote.into_iter().next())
        .and_then(|q| q.close)
        .unwrap_or_default()
        .into_iter()
        .flatten()
        .filter(|c| *c != 0.0 && c.is_finite())
        .collect()
}

#[async_trait]
impl QuoteProvider for YahooFinanceProvider {
    fn id(&self) -> ProviderId {
        PROVIDER
    }

    fn supports(&self, _class: InstrumentClass) -> bool {
        true
    }

    fn quota_tier(&self) -> QuotaTier {
        QuotaTier::Unlimited
    }

    #[instrument(
        name = "YahooQuoteFetch",
        skip(self, symbols),
        fields(provider = %PROVIDER, count = symbols.len())
    )]
    async fn fetch_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, MarketDataError> {
        let results = join_all(symbols.iter().map(|s| self.fetch_quote(s))).await;
        collect_symbol_results(PROVIDER, symbols.iter().cloned().zip(results).collect())
    }

    #[instrument(
        name = "YahooHistoryFetch",
        skip(self),
        fields(provider = %PROVIDER, symbol = %symbol)
    )]
    async fn fetch_history(&self, symbol: &str) -> Result<HistorySeries, MarketDataError> {
        match self
            .fetch_chart(symbol, &[("range", "5d"), ("interval", "1h")])
            .await
        {
            Ok(item) => Ok(closes(item)),
            Err(MarketDataError::SymbolNotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use chrono::TimeZone;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // 2025-03-03 15:00 UTC, inside the regular session below
    const NOW: i64 = 1_741_014_000;
    const SESSION_START: i64 = 1_741_012_200;
    const SESSION_END: i64 = 1_741_035_600;

    pub async fn create_mock_server(symbol: &str, mock_response: &str) -> MockServer {
        let mock_server = MockServer::start().await;
        let request_path = format!("/v8/finance/chart/{symbol}");

        Mock::given(method("GET"))
            .and(path(request_path))
            .respond_with(ResponseTemplate::new(200).set_body_string(mock_response))
            .mount(&mock_server)
            .await;

        mock_server
    }

    fn provider(uri: &str) -> YahooFinanceProvider {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(NOW, 0).unwrap()));
        let retry = RetryPolicy {
            retries: 0,
            delay_ms: 0,
        };
        YahooFinanceProvider::new(uri, retry, clock).unwrap()
    }

    fn chart_body(price: f64, previous_close: f64, start: i64, end: i64) -> String {
        format!(
            r#"{{
                "chart": {{
                    "result": [{{
                        "meta": {{
                            "symbol": "AAPL",
                            "shortName": "Apple Inc.",
                            "longName": "Apple Inc. Long",
                            "regularMarketPrice": {price},
                            "chartPreviousClose": 1.0,
                            "previousClose": {previous_close},
                            "currentTradingPeriod": {{
                                "regular": {{ "start": {start}, "end": {end}, "timezone": "EST" }}
                            }}
                        }}
                    }}],
                    "error": null
                }}
            }}"#
        )
    }

    #[tokio::test]
    async fn test_successful_quote_fetch() {
        let body = chart_body(110.0, 100.0, SESSION_START, SESSION_END);
        let mock_server = create_mock_server("AAPL", &body).await;

        let quotes = provider(&mock_server.uri())
            .fetch_quotes(&["AAPL".to_string()])
            .await
            .unwrap();

        assert_eq!(quotes.len(), 1);
        let q = &quotes[0];
        assert_eq!(q.symbol, "AAPL");
        assert_eq!(q.name, "Apple Inc.");
        assert_eq!(q.price, 110.0);
        assert_eq!(q.previous_close, 100.0);
        assert!((q.change - 10.0).abs() < 1e-9);
        assert!((q.change_percent - 10.0).abs() < 1e-9);
        assert_eq!(q.market_state, MarketState::Regular);
    }

    #[tokio::test]
    async fn test_quote_outside_session_is_closed() {
        let body = chart_body(110.0, 100.0, SESSION_START - 86_400, SESSION_END - 86_400);
        let mock_server = create_mock_server("AAPL", &body).await;

        let quotes = provider(&mock_server.uri())
            .fetch_quotes(&["AAPL".to_string()])
            .await
            .unwrap();
        assert_eq!(quotes[0].market_state, MarketState::Closed);
    }

    #[tokio::test]
    async fn test_name_falls_back_to_symbol() {
        let body = r#"{"chart": {"result": [{"meta": {"regularMarketPrice": 5.0}}], "error": null}}"#;
        let mock_server = create_mock_server("XLK", body).await;

        let quotes = provider(&mock_server.uri())
            .fetch_quotes(&["XLK".to_string()])
            .await
            .unwrap();
        assert_eq!(quotes[0].name, "XLK");
        assert_eq!(quotes[0].change, 0.0);
        assert_eq!(quotes[0].market_state, MarketState::Closed);
    }

    #[tokio::test]
    async fn test_unknown_symbol_becomes_placeholder() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/AAPL"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(chart_body(110.0, 100.0, SESSION_START, SESSION_END)),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/ZZZZ"))
            .respond_with(ResponseTemplate::new(404).set_body_string(
                r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found"}}}"#,
            ))
            .mount(&mock_server)
            .await;

        let quotes = provider(&mock_server.uri())
            .fetch_quotes(&["ZZZZ".to_string(), "AAPL".to_string()])
            .await
            .unwrap();

        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].symbol, "ZZZZ");
        assert!(quotes[0].is_placeholder());
        assert_eq!(quotes[1].price, 110.0);
    }

    #[tokio::test]
    async fn test_server_error_fails_batch() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let result = provider(&mock_server.uri())
            .fetch_quotes(&["AAPL".to_string(), "MSFT".to_string()])
            .await;
        assert!(matches!(
            result,
            Err(MarketDataError::ProviderError {
                provider: ProviderId::Yahoo,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let mock_server = create_mock_server("AAPL", "not json").await;
        let result = provider(&mock_server.uri())
            .fetch_quotes(&["AAPL".to_string()])
            .await;
        assert!(matches!(
            result,
            Err(MarketDataError::MalformedResponse { .. })
        ));
    }

    #[tokio::test]
    async fn test_history_drops_null_and_zero_closes() {
        let mock_server = MockServer::start().await;
        let body = r#"{
            "chart": {
                "result": [{
                    "meta": { "regularMarketPrice": 104.0 },
                    "timestamp": [1, 2, 3, 4, 5],
                    "indicators": { "quote": [{ "close": [101.0, null, 0.0, 103.5, 104.0] }] }
                }],
                "error": null
            }
        }"#;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/MSFT"))
            .and(query_param("range", "5d"))
            .and(query_param("interval", "1h"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&mock_server)
            .await;

        let history = provider(&mock_server.uri())
            .fetch_history("MSFT")
            .await
            .unwrap();
        assert_eq!(history, vec![101.0, 103.5, 104.0]);
    }

    #[tokio::test]
    async fn test_history_for_unknown_symbol_is_empty() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let history = provider(&mock_server.uri())
            .fetch_history("ZZZZ")
            .await
            .unwrap();
        assert!(history.is_empty());
    }

    #[test]
    fn test_capabilities() {
        let provider = provider("http://localhost");
        assert!(provider.supports(InstrumentClass::Index));
        assert!(provider.supports(InstrumentClass::Equity));
        assert_eq!(provider.quota_tier(), QuotaTier::Unlimited);
        assert_eq!(provider.id(), ProviderId::Yahoo);
    }
}
