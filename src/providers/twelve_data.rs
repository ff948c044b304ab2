//! Twelve Data: accurate index quotes behind a small per-minute credit budget.
//!
//! One credit per symbol. Quotes are batched as `/quote?symbol=A,B,C`, never
//! more symbols per request than the per-minute ceiling allows.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, instrument, warn};

use crate::core::error::MarketDataError;
use crate::core::quote::{HistorySeries, MarketState, QuotaTier, Quote, QuoteProvider};
use crate::core::symbol::{InstrumentClass, ProviderId, SymbolRouter};
use crate::providers::rate_limiter::RateLimiter;
use crate::providers::util::{
    RetryPolicy, build_url, collect_symbol_results, fail_all, get_json, http_client, with_retry,
};

pub const HISTORY_POINTS: usize = 40;

const PROVIDER: ProviderId = ProviderId::TwelveData;
const DEFAULT_BATCH: usize = 8;

pub struct TwelveDataProvider {
    base_url: String,
    api_key: String,
    client: Client,
    router: SymbolRouter,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl TwelveDataProvider {
    pub fn new(
        base_url: &str,
        api_key: &str,
        limiter: RateLimiter,
        retry: RetryPolicy,
    ) -> Result<Self, MarketDataError> {
        Ok(TwelveDataProvider {
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            client: http_client()?,
            router: SymbolRouter::new(),
            limiter,
            retry,
        })
    }

    fn batch_size(&self) -> usize {
        self.limiter
            .max_batch()
            .map_or(DEFAULT_BATCH, |n| n.max(1) as usize)
    }

    async fn request(
        &self,
        path: &str,
        params: &[(&str, &str)],
        label: &str,
    ) -> Result<Value, MarketDataError> {
        let mut params = params.to_vec();
        params.push(("apikey", self.api_key.as_str()));
        let url = build_url(PROVIDER, &self.base_url, path, &params)?;
        with_retry(
            || get_json(&self.client, PROVIDER, url.clone(), label),
            self.retry.retries,
            self.retry.delay_ms,
        )
        .await
    }

    async fn fetch_batch(
        &self,
        symbols: &[String],
    ) -> Vec<(String, Result<Quote, MarketDataError>)> {
        let natives: Vec<String> = symbols
            .iter()
            .map(|s| self.router.to_provider_symbol(PROVIDER, s))
            .collect();
        let joined = natives.join(",");

        if let Err(e) = self.limiter.acquire(symbols.len() as u32).await {
            return fail_all(PROVIDER, symbols, e);
        }

        let body = match self
            .request("/quote", &[("symbol", joined.as_str())], &joined)
            .await
        {
            Ok(body) => body,
            Err(e) => return fail_all(PROVIDER, symbols, e),
        };

        let items = match split_batch(body, &natives) {
            Ok(items) => items,
            Err(e) => return fail_all(PROVIDER, symbols, e),
        };
        // Keys come back in Twelve Data spelling.
        let mut items: HashMap<String, QuoteItem> = items
            .into_iter()
            .map(|(native, item)| (self.router.from_provider_symbol(PROVIDER, &native), item))
            .collect();

        symbols
            .iter()
            .map(|symbol| {
                let result = match items.remove(symbol) {
                    Some(item) => to_quote(symbol, item),
                    None => Err(MarketDataError::SymbolNotFound(symbol.clone())),
                };
                (symbol.clone(), result)
            })
            .collect()
    }
}

#[derive(Deserialize, Debug)]
struct ApiError {
    code: u16,
    message: String,
}

impl ApiError {
    fn into_error(self, symbol: &str) -> MarketDataError {
        match self.code {
            429 => MarketDataError::RateLimited { provider: PROVIDER },
            400 | 404 => MarketDataError::SymbolNotFound(symbol.to_string()),
            code => MarketDataError::ProviderError {
                provider: PROVIDER,
                message: format!("{code}: {}", self.message),
            },
        }
    }
}

#[derive(Deserialize, Debug)]
struct QuoteData {
    name: Option<String>,
    close: String,
    change: Option<String>,
    percent_change: Option<String>,
    previous_close: Option<String>,
    is_market_open: Option<bool>,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum QuoteItem {
    Error(ApiError),
    Quote(QuoteData),
}

#[derive(Deserialize, Debug)]
struct SeriesValue {
    close: String,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum SeriesResponse {
    Error(ApiError),
    Series { values: Vec<SeriesValue> },
}

fn malformed(message: String) -> MarketDataError {
    MarketDataError::MalformedResponse {
        provider: PROVIDER,
        message,
    }
}

fn is_error_object(value: &Value) -> bool {
    value.get("status").and_then(Value::as_str) == Some("error")
}

/// A single symbol comes back as one object, several as a map keyed by
/// the requested symbols. An error object in place of the map fails the
/// whole batch.
fn split_batch(
    body: Value,
    natives: &[String],
) -> Result<HashMap<String, QuoteItem>, MarketDataError> {
    if natives.len() == 1 {
        let item: QuoteItem =
            serde_json::from_value(body).map_err(|e| malformed(format!("{}: {e}", natives[0])))?;
        return Ok(HashMap::from([(natives[0].clone(), item)]));
    }

    if is_error_object(&body) {
        let error: ApiError =
            serde_json::from_value(body).map_err(|e| malformed(format!("batch error: {e}")))?;
        return Err(error.into_error(&natives.join(",")));
    }

    serde_json::from_value(body).map_err(|e| malformed(format!("batch: {e}")))
}

fn parse_number(symbol: &str, field: &str, raw: &str) -> Result<f64, MarketDataError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| malformed(format!("{symbol}: {field}={raw:?}")))
}

fn parse_optional(symbol: &str, field: &str, raw: Option<&str>) -> Result<f64, MarketDataError> {
    raw.map_or(Ok(0.0), |raw| parse_number(symbol, field, raw))
}

fn to_quote(symbol: &str, item: QuoteItem) -> Result<Quote, MarketDataError> {
    let data = match item {
        QuoteItem::Error(e) => return Err(e.into_error(symbol)),
        QuoteItem::Quote(data) => data,
    };

    Ok(Quote {
        symbol: symbol.to_string(),
        name: data
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| symbol.to_string()),
        price: parse_number(symbol, "close", &data.close)?,
        change: parse_optional(symbol, "change", data.change.as_deref())?,
        change_percent: parse_optional(symbol, "percent_change", data.percent_change.as_deref())?,
        previous_close: parse_optional(symbol, "previous_close", data.previous_close.as_deref())?,
        market_state: if data.is_market_open.unwrap_or(false) {
            MarketState::Regular
        } else {
            MarketState::Closed
        },
    })
}

#[async_trait]
impl QuoteProvider for TwelveDataProvider {
    fn id(&self) -> ProviderId {
        PROVIDER
    }

    fn supports(&self, _class: InstrumentClass) -> bool {
        true
    }

    fn quota_tier(&self) -> QuotaTier {
        QuotaTier::PerMinute
    }

    fn daily_budget(&self) -> Option<u32> {
        self.limiter.daily_limit()
    }

    #[instrument(
        name = "TwelveDataQuoteFetch",
        skip(self, symbols),
        fields(provider = %PROVIDER, count = symbols.len())
    )]
    async fn fetch_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, MarketDataError> {
        let mut results = Vec::with_capacity(symbols.len());
        // Sequential on purpose: each batch waits for its credits.
        for batch in symbols.chunks(self.batch_size()) {
            debug!(size = batch.len(), "Twelve Data batch");
            results.extend(self.fetch_batch(batch).await);
        }
        collect_symbol_results(PROVIDER, results)
    }

    #[instrument(
        name = "TwelveDataHistoryFetch",
        skip(self),
        fields(provider = %PROVIDER, symbol = %symbol)
    )]
    async fn fetch_history(&self, symbol: &str) -> Result<HistorySeries, MarketDataError> {
        let native = self.router.to_provider_symbol(PROVIDER, symbol);
        self.limiter.acquire(1).await?;

        let outputsize = HISTORY_POINTS.to_string();
        let body = self
            .request(
                "/time_series",
                &[
                    ("symbol", native.as_str()),
                    ("interval", "1h"),
                    ("outputsize", outputsize.as_str()),
                ],
                symbol,
            )
            .await?;

        let response: SeriesResponse =
            serde_json::from_value(body).map_err(|e| malformed(format!("{symbol}: {e}")))?;
        let values = match response {
            SeriesResponse::Series { values } => values,
            SeriesResponse::Error(e) => match e.into_error(symbol) {
                MarketDataError::SymbolNotFound(_) => {
                    warn!(%symbol, "No Twelve Data history for symbol");
                    return Ok(Vec::new());
                }
                other => return Err(other),
            },
        };

        // Newest first on the wire.
        let mut closes = values
            .iter()
            .map(|v| parse_number(symbol, "close", &v.close))
            .collect::<Result<Vec<_>, _>>()?;
        closes.reverse();
        closes.retain(|c| *c != 0.0);
        Ok(closes)
    }
}
