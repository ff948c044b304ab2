//! Quote types and the provider abstraction

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt::Display;

use crate::core::error::MarketDataError;
use crate::core::symbol::{InstrumentClass, ProviderId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketState {
    Regular,
    Closed,
    /// No data could be obtained. Not a market-hours state.
    Unknown,
}

impl Display for MarketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                MarketState::Regular => "REGULAR",
                MarketState::Closed => "CLOSED",
                MarketState::Unknown => "UNKNOWN",
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    pub name: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub previous_close: f64,
    pub market_state: MarketState,
}

impl Quote {
    /// Zero-valued stand-in for a symbol nobody could price.
    pub fn placeholder(symbol: &str) -> Self {
        Quote {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            price: 0.0,
            change: 0.0,
            change_percent: 0.0,
            previous_close: 0.0,
            market_state: MarketState::Unknown,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.market_state == MarketState::Unknown
    }
}

/// Closing prices, oldest first. Empty when unavailable.
pub type HistorySeries = Vec<f64>;

/// True iff any quote trades in the regular session.
pub fn market_open(quotes: &[Quote]) -> bool {
    quotes.iter().any(|q| q.market_state == MarketState::Regular)
}

/// Aggregated result of one quotes refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteSnapshot {
    #[serde(serialize_with = "quotes_as_map")]
    pub quotes: Vec<Quote>,
    pub timestamp: DateTime<Utc>,
    pub market_open: bool,
}

impl QuoteSnapshot {
    pub fn new(quotes: Vec<Quote>, timestamp: DateTime<Utc>) -> Self {
        let market_open = market_open(&quotes);
        QuoteSnapshot {
            quotes,
            timestamp,
            market_open,
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&Quote> {
        self.quotes.iter().find(|q| q.symbol == symbol)
    }
}

// Keeps the request order in the emitted JSON object.
fn quotes_as_map<S: Serializer>(quotes: &[Quote], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_map(quotes.iter().map(|q| (&q.symbol, q)))
}

/// Sparkline series keyed by symbol, in request order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sparklines(pub Vec<(String, HistorySeries)>);

impl Sparklines {
    pub fn get(&self, symbol: &str) -> Option<&HistorySeries> {
        self.0.iter().find(|(s, _)| s == symbol).map(|(_, h)| h)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Sparklines {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(s, h)| (s, h)))
    }
}

/// How tightly a provider's quota constrains refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QuotaTier {
    Unlimited,
    PerMinute,
    Daily,
}

/// One upstream quote source.
///
/// `fetch_quotes` degrades per symbol: a symbol the provider cannot price
/// comes back as [`Quote::placeholder`]. An `Err` means the provider as a
/// whole failed for this batch.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    fn supports(&self, class: InstrumentClass) -> bool;

    fn quota_tier(&self) -> QuotaTier;

    /// Requests per day the provider allows, one credit per symbol, if capped.
    fn daily_budget(&self) -> Option<u32> {
        None
    }

    async fn fetch_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, MarketDataError>;

    /// Returns an empty series for a symbol the provider cannot chart.
    async fn fetch_history(&self, symbol: &str) -> Result<HistorySeries, MarketDataError>;
}
