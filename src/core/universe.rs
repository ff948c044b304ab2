//! The tracked-symbol universe and where it comes from.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::core::error::MarketDataError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedSymbol {
    pub symbol: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
}

impl TrackedSymbol {
    pub fn new(symbol: &str, name: &str) -> Self {
        TrackedSymbol {
            symbol: symbol.to_string(),
            name: name.to_string(),
            industry: None,
        }
    }
}

/// Symbols to track, split into display groups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolUniverse {
    #[serde(default)]
    pub watchlist: Vec<TrackedSymbol>,
    #[serde(default)]
    pub sectors: Vec<TrackedSymbol>,
    #[serde(default)]
    pub indices: Vec<TrackedSymbol>,
    #[serde(default, alias = "ranked_picks", alias = "zacksRankOne")]
    pub ranked_picks: Vec<TrackedSymbol>,
}

impl SymbolUniverse {
    /// Static default used whenever the external sheet is unavailable.
    pub fn builtin() -> Self {
        SymbolUniverse {
            watchlist: vec![
                TrackedSymbol::new("AAPL", "Apple Inc."),
                TrackedSymbol::new("MSFT", "Microsoft Corp."),
                TrackedSymbol::new("NVDA", "NVIDIA Corp."),
                TrackedSymbol::new("GOOGL", "Alphabet Inc."),
                TrackedSymbol::new("AMZN", "Amazon.com Inc."),
                TrackedSymbol::new("META", "Meta Platforms Inc."),
                TrackedSymbol::new("TSLA", "Tesla Inc."),
            ],
            sectors: vec![
                TrackedSymbol::new("XLK", "Technology"),
                TrackedSymbol::new("XLF", "Financials"),
                TrackedSymbol::new("XLE", "Energy"),
                TrackedSymbol::new("XLV", "Health Care"),
                TrackedSymbol::new("XLI", "Industrials"),
                TrackedSymbol::new("XLY", "Consumer Discretionary"),
                TrackedSymbol::new("XLP", "Consumer Staples"),
                TrackedSymbol::new("XLRE", "Real Estate"),
            ],
            indices: vec![
                TrackedSymbol::new("^GSPC", "S&P 500"),
                TrackedSymbol::new("^DJI", "Dow Jones"),
                TrackedSymbol::new("^IXIC", "Nasdaq"),
            ],
            ranked_picks: vec![],
        }
    }

    /// Display groups in dashboard order.
    pub fn groups(&self) -> [(&'static str, &[TrackedSymbol]); 4] {
        [
            ("Indices", self.indices.as_slice()),
            ("Watchlist", self.watchlist.as_slice()),
            ("Sectors", self.sectors.as_slice()),
            ("Ranked Picks", self.ranked_picks.as_slice()),
        ]
    }

    /// Every tracked symbol once, in group order.
    pub fn all_symbols(&self) -> Vec<String> {
        dedupe(
            self.groups()
                .into_iter()
                .flat_map(|(_, group)| group.iter().map(|s| s.symbol.as_str())),
        )
    }

    pub fn index_symbols(&self) -> Vec<String> {
        dedupe(self.indices.iter().map(|s| s.symbol.as_str()))
    }

    pub fn name_of(&self, symbol: &str) -> Option<&str> {
        self.groups()
            .into_iter()
            .flat_map(|(_, group)| group.iter())
            .find(|s| s.symbol == symbol)
            .map(|s| s.name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.groups().iter().all(|(_, group)| group.is_empty())
    }
}

/// Drops repeated symbols, keeping the first occurrence.
pub fn dedupe<I, S>(symbols: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for symbol in symbols {
        let symbol: &str = symbol.as_ref();
        if seen.insert(symbol.to_string()) {
            unique.push(symbol.to_string());
        }
    }
    unique
}

/// Supplies the symbol universe. Implementations fail closed.
#[async_trait]
pub trait UniverseSource: Send + Sync {
    async fn resolve_symbol_universe(&self) -> Result<SymbolUniverse, MarketDataError>;
}

pub struct StaticUniverseSource {
    universe: SymbolUniverse,
}

impl StaticUniverseSource {
    pub fn new(universe: SymbolUniverse) -> Self {
        Self { universe }
    }
}

#[async_trait]
impl UniverseSource for StaticUniverseSource {
    async fn resolve_symbol_universe(&self) -> Result<SymbolUniverse, MarketDataError> {
        Ok(self.universe.clone())
    }
}

/// Resolves from `source`, falling back to `fallback` on any failure.
pub async fn resolve_or_default(
    source: Option<&dyn UniverseSource>,
    fallback: &SymbolUniverse,
) -> SymbolUniverse {
    let Some(source) = source else {
        debug!("No universe source configured, using default universe");
        return fallback.clone();
    };

    match source.resolve_symbol_universe().await {
        Ok(universe) if !universe.is_empty() => universe,
        Ok(_) => {
            warn!("Universe source returned no symbols, using default universe");
            fallback.clone()
        }
        Err(e) => {
            warn!(error = %e, "Universe source unavailable, using default universe");
            fallback.clone()
        }
    }
}
