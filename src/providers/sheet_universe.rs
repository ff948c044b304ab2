//! Symbol universe maintained in a spreadsheet, read through its CSV export.
//!
//! Expected columns: `group,symbol,name,industry`. Header case is ignored.

use async_trait::async_trait;
use csv::{ReaderBuilder, StringRecord, Trim};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::core::error::MarketDataError;
use crate::core::universe::{SymbolUniverse, TrackedSymbol, UniverseSource};
use crate::providers::util::http_client;

#[derive(Debug, Deserialize)]
struct SheetRow {
    group: String,
    symbol: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    industry: Option<String>,
}

pub struct SheetUniverseSource {
    url: String,
    client: Client,
}

impl SheetUniverseSource {
    pub fn new(url: &str) -> Result<Self, MarketDataError> {
        Ok(SheetUniverseSource {
            url: url.to_string(),
            client: http_client()?,
        })
    }
}

fn universe_error(message: impl Into<String>) -> MarketDataError {
    MarketDataError::Universe(message.into())
}

fn group_of<'a>(universe: &'a mut SymbolUniverse, group: &str) -> Option<&'a mut Vec<TrackedSymbol>> {
    let normalized = group.trim().to_lowercase().replace([' ', '-'], "_");
    match normalized.as_str() {
        "indices" | "index" => Some(&mut universe.indices),
        "watchlist" | "watch_list" => Some(&mut universe.watchlist),
        "sectors" | "sector" => Some(&mut universe.sectors),
        "ranked_picks" | "ranked" | "zacks_rank_one" | "zacksrankone" | "rank_1" => {
            Some(&mut universe.ranked_picks)
        }
        _ => None,
    }
}

/// Parses the CSV export. Fails on malformed CSV and on a sheet without a
/// single usable row.
pub fn parse_sheet(text: &str) -> Result<SymbolUniverse, MarketDataError> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| universe_error(format!("unreadable header: {e}")))?
        .iter()
        .map(str::to_lowercase)
        .collect::<StringRecord>();
    reader.set_headers(headers);

    let mut universe = SymbolUniverse::default();
    for (line, record) in reader.deserialize::<SheetRow>().enumerate() {
        let row = record.map_err(|e| universe_error(format!("row {}: {e}", line + 2)))?;
        if row.symbol.is_empty() {
            continue;
        }
        let Some(group) = group_of(&mut universe, &row.group) else {
            warn!(group = %row.group, symbol = %row.symbol, "Unknown sheet group, skipping row");
            continue;
        };
        let name = row
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| row.symbol.clone());
        group.push(TrackedSymbol {
            symbol: row.symbol,
            name,
            industry: row.industry.filter(|i| !i.is_empty()),
        });
    }

    if universe.is_empty() {
        return Err(universe_error("sheet has no symbols"));
    }
    Ok(universe)
}

#[async_trait]
impl UniverseSource for SheetUniverseSource {
    #[instrument(name = "SheetUniverseFetch", skip(self))]
    async fn resolve_symbol_universe(&self) -> Result<SymbolUniverse, MarketDataError> {
        debug!("Requesting symbol universe sheet");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| universe_error(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(universe_error(format!("HTTP {}", response.status())));
        }

        let text = response
            .text()
            .await
            .map_err(|e| universe_error(format!("unreadable body: {e}")))?;
        parse_sheet(&text)
    }
}
