//! Symbol classification and per-provider symbol spelling.
//!
//! Canonical symbols use the spelling of the tracked-symbol sheet
//! (`^GSPC`, `BRK-B`, ...). Each provider may want a different spelling,
//! so adapters translate on the way out and back on the way in.

use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Leading character that marks an index in canonical spelling.
pub const INDEX_MARKER: char = '^';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentClass {
    Index,
    Equity,
}

impl Display for InstrumentClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstrumentClass::Index => write!(f, "index"),
            InstrumentClass::Equity => write!(f, "equity"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum ProviderId {
    Yahoo,
    TwelveData,
    AlphaVantage,
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ProviderId::Yahoo => "YAHOO",
                ProviderId::TwelveData => "TWELVE_DATA",
                ProviderId::AlphaVantage => "ALPHA_VANTAGE",
            }
        )
    }
}

// (canonical, provider) pairs
const TWELVE_DATA_SYMBOLS: &[(&str, &str)] = &[
    ("^GSPC", "SPX"),
    ("^DJI", "DJI"),
    ("^IXIC", "IXIC"),
    ("^NDX", "NDX"),
    ("^RUT", "RUT"),
    ("^VIX", "VIX"),
    ("BRK-B", "BRK.B"),
    ("BF-B", "BF.B"),
];

const ALPHA_VANTAGE_SYMBOLS: &[(&str, &str)] = &[("BRK-B", "BRK.B"), ("BF-B", "BF.B")];

/// Stateless translator between canonical and provider spellings.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymbolRouter;

impl SymbolRouter {
    pub fn new() -> Self {
        SymbolRouter
    }

    pub fn classify(&self, symbol: &str) -> InstrumentClass {
        if symbol.starts_with(INDEX_MARKER) {
            InstrumentClass::Index
        } else {
            InstrumentClass::Equity
        }
    }

    pub fn to_provider_symbol(&self, provider: ProviderId, symbol: &str) -> String {
        Self::table(provider)
            .iter()
            .find(|(canonical, _)| *canonical == symbol)
            .map_or_else(|| symbol.to_string(), |(_, native)| native.to_string())
    }

    pub fn from_provider_symbol(&self, provider: ProviderId, provider_symbol: &str) -> String {
        Self::table(provider)
            .iter()
            .find(|(_, native)| *native == provider_symbol)
            .map_or_else(
                || provider_symbol.to_string(),
                |(canonical, _)| canonical.to_string(),
            )
    }

    fn table(provider: ProviderId) -> &'static [(&'static str, &'static str)] {
        match provider {
            ProviderId::Yahoo => &[],
            ProviderId::TwelveData => TWELVE_DATA_SYMBOLS,
            ProviderId::AlphaVantage => ALPHA_VANTAGE_SYMBOLS,
        }
    }
}
