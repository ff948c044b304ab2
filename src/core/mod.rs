//! Core market data logic: routing, aggregation, caching and configuration

pub mod aggregator;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod log;
pub mod market_hours;
pub mod quote;
pub mod service;
pub mod symbol;
pub mod universe;

// Re-export main types for cleaner imports
pub use error::MarketDataError;
pub use quote::{HistorySeries, MarketState, Quote, QuoteProvider, QuoteSnapshot, Sparklines};
pub use service::MarketService;
pub use universe::{SymbolUniverse, UniverseSource};
