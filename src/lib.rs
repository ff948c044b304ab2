pub mod cli;
pub mod core;
pub mod providers;

use crate::core::clock::{Clock, SystemClock};
use crate::core::config::AppConfig;
use crate::core::service::MarketService;
use crate::core::universe::{SymbolUniverse, UniverseSource, resolve_or_default};
use crate::providers::build_routes;
use crate::providers::sheet_universe::SheetUniverseSource;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum AppCommand {
    Quotes,
    History { symbol: String },
    Sparklines,
    Config,
    Watch { interval_secs: Option<u64> },
}

/// Loads the config file (or the defaults when there is none) and applies
/// environment overrides.
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    let mut config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load_or_default()?,
    };
    config.apply_env();
    Ok(config)
}

/// Routes the configured providers and wraps them in a cached service.
pub fn build_service(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<MarketService> {
    let routes = build_routes(config, clock.clone())?;
    MarketService::from_config(config, routes, clock)
}

/// The sheet universe when one is configured and reachable, else the
/// configured or built-in default.
pub async fn resolve_universe(config: &AppConfig) -> SymbolUniverse {
    let fallback = config.default_universe();
    let source = match config.sheet_url().map(SheetUniverseSource::new) {
        Some(Ok(source)) => Some(source),
        Some(Err(e)) => {
            warn!(error = %e, "Universe sheet client unavailable");
            None
        }
        None => None,
    };
    resolve_or_default(source.as_ref().map(|s| s as &dyn UniverseSource), &fallback).await
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>, json: bool) -> Result<()> {
    info!("market-pulse starting...");

    let config = load_config(config_path)?;
    debug!("Loaded config: {config:#?}");

    let service = build_service(&config, Arc::new(SystemClock))?;

    match command {
        AppCommand::Quotes => {
            let universe = resolve_universe(&config).await;
            cli::quotes::run(&service, &universe, json).await
        }
        AppCommand::History { symbol } => cli::history::run_history(&service, &symbol, json).await,
        AppCommand::Sparklines => {
            let universe = resolve_universe(&config).await;
            cli::history::run_sparklines(&service, &universe, json).await
        }
        AppCommand::Config => {
            let universe = resolve_universe(&config).await;
            cli::config::run(&universe, json)
        }
        AppCommand::Watch { interval_secs } => {
            let interval = interval_secs
                .filter(|secs| *secs > 0)
                .map_or_else(|| config.refresh_interval(), Duration::from_secs);
            let universe = resolve_universe(&config).await;
            cli::watch::run(&service, &universe, interval, json).await
        }
    }
}
