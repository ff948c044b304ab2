use super::{history, quotes, ui};
use crate::core::MarketService;
use crate::core::universe::SymbolUniverse;
use anyhow::Result;
use std::time::Duration;
use tracing::{debug, info};

/// Refreshes quotes and index sparklines every `interval` until Ctrl-C.
pub async fn run(
    service: &MarketService,
    universe: &SymbolUniverse,
    interval: Duration,
    json: bool,
) -> Result<()> {
    info!(interval_secs = interval.as_secs(), "Watching market");
    let term = console::Term::stdout();

    loop {
        if !json && term.is_term() {
            term.clear_screen()?;
        }
        quotes::run(service, universe, json).await?;
        history::run_sparklines(service, universe, json).await?;
        if !json {
            ui::print_separator();
            println!(
                "{}",
                ui::style_text(
                    &format!("Refreshing every {}s, Ctrl-C to stop", interval.as_secs()),
                    ui::StyleType::Subtle
                )
            );
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted, stopping watch");
                return Ok(());
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
