use super::ui;
use crate::core::MarketService;
use crate::core::quote::Sparklines;
use crate::core::universe::SymbolUniverse;
use anyhow::{Context, Result};
use comfy_table::{Cell, CellAlignment, Table};

/// Prints closing prices for `symbol`, oldest first, with a sparkline.
pub async fn run_history(service: &MarketService, symbol: &str, json: bool) -> Result<()> {
    let pb = ui::new_spinner(&format!("Fetching history for {symbol}"));
    let result = service.get_history(symbol).await;
    pb.finish_and_clear();
    let series = result.with_context(|| format!("Failed to fetch history for {symbol}"))?;

    if json {
        println!("{}", serde_json::to_string(&series).context("Failed to encode history")?);
        return Ok(());
    }

    if series.is_empty() {
        println!("No history available for {symbol}.");
        return Ok(());
    }

    println!("\n{}", ui::style_text(symbol, ui::StyleType::Title));
    println!("{}", ui::sparkline(&series));
    println!("{}", summary_table(&series));
    Ok(())
}

/// Prints one sparkline per index symbol of `universe`.
pub async fn run_sparklines(
    service: &MarketService,
    universe: &SymbolUniverse,
    json: bool,
) -> Result<()> {
    let pb = ui::new_spinner("Fetching index history");
    let sparklines = service.get_sparklines(&universe.index_symbols()).await;
    pb.finish_and_clear();

    if json {
        let body =
            serde_json::to_string_pretty(&sparklines).context("Failed to encode sparklines")?;
        println!("{body}");
        return Ok(());
    }

    println!("{}", sparklines_table(universe, &sparklines));
    Ok(())
}

pub fn summary_table(series: &[f64]) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Points"),
        ui::header_cell("First"),
        ui::header_cell("Last"),
        ui::header_cell("Low"),
        ui::header_cell("High"),
        ui::header_cell("Change %"),
    ]);

    let (Some(first), Some(last)) = (series.first(), series.last()) else {
        return table;
    };
    let low = series.iter().copied().fold(f64::INFINITY, f64::min);
    let high = series.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    table.add_row(vec![
        Cell::new(series.len()).set_alignment(CellAlignment::Right),
        ui::price_cell(*first),
        ui::price_cell(*last),
        ui::price_cell(low),
        ui::price_cell(high),
        if *first > 0.0 {
            ui::change_cell((last - first) / first * 100.0, "%")
        } else {
            ui::na_cell(false)
        },
    ]);
    table
}

pub fn sparklines_table(universe: &SymbolUniverse, sparklines: &Sparklines) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Symbol"),
        ui::header_cell("Name"),
        ui::header_cell("Trend"),
        ui::header_cell("Last"),
    ]);

    for (symbol, series) in &sparklines.0 {
        let name = universe.name_of(symbol).unwrap_or(symbol);
        let last = series
            .last()
            .map_or_else(|| ui::na_cell(true), |v| ui::price_cell(*v));
        table.add_row(vec![
            Cell::new(symbol),
            Cell::new(name),
            Cell::new(ui::sparkline(series)),
            last,
        ]);
    }
    table
}
