use super::ui;
use crate::core::MarketService;
use crate::core::quote::{Quote, QuoteSnapshot};
use crate::core::universe::{SymbolUniverse, TrackedSymbol};
use anyhow::{Context, Result};
use chrono::Utc;
use comfy_table::{Cell, Table};
use serde_json::Value;
use tracing::warn;

pub async fn run(service: &MarketService, universe: &SymbolUniverse, json: bool) -> Result<()> {
    let pb = ui::new_spinner("Fetching quotes");
    let result = service.get_quotes(universe).await;
    pb.finish_and_clear();

    // A cold cache with every provider down still renders a full board.
    let (snapshot, degraded) = match result {
        Ok(snapshot) => (snapshot, None),
        Err(e) => {
            warn!(error = %e, "Quotes unavailable, rendering placeholders");
            (degraded_snapshot(universe), Some(e.to_string()))
        }
    };

    if json {
        let body = snapshot_json(&snapshot, degraded.as_deref())?;
        let body = serde_json::to_string_pretty(&body).context("Failed to encode quotes")?;
        println!("{body}");
        return Ok(());
    }

    display_snapshot(universe, &snapshot, degraded.as_deref());
    Ok(())
}

pub fn degraded_snapshot(universe: &SymbolUniverse) -> QuoteSnapshot {
    let quotes = universe
        .all_symbols()
        .iter()
        .map(|s| Quote::placeholder(s))
        .collect();
    QuoteSnapshot::new(quotes, Utc::now())
}

/// The snapshot as JSON. A degraded board also carries `degraded` and `error`.
pub fn snapshot_json(snapshot: &QuoteSnapshot, degraded: Option<&str>) -> Result<Value> {
    let mut body = serde_json::to_value(snapshot).context("Failed to encode quotes")?;
    if let (Some(reason), Value::Object(fields)) = (degraded, &mut body) {
        fields.insert("degraded".to_string(), Value::Bool(true));
        fields.insert("error".to_string(), Value::String(reason.to_string()));
    }
    Ok(body)
}

pub fn status_line(snapshot: &QuoteSnapshot) -> String {
    let badge = if snapshot.market_open {
        ui::style_text("MARKET OPEN", ui::StyleType::Badge)
    } else {
        ui::style_text("MARKET CLOSED", ui::StyleType::Subtle)
    };
    let updated = snapshot.timestamp.format("%Y-%m-%d %H:%M:%S UTC");
    format!("{badge}  {}", ui::style_text(&format!("Updated {updated}"), ui::StyleType::Subtle))
}

pub fn display_snapshot(universe: &SymbolUniverse, snapshot: &QuoteSnapshot, degraded: Option<&str>) {
    if let Some(reason) = degraded {
        println!(
            "{} {}",
            ui::style_text("Live data unavailable:", ui::StyleType::Warning),
            ui::style_text(reason, ui::StyleType::Error)
        );
    }
    println!("{}", status_line(snapshot));

    for (title, group) in universe.groups() {
        if group.is_empty() {
            continue;
        }
        println!("\n{}", ui::style_text(title, ui::StyleType::Title));
        println!("{}", group_table(group, snapshot));
    }
}

/// One row per tracked symbol. Symbols missing from `snapshot` render as placeholders.
pub fn group_table(group: &[TrackedSymbol], snapshot: &QuoteSnapshot) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Symbol"),
        ui::header_cell("Name"),
        ui::header_cell("Price"),
        ui::header_cell("Change"),
        ui::header_cell("Change %"),
        ui::header_cell("State"),
    ]);

    for tracked in group {
        let quote = snapshot
            .get(&tracked.symbol)
            .cloned()
            .unwrap_or_else(|| Quote::placeholder(&tracked.symbol));
        let name = if quote.is_placeholder() {
            tracked.name.as_str()
        } else {
            quote.name.as_str()
        };

        let mut row = vec![Cell::new(&tracked.symbol), Cell::new(name)];
        row.extend(ui::quote_cells(&quote));
        row.push(ui::market_state_cell(quote.market_state));
        table.add_row(row);
    }
    table
}
