use super::ui;
use crate::core::universe::SymbolUniverse;
use anyhow::{Context, Result};
use comfy_table::{Cell, Table};

/// Prints the active symbol universe.
pub fn run(universe: &SymbolUniverse, json: bool) -> Result<()> {
    if json {
        let body = serde_json::to_string_pretty(universe).context("Failed to encode universe")?;
        println!("{body}");
        return Ok(());
    }

    for (title, group) in universe.groups() {
        println!("\n{}", ui::style_text(title, ui::StyleType::Title));
        if group.is_empty() {
            println!("{}", ui::style_text("(none)", ui::StyleType::Subtle));
            continue;
        }
        println!("{}", universe_table(group));
    }
    Ok(())
}

fn universe_table(group: &[crate::core::universe::TrackedSymbol]) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Symbol"),
        ui::header_cell("Name"),
        ui::header_cell("Industry"),
    ]);
    for tracked in group {
        table.add_row(vec![
            Cell::new(&tracked.symbol),
            Cell::new(&tracked.name),
            Cell::new(tracked.industry.as_deref().unwrap_or("")),
        ]);
    }
    table
}
