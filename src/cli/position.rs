use super::ui;
use crate::core::ledger::Transaction;
use crate::core::portfolio::{PositionDetail, ValuationPoint, get_position_detail};
use crate::core::pricing::PriceService;
use anyhow::Result;
use chrono::NaiveDate;
use comfy_table::{Cell, Table};

/// Month-end value table shared by the position and history commands.
pub(crate) fn valuation_table(points: &[ValuationPoint], currency: &str) -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Date"),
        ui::header_cell(&format!("Invested ({currency})")),
        ui::header_cell(&format!("Value ({currency})")),
        ui::header_cell("P/L"),
    ]);
    for point in points {
        let value = point
            .market_value
            .map_or_else(|| ui::na_cell(!point.missing.is_empty()), |v| {
                ui::number_cell(ui::format_amount(v))
            });
        let pl = point.market_value.map_or_else(
            || ui::na_cell(false),
            |v| {
                let pl = v - point.invested_capital;
                ui::change_cell(ui::format_amount(pl), pl)
            },
        );
        table.add_row(vec![
            Cell::new(point.date.to_string()),
            ui::number_cell(ui::format_amount(point.invested_capital)),
            value,
            pl,
        ]);
    }
    table
}

impl PositionDetail {
    pub fn display_as_table(&self, currency: &str) -> String {
        let position = &self.position;
        let mut output = format!(
            "Position: {}\n\n",
            ui::style_text(&position.instrument, ui::StyleType::Title)
        );
        output.push_str(&format!(
            "Quantity: {:.4}\nAverage cost: {}\nInvested ({currency}): {}\n",
            position.quantity,
            ui::format_amount(position.average_cost),
            ui::format_amount(position.invested_capital),
        ));
        if let (Some(first), Some(last)) = (position.first_transaction, position.last_transaction) {
            output.push_str(&format!(
                "Transactions: {} ({first} to {last})\n",
                position.transaction_count
            ));
        }
        match (position.current_price, position.current_value) {
            (Some(price), Some(value)) => {
                let source = match (&position.price_source, &position.price_venue) {
                    (Some(source), Some(venue)) => format!("{source}, {venue}"),
                    (Some(source), None) => source.clone(),
                    _ => "unknown".to_string(),
                };
                output.push_str(&format!(
                    "Price: {} ({source})\nValue ({currency}): {}\n",
                    ui::format_amount(price),
                    ui::style_text(&ui::format_amount(value), ui::StyleType::TotalValue)
                ));
            }
            _ if position.quantity > 0.0 => {
                output.push_str(&ui::style_text("Price unavailable\n", ui::StyleType::Error));
            }
            _ => output.push_str(&ui::style_text("Position closed\n", ui::StyleType::Subtle)),
        }

        if !self.history.is_empty() {
            output.push('\n');
            output.push_str(&valuation_table(&self.history, currency).to_string());
        }
        output
    }
}

pub async fn run(
    instrument: &str,
    transactions: &[Transaction],
    pricing: &PriceService,
    as_of: NaiveDate,
    json: bool,
) -> Result<()> {
    let pb = ui::progress_bar(1, "Fetching price history...", json);
    let detail = get_position_detail(instrument, transactions, pricing, as_of).await;
    pb.finish_and_clear();
    let detail = detail?;

    if json {
        return ui::print_json(&detail);
    }
    println!("{}", detail.display_as_table(pricing.reporting_currency()));
    Ok(())
}
