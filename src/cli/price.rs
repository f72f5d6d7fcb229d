use super::ui;
use crate::core::price::PriceQuote;
use crate::core::pricing::PriceService;
use anyhow::Result;
use chrono::NaiveDate;
use comfy_table::Cell;

fn display_quote(quote: &PriceQuote) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Instrument"),
        ui::header_cell("Price"),
        ui::header_cell("Currency"),
        ui::header_cell("As of"),
        ui::header_cell("Source"),
    ]);
    let source = match &quote.venue {
        Some(venue) => format!("{} ({venue})", quote.source),
        None => quote.source.clone(),
    };
    table.add_row(vec![
        Cell::new(&quote.instrument),
        ui::number_cell(format!("{:.4}", quote.price)),
        Cell::new(&quote.currency),
        Cell::new(quote.as_of.to_string()),
        Cell::new(source),
    ]);
    table.to_string()
}

/// Looks up the current price, or the price on `date` when given.
pub async fn run(
    instrument: &str,
    date: Option<NaiveDate>,
    pricing: &PriceService,
    json: bool,
) -> Result<()> {
    let instrument = instrument.trim().to_uppercase();
    let quote = match date {
        Some(date) => pricing.get_historical_price(&instrument, date).await?,
        None => pricing.get_current_price(&instrument).await?,
    };

    if json {
        return ui::print_json(&quote);
    }
    println!("{}", display_quote(&quote));
    Ok(())
}
