use super::position::valuation_table;
use super::ui;
use crate::core::ledger::Transaction;
use crate::core::portfolio::{MonthlyValues, get_monthly_portfolio_values};
use crate::core::pricing::PriceService;
use anyhow::Result;
use chrono::NaiveDate;
use std::collections::BTreeSet;

impl MonthlyValues {
    pub fn display_as_table(&self) -> String {
        let mut output = format!(
            "{}\n\n",
            ui::style_text("Monthly portfolio values", ui::StyleType::Title)
        );
        output.push_str(&valuation_table(&self.points, &self.currency).to_string());

        let incomplete = self
            .points
            .iter()
            .filter(|p| p.market_value.is_none())
            .count();
        if incomplete > 0 {
            output.push_str(&format!(
                "\n\n{}",
                ui::style_text(
                    &format!("{incomplete} month(s) without a complete valuation"),
                    ui::StyleType::Subtle
                )
            ));
        }
        for issue in &self.ledger_errors {
            output.push_str(&format!(
                "\n{}",
                ui::style_text(&issue.error.to_string(), ui::StyleType::Error)
            ));
        }
        output
    }
}

pub async fn run(
    transactions: &[Transaction],
    pricing: &PriceService,
    as_of: NaiveDate,
    json: bool,
) -> Result<()> {
    let instruments: BTreeSet<&str> = transactions.iter().map(|t| t.isin.as_str()).collect();
    let pb = ui::progress_bar(instruments.len() as u64, "Fetching price histories...", json);
    let values = get_monthly_portfolio_values(transactions, pricing, as_of, &|| pb.inc(1)).await;
    pb.finish_and_clear();

    if json {
        return ui::print_json(&values);
    }
    if values.points.is_empty() {
        println!("No transactions found in the ledger.");
        return Ok(());
    }
    println!("{}", values.display_as_table());
    Ok(())
}
