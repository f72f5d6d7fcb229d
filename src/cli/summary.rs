use super::ui;
use crate::core::fiscal::TaxRegime;
use crate::core::ledger::Transaction;
use crate::core::performance::Xirr;
use crate::core::portfolio::{PortfolioSummary, summarize_as_of};
use crate::core::pricing::PriceService;
use anyhow::Result;
use chrono::NaiveDate;
use comfy_table::Cell;
use std::collections::BTreeSet;

impl PortfolioSummary {
    pub fn display_as_table(&self) -> String {
        let currency = &self.currency;
        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell("Instrument"),
            ui::header_cell("Quantity"),
            ui::header_cell(&format!("Avg cost ({currency})")),
            ui::header_cell(&format!("Invested ({currency})")),
            ui::header_cell("Price"),
            ui::header_cell(&format!("Value ({currency})")),
            ui::header_cell("P/L"),
            ui::header_cell("P/L (%)"),
        ]);

        for position in &self.positions {
            let pl = position.unrealized_pl.map_or_else(
                || ui::na_cell(true),
                |pl| ui::change_cell(ui::format_amount(pl), pl),
            );
            let pl_pct = position.unrealized_pl_pct.map_or_else(
                || ui::na_cell(!position.is_priced()),
                |pct| ui::change_cell(ui::format_signed_pct(pct), pct),
            );
            table.add_row(vec![
                Cell::new(&position.instrument),
                ui::number_cell(format!("{:.4}", position.quantity)),
                ui::number_cell(ui::format_amount(position.average_cost)),
                ui::number_cell(ui::format_amount(position.invested_capital)),
                ui::format_optional_cell(position.current_price, ui::format_amount),
                ui::format_optional_cell(position.current_value, ui::format_amount),
                pl,
                pl_pct,
            ]);
        }

        let metrics = &self.metrics;
        let mut output = format!(
            "Portfolio as of {} ({} transactions)\n\n",
            ui::style_text(&self.as_of.to_string(), ui::StyleType::Title),
            self.transaction_count
        );
        output.push_str(&table.to_string());

        output.push_str(&format!(
            "\n\nInvested ({}): {}",
            ui::style_text(currency, ui::StyleType::TotalLabel),
            ui::format_amount(metrics.invested_capital)
        ));
        output.push_str(&format!(
            "\nTotal Value ({}): {}",
            ui::style_text(currency, ui::StyleType::TotalLabel),
            ui::style_text(
                &ui::format_amount(metrics.current_value),
                ui::StyleType::TotalValue
            )
        ));
        let relative = metrics
            .relative_pl
            .map_or_else(|| "N/A".to_string(), ui::format_signed_pct);
        output.push_str(&format!(
            "\nP/L: {} ({relative})",
            ui::format_amount(metrics.absolute_pl)
        ));
        let xirr = match &metrics.annualized_return {
            Xirr::Converged { rate, .. } => ui::format_signed_pct(rate * 100.0),
            Xirr::Indeterminate { reason } => {
                ui::style_text(&format!("indeterminate ({reason})"), ui::StyleType::Subtle)
            }
        };
        output.push_str(&format!("\nAnnualized return (XIRR): {xirr}"));

        if !self.fiscal_scenarios.is_empty() {
            let mut fiscal = ui::new_styled_table();
            fiscal.set_header(vec![
                ui::header_cell("Regime"),
                ui::header_cell("Rate"),
                ui::header_cell("Tax"),
                ui::header_cell("Net gain"),
                ui::header_cell(&format!("Net value ({currency})")),
            ]);
            for scenario in &self.fiscal_scenarios {
                fiscal.add_row(vec![
                    Cell::new(&scenario.regime),
                    ui::number_cell(format!("{:.1}%", scenario.rate * 100.0)),
                    ui::number_cell(ui::format_amount(scenario.tax_amount)),
                    ui::change_cell(ui::format_amount(scenario.net_gain), scenario.net_gain),
                    ui::format_optional_cell(scenario.net_value, ui::format_amount),
                ]);
            }
            output.push_str("\n\n");
            output.push_str(&fiscal.to_string());
        }

        if !self.unpriced.is_empty() {
            output.push_str(&format!(
                "\n\n{}",
                ui::style_text(
                    &format!("Price unavailable: {}", self.unpriced.join(", ")),
                    ui::StyleType::Error
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
    regimes: &[TaxRegime],
    as_of: NaiveDate,
    json: bool,
) -> Result<()> {
    let instruments: BTreeSet<&str> = transactions.iter().map(|t| t.isin.as_str()).collect();
    let pb = ui::progress_bar(instruments.len() as u64, "Fetching prices...", json);
    let summary = summarize_as_of(transactions, pricing, regimes, as_of, &|| pb.inc(1)).await;
    pb.finish_and_clear();

    if json {
        return ui::print_json(&summary);
    }
    if summary.positions.is_empty() && summary.ledger_errors.is_empty() {
        println!("No open positions found in the ledger.");
        return Ok(());
    }
    println!("{}", summary.display_as_table());
    Ok(())
}
