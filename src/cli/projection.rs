use super::ui;
use crate::core::projection::{ProjectionParams, ProjectionReport, Scenario, get_projection};
use anyhow::Result;
use comfy_table::Cell;

impl ProjectionReport {
    pub fn display_as_table(&self, currency: &str) -> String {
        let params = &self.params;
        let mut output = format!(
            "Projection over {} years\n\n",
            ui::style_text(&params.years.to_string(), ui::StyleType::Title)
        );
        output.push_str(&format!(
            "Initial capital: {}  Monthly contribution: {}  Annual fees: {:.2}%\n\n",
            ui::format_amount(params.initial_capital),
            ui::format_amount(params.monthly_contribution),
            params.annual_fee_rate * 100.0
        ));

        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell("Scenario"),
            ui::header_cell("Growth"),
            ui::header_cell(&format!("Final ({currency})")),
            ui::header_cell("Contributions"),
            ui::header_cell("Gains"),
            ui::header_cell("Fees"),
            ui::header_cell("Annualized"),
        ]);
        for result in &self.scenarios {
            table.add_row(vec![
                Cell::new(&result.scenario),
                ui::number_cell(format!("{:.1}%", result.annual_growth_rate * 100.0)),
                ui::number_cell(ui::format_amount(result.final_capital)),
                ui::number_cell(ui::format_amount(result.total_contributions)),
                ui::change_cell(ui::format_amount(result.total_gains), result.total_gains),
                ui::number_cell(ui::format_amount(result.total_fees)),
                ui::format_optional_cell(result.annualized_return, |r| {
                    ui::format_signed_pct(r * 100.0)
                }),
            ]);
        }
        output.push_str(&table.to_string());

        // One row per year keeps the table readable for long horizons
        let mut yearly = ui::new_styled_table();
        let mut header = vec![ui::header_cell("Year")];
        header.extend(self.scenarios.iter().map(|s| ui::header_cell(&s.scenario)));
        yearly.set_header(header);
        for year in 1..=params.years {
            let month = (year * 12) as usize;
            let mut row = vec![Cell::new(year)];
            row.extend(self.scenarios.iter().map(|s| {
                ui::format_optional_cell(s.points.get(month).map(|p| p.capital), ui::format_amount)
            }));
            yearly.add_row(row);
        }
        output.push_str("\n\n");
        output.push_str(&yearly.to_string());

        output.push_str(&format!(
            "\n\nBest case: {}  Worst case: {}  Range: {}",
            ui::style_text(&ui::format_amount(self.best_case), ui::StyleType::TotalValue),
            ui::format_amount(self.worst_case),
            ui::format_amount(self.range)
        ));
        output
    }
}

pub fn run(
    params: ProjectionParams,
    scenarios: &[Scenario],
    currency: &str,
    json: bool,
) -> Result<()> {
    let report = get_projection(params, scenarios)?;
    if json {
        return ui::print_json(&report);
    }
    println!("{}", report.display_as_table(currency));
    Ok(())
}
