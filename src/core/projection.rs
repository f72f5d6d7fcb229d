//! Forward compounding simulator. Independent of the ledger and of prices:
//! everything it needs comes from the caller.

use crate::core::error::CoreError;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const MIN_YEARS: u32 = 1;
pub const MAX_YEARS: u32 = 50;
pub const DEFAULT_FEE_RATE: f64 = 0.0075;
pub const DEFAULT_MONTHLY_CONTRIBUTION: f64 = 500.0;
pub const DEFAULT_YEARS: u32 = 10;
pub const DEFAULT_INITIAL_CAPITAL: f64 = 10_000.0;

/// A named annual growth assumption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub annual_growth_rate: f64,
}

impl Scenario {
    pub fn new(name: &str, annual_growth_rate: f64) -> Self {
        Self {
            name: name.to_string(),
            annual_growth_rate,
        }
    }
}

pub fn default_scenarios() -> Vec<Scenario> {
    vec![
        Scenario::new("pessimistic", 0.03),
        Scenario::new("normal", 0.07),
        Scenario::new("optimistic", 0.11),
    ]
}

/// Parameters shared by every scenario of a projection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectionParams {
    pub initial_capital: f64,
    pub monthly_contribution: f64,
    pub years: u32,
    pub annual_fee_rate: f64,
}

impl Default for ProjectionParams {
    fn default() -> Self {
        Self {
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            monthly_contribution: DEFAULT_MONTHLY_CONTRIBUTION,
            years: DEFAULT_YEARS,
            annual_fee_rate: DEFAULT_FEE_RATE,
        }
    }
}

impl ProjectionParams {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(MIN_YEARS..=MAX_YEARS).contains(&self.years) {
            return Err(CoreError::InvalidProjectionParams(format!(
                "horizon must be between {MIN_YEARS} and {MAX_YEARS} years, got {}",
                self.years
            )));
        }
        if !self.annual_fee_rate.is_finite() {
            return Err(CoreError::InvalidProjectionParams(
                "annual fee rate must be finite".to_string(),
            ));
        }
        if !self.initial_capital.is_finite() || self.initial_capital < 0.0 {
            return Err(CoreError::InvalidProjectionParams(
                "initial capital must be a non-negative number".to_string(),
            ));
        }
        if !self.monthly_contribution.is_finite() || self.monthly_contribution < 0.0 {
            return Err(CoreError::InvalidProjectionParams(
                "monthly contribution must be a non-negative number".to_string(),
            ));
        }
        Ok(())
    }

    fn months(&self) -> u32 {
        self.years * 12
    }
}

/// A validated projection for one growth rate. Every call to
/// [`iter`](Projection::iter) restarts the sequence at month 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    params: ProjectionParams,
    annual_growth_rate: f64,
}

impl Projection {
    pub fn iter(&self) -> ProjectionIter {
        ProjectionIter {
            monthly_rate: (self.annual_growth_rate - self.params.annual_fee_rate) / 12.0,
            contribution: self.params.monthly_contribution,
            months: self.params.months(),
            month: 0,
            capital: self.params.initial_capital,
            finished: false,
        }
    }
}

impl IntoIterator for &Projection {
    type Item = (u32, f64);
    type IntoIter = ProjectionIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Yields `(month_index, capital)` from month 0 to `years * 12` inclusive.
#[derive(Debug, Clone)]
pub struct ProjectionIter {
    monthly_rate: f64,
    contribution: f64,
    months: u32,
    month: u32,
    capital: f64,
    finished: bool,
}

impl Iterator for ProjectionIter {
    type Item = (u32, f64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let item = (self.month, self.capital);
        if self.month == self.months {
            self.finished = true;
        } else {
            self.capital = self.capital * (1.0 + self.monthly_rate) + self.contribution;
            self.month += 1;
        }
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.finished {
            0
        } else {
            (self.months - self.month + 1) as usize
        };
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ProjectionIter {}

pub fn compute_projection(
    params: ProjectionParams,
    annual_growth_rate: f64,
) -> Result<Projection, CoreError> {
    params.validate()?;
    if !annual_growth_rate.is_finite() {
        return Err(CoreError::InvalidProjectionParams(
            "annual growth rate must be finite".to_string(),
        ));
    }
    Ok(Projection {
        params,
        annual_growth_rate,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProjectionPoint {
    pub month: u32,
    pub capital: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectionResult {
    pub scenario: String,
    pub annual_growth_rate: f64,
    pub points: Vec<ProjectionPoint>,
    pub final_capital: f64,
    pub total_contributions: f64,
    pub total_gains: f64,
    pub total_fees: f64,
    /// `(final / (initial + contributions))^(1/years) - 1`, absent when
    /// nothing was invested.
    pub annualized_return: Option<f64>,
}

impl ProjectionResult {
    fn from_projection(scenario: &Scenario, projection: &Projection) -> Self {
        let params = projection.params;
        let monthly_fee = params.annual_fee_rate / 12.0;
        let points: Vec<ProjectionPoint> = projection
            .iter()
            .map(|(month, capital)| ProjectionPoint { month, capital })
            .collect();

        // Fee drag is charged on the capital at the start of each month
        let total_fees: f64 = points
            .iter()
            .take(params.months() as usize)
            .map(|p| p.capital * monthly_fee)
            .sum();
        let final_capital = points.last().map_or(params.initial_capital, |p| p.capital);
        let total_contributions = params.monthly_contribution * f64::from(params.months());
        let total_invested = params.initial_capital + total_contributions;
        let annualized_return = (total_invested > 0.0 && final_capital > 0.0)
            .then(|| (final_capital / total_invested).powf(1.0 / f64::from(params.years)) - 1.0);

        Self {
            scenario: scenario.name.clone(),
            annual_growth_rate: scenario.annual_growth_rate,
            points,
            final_capital,
            total_contributions,
            total_gains: final_capital - params.initial_capital - total_contributions,
            total_fees,
            annualized_return,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectionReport {
    pub params: ProjectionParams,
    pub scenarios: Vec<ProjectionResult>,
    pub best_case: f64,
    pub worst_case: f64,
    pub range: f64,
}

/// Runs every scenario independently. All parameters are checked before
/// anything is computed.
pub fn get_projection(
    params: ProjectionParams,
    scenarios: &[Scenario],
) -> Result<ProjectionReport, CoreError> {
    let projections = scenarios
        .iter()
        .map(|s| compute_projection(params, s.annual_growth_rate).map(|p| (s, p)))
        .collect::<Result<Vec<_>, _>>()?;

    let results: Vec<ProjectionResult> = projections
        .iter()
        .map(|(scenario, projection)| {
            let result = ProjectionResult::from_projection(scenario, projection);
            debug!(
                scenario = %result.scenario,
                final_capital = result.final_capital,
                "Computed projection"
            );
            result
        })
        .collect();

    let finals = results.iter().map(|r| r.final_capital);
    let best_case = finals.clone().fold(f64::NEG_INFINITY, f64::max);
    let worst_case = finals.fold(f64::INFINITY, f64::min);
    let (best_case, worst_case) = if results.is_empty() {
        (0.0, 0.0)
    } else {
        (best_case, worst_case)
    };

    Ok(ProjectionReport {
        params,
        scenarios: results,
        best_case,
        worst_case,
        range: best_case - worst_case,
    })
}
