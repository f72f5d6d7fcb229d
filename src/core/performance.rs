//! Money-weighted return (XIRR) over irregularly dated cash flows.
//!
//! The solver runs Newton-Raphson from a 10% guess and switches to bisection
//! over `[-0.9999, 10]` when the derivative vanishes or an iterate leaves that
//! interval. Both phases draw from one shared iteration budget, so the solver
//! always terminates; when the budget runs out the result is
//! [`Xirr::Indeterminate`] rather than an error.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

pub const MAX_ITERATIONS: usize = 100;
pub const TOLERANCE: f64 = 1e-6;
const INITIAL_GUESS: f64 = 0.1;
const LOWER_BOUND: f64 = -0.9999;
const UPPER_BOUND: f64 = 10.0;
const MIN_DERIVATIVE: f64 = 1e-12;
const DAYS_PER_YEAR: f64 = 365.0;

/// A dated, signed amount: negative when money goes in, positive when it
/// comes out.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CashFlow {
    pub date: NaiveDate,
    pub amount: f64,
}

impl CashFlow {
    pub fn new(date: NaiveDate, amount: f64) -> Self {
        Self { date, amount }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Xirr {
    Converged { rate: f64, iterations: usize },
    Indeterminate { reason: String },
}

impl Xirr {
    pub fn rate(&self) -> Option<f64> {
        match self {
            Xirr::Converged { rate, .. } => Some(*rate),
            Xirr::Indeterminate { .. } => None,
        }
    }

    fn indeterminate(reason: impl Into<String>) -> Self {
        Xirr::Indeterminate {
            reason: reason.into(),
        }
    }
}

/// Net present value and its derivative at `rate`.
fn npv_and_derivative(flows: &[(f64, f64)], rate: f64) -> (f64, f64) {
    let base = 1.0 + rate;
    flows.iter().fold((0.0, 0.0), |(npv, dnpv), (amount, years)| {
        let discount = base.powf(*years);
        (
            npv + amount / discount,
            dnpv - years * amount / (discount * base),
        )
    })
}

pub fn xirr(flows: &[CashFlow]) -> Xirr {
    xirr_within(flows, MAX_ITERATIONS)
}

fn xirr_within(flows: &[CashFlow], budget: usize) -> Xirr {
    if flows.iter().any(|f| !f.amount.is_finite()) {
        return Xirr::indeterminate("Cash flows contain non-finite amounts");
    }
    let has_outflow = flows.iter().any(|f| f.amount < 0.0);
    let has_inflow = flows.iter().any(|f| f.amount > 0.0);
    if !has_outflow || !has_inflow {
        return Xirr::indeterminate("Cash flows need at least one negative and one positive amount");
    }

    let Some(start) = flows.iter().map(|f| f.date).min() else {
        return Xirr::indeterminate("No cash flows");
    };
    let timed: Vec<(f64, f64)> = flows
        .iter()
        .map(|f| {
            let years = (f.date - start).num_days() as f64 / DAYS_PER_YEAR;
            (f.amount, years)
        })
        .collect();

    let mut iterations = 0;
    let mut rate = INITIAL_GUESS;
    while iterations < budget {
        iterations += 1;
        let (npv, dnpv) = npv_and_derivative(&timed, rate);
        if !npv.is_finite() || !dnpv.is_finite() || dnpv.abs() < MIN_DERIVATIVE {
            debug!(rate, npv, dnpv, "Newton step unusable, switching to bisection");
            break;
        }
        let next = rate - npv / dnpv;
        if !next.is_finite() || next <= LOWER_BOUND || next >= UPPER_BOUND {
            debug!(next, "Newton iterate out of range, switching to bisection");
            break;
        }
        if (next - rate).abs() < TOLERANCE {
            debug!(rate = next, iterations, "XIRR converged (Newton)");
            return Xirr::Converged {
                rate: next,
                iterations,
            };
        }
        rate = next;
    }

    bisect(&timed, iterations, budget)
}

fn bisect(timed: &[(f64, f64)], mut iterations: usize, budget: usize) -> Xirr {
    let mut lo = LOWER_BOUND;
    let mut hi = UPPER_BOUND;
    let (mut f_lo, _) = npv_and_derivative(timed, lo);
    let (f_hi, _) = npv_and_derivative(timed, hi);
    if f_lo.is_nan() || f_hi.is_nan() {
        return Xirr::indeterminate("Net present value is undefined at the search bounds");
    }
    if f_lo.signum() == f_hi.signum() {
        return Xirr::indeterminate("No sign change within the search interval");
    }

    while iterations < budget {
        iterations += 1;
        let mid = (lo + hi) / 2.0;
        let (f_mid, _) = npv_and_derivative(timed, mid);
        if f_mid == 0.0 || (hi - lo) / 2.0 < TOLERANCE {
            debug!(rate = mid, iterations, "XIRR converged (bisection)");
            return Xirr::Converged {
                rate: mid,
                iterations,
            };
        }
        if f_mid.signum() == f_lo.signum() {
            lo = mid;
            f_lo = f_mid;
        } else {
            hi = mid;
        }
    }

    Xirr::indeterminate(format!("No convergence after {budget} iterations"))
}

/// Portfolio-level performance figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub invested_capital: f64,
    pub current_value: f64,
    pub absolute_pl: f64,
    /// Absolute P/L as a percentage of invested capital.
    pub relative_pl: Option<f64>,
    pub annualized_return: Xirr,
}

impl PerformanceMetrics {
    pub fn new(invested_capital: f64, current_value: f64, flows: &[CashFlow]) -> Self {
        let absolute_pl = current_value - invested_capital;
        Self {
            invested_capital,
            current_value,
            absolute_pl,
            relative_pl: (invested_capital > 0.0).then(|| absolute_pl / invested_capital * 100.0),
            annualized_return: xirr(flows),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t0() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()
    }

    #[test]
    fn test_one_year_ten_percent() {
        let flows = [
            CashFlow::new(t0(), -100.0),
            CashFlow::new(t0() + Duration::days(365), 110.0),
        ];
        let rate = xirr(&flows).rate().unwrap();
        assert!((rate - 0.10).abs() < 1e-4, "rate = {rate}");
    }

    #[test]
    fn test_multiple_flows() {
        // Same 10% growth applied to two deposits
        let flows = [
            CashFlow::new(t0(), -1000.0),
            CashFlow::new(t0() + Duration::days(365), -1000.0),
            CashFlow::new(
                t0() + Duration::days(730),
                1000.0 * 1.1_f64.powi(2) + 1000.0 * 1.1,
            ),
        ];
        let rate = xirr(&flows).rate().unwrap();
        assert!((rate - 0.10).abs() < 1e-4, "rate = {rate}");
    }

    #[test]
    fn test_negative_return() {
        let flows = [
            CashFlow::new(t0(), -1000.0),
            CashFlow::new(t0() + Duration::days(365), 800.0),
        ];
        let rate = xirr(&flows).rate().unwrap();
        assert!((rate + 0.20).abs() < 1e-4, "rate = {rate}");
    }

    #[test]
    fn test_flow_order_does_not_matter() {
        let flows = [
            CashFlow::new(t0() + Duration::days(365), 110.0),
            CashFlow::new(t0(), -100.0),
        ];
        let rate = xirr(&flows).rate().unwrap();
        assert!((rate - 0.10).abs() < 1e-4);
    }

    #[test]
    fn test_extreme_gain_uses_bisection() {
        // 5x in one year: Newton from 10% overshoots, bisection settles it
        let flows = [
            CashFlow::new(t0(), -100.0),
            CashFlow::new(t0() + Duration::days(365), 500.0),
        ];
        match xirr(&flows) {
            Xirr::Converged { rate, .. } => assert!((rate - 4.0).abs() < 1e-4, "rate = {rate}"),
            other => panic!("expected convergence, got {other:?}"),
        }
    }

    #[test]
    fn test_only_outflows_is_indeterminate() {
        let flows = [
            CashFlow::new(t0(), -100.0),
            CashFlow::new(t0() + Duration::days(30), -50.0),
        ];
        assert!(matches!(xirr(&flows), Xirr::Indeterminate { .. }));
        assert!(xirr(&[]).rate().is_none());
    }

    #[test]
    fn test_rate_beyond_bounds_is_indeterminate() {
        // 1000x in a day is far outside [-0.9999, 10]
        let flows = [
            CashFlow::new(t0(), -1.0),
            CashFlow::new(t0() + Duration::days(1), 1000.0),
        ];
        assert!(matches!(xirr(&flows), Xirr::Indeterminate { .. }));
    }

    #[test]
    fn test_same_day_flows_are_indeterminate() {
        // NPV does not depend on the rate
        let flows = [CashFlow::new(t0(), -100.0), CashFlow::new(t0(), 100.0)];
        assert_eq!(
            xirr(&flows),
            Xirr::Indeterminate {
                reason: "No sign change within the search interval".to_string()
            }
        );
    }

    #[test]
    fn test_near_total_loss_below_lower_bound() {
        let flows = [
            CashFlow::new(t0(), -100.0),
            CashFlow::new(t0() + Duration::days(365), 0.0001),
        ];
        assert!(matches!(xirr(&flows), Xirr::Indeterminate { .. }));
    }

    #[test]
    fn test_converged_results_stay_within_budget() {
        let cases = [
            vec![
                CashFlow::new(t0(), -100.0),
                CashFlow::new(t0() + Duration::days(365), 110.0),
            ],
            vec![
                CashFlow::new(t0(), -100.0),
                CashFlow::new(t0() + Duration::days(365), 50.0),
            ],
            vec![
                CashFlow::new(t0(), -100.0),
                CashFlow::new(t0() + Duration::days(80 * 365), 1.0),
            ],
            vec![
                CashFlow::new(t0(), -100.0),
                CashFlow::new(t0() + Duration::days(30), 110.0),
            ],
        ];
        for flows in &cases {
            match xirr(flows) {
                Xirr::Converged { iterations, .. } => assert!(iterations <= MAX_ITERATIONS),
                other => panic!("expected convergence for {flows:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_exhausted_budget_is_indeterminate() {
        // Newton needs several steps to reach 100%
        let flows = [
            CashFlow::new(t0(), -100.0),
            CashFlow::new(t0() + Duration::days(365), 200.0),
        ];
        assert!((xirr(&flows).rate().unwrap() - 1.0).abs() < 1e-4);
        assert_eq!(
            xirr_within(&flows, 2),
            Xirr::Indeterminate {
                reason: "No convergence after 2 iterations".to_string()
            }
        );
    }

    #[test]
    fn test_undefined_npv_at_bounds_is_indeterminate() {
        // At the lower bound the far flows overflow to opposite infinities
        let timed = [(-100.0, 0.0), (1.0, 200.0), (-1.0, 201.0)];
        assert_eq!(
            bisect(&timed, 0, MAX_ITERATIONS),
            Xirr::Indeterminate {
                reason: "Net present value is undefined at the search bounds".to_string()
            }
        );
    }

    #[test]
    fn test_metrics() {
        let flows = [
            CashFlow::new(t0(), -1000.0),
            CashFlow::new(t0() + Duration::days(365), 1100.0),
        ];
        let metrics = PerformanceMetrics::new(1000.0, 1100.0, &flows);
        assert_eq!(metrics.absolute_pl, 100.0);
        assert!((metrics.relative_pl.unwrap() - 10.0).abs() < 1e-9);
        assert!((metrics.annualized_return.rate().unwrap() - 0.1).abs() < 1e-4);

        let empty = PerformanceMetrics::new(0.0, 0.0, &[]);
        assert!(empty.relative_pl.is_none());
        assert!(empty.annualized_return.rate().is_none());
    }
}
