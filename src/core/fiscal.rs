//! Net-of-tax views of a pre-tax gain under alternate account regimes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaxRegime {
    /// Ordinary account: a single flat rate on the gain.
    FlatTax { label: String, rate: f64 },
    /// Tax-advantaged wrapper: only social levies apply.
    TaxAdvantaged { label: String, levy_rate: f64 },
}

impl TaxRegime {
    pub fn label(&self) -> &str {
        match self {
            TaxRegime::FlatTax { label, .. } | TaxRegime::TaxAdvantaged { label, .. } => label,
        }
    }

    pub fn rate(&self) -> f64 {
        match self {
            TaxRegime::FlatTax { rate, .. } => *rate,
            TaxRegime::TaxAdvantaged { levy_rate, .. } => *levy_rate,
        }
    }
}

/// French defaults: "CTO" at the 30% flat tax, "PEA" at the 17.5% social levy.
pub fn default_regimes() -> Vec<TaxRegime> {
    vec![
        TaxRegime::FlatTax {
            label: "CTO".to_string(),
            rate: 0.30,
        },
        TaxRegime::TaxAdvantaged {
            label: "PEA".to_string(),
            levy_rate: 0.175,
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FiscalScenario {
    pub regime: String,
    pub pre_tax_gain: f64,
    pub rate: f64,
    pub tax_amount: f64,
    pub net_gain: f64,
    /// Portfolio value after tax; only known when a current value is given.
    pub net_value: Option<f64>,
}

impl FiscalScenario {
    pub fn with_current_value(mut self, current_value: f64) -> Self {
        self.net_value = Some(current_value - self.tax_amount);
        self
    }
}

/// Losses are not taxed: the net gain of a loss is the loss itself.
pub fn apply_regime(pre_tax_gain: f64, regime: &TaxRegime) -> FiscalScenario {
    let rate = regime.rate();
    let tax_amount = if pre_tax_gain > 0.0 {
        pre_tax_gain * rate
    } else {
        0.0
    };
    FiscalScenario {
        regime: regime.label().to_string(),
        pre_tax_gain,
        rate,
        tax_amount,
        net_gain: pre_tax_gain - tax_amount,
        net_value: None,
    }
}

/// One scenario per regime, each computed independently.
pub fn fiscal_scenarios(
    pre_tax_gain: f64,
    current_value: f64,
    regimes: &[TaxRegime],
) -> Vec<FiscalScenario> {
    regimes
        .iter()
        .map(|regime| apply_regime(pre_tax_gain, regime).with_current_value(current_value))
        .collect()
}
