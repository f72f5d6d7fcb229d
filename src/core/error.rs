//! Domain errors raised by the valuation engine.

use chrono::NaiveDate;
use thiserror::Error;

/// Errors that the engine surfaces to its callers.
///
/// Price and ledger errors are scoped to a single instrument or data point;
/// callers are expected to exclude the affected item and carry on with the
/// rest of the portfolio.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Every provider in the chain failed for this instrument and date.
    #[error("Price unavailable for {instrument} ({})", as_of_label(.date))]
    PriceUnavailable {
        instrument: String,
        date: Option<NaiveDate>,
    },

    /// A disposal would sell more units than are held at that point.
    #[error(
        "Disposal of {requested} units of {instrument} on {date} exceeds held quantity {held}"
    )]
    NegativePosition {
        instrument: String,
        date: NaiveDate,
        held: f64,
        requested: f64,
    },

    /// Projection parameters rejected before any computation.
    #[error("Invalid projection parameters: {0}")]
    InvalidProjectionParams(String),
}

impl CoreError {
    pub fn price_unavailable(instrument: &str, date: Option<NaiveDate>) -> Self {
        CoreError::PriceUnavailable {
            instrument: instrument.to_string(),
            date,
        }
    }
}

fn as_of_label(date: &Option<NaiveDate>) -> String {
    match date {
        Some(d) => format!("as of {d}"),
        None => "current".to_string(),
    }
}
