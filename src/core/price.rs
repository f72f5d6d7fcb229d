//! Pricing abstractions and core types

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A single price observation from an external source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub instrument: String,
    pub price: f64,
    pub currency: String,
    pub as_of: NaiveDate,
    /// Provenance tag, e.g. `JustETF` or `Yahoo Finance`.
    pub source: String,
    pub venue: Option<String>,
}

/// A daily closing price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyPrice {
    pub date: NaiveDate,
    pub price: f64,
}

/// A daily price series as returned by a provider, with its currency.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceHistory {
    pub currency: String,
    pub prices: Vec<DailyPrice>,
}

/// Date window for a history request. `None` bounds mean "as far as the
/// provider goes".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn full() -> Self {
        Self {
            from: None,
            to: None,
        }
    }

    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.is_none_or(|f| date >= f) && self.to.is_none_or(|t| date <= t)
    }
}

/// An external quote source. Any error is treated by callers as "source
/// unavailable"; implementations do not need to classify failures.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Provenance tag attached to quotes from this provider.
    fn name(&self) -> &str;

    async fn fetch_current(&self, instrument: &str) -> Result<PriceQuote>;

    async fn fetch_history(&self, instrument: &str, range: DateRange) -> Result<PriceHistory>;
}

/// Checks an ISIN: two letters, nine alphanumerics and a Luhn check digit.
pub fn is_valid_isin(identifier: &str) -> bool {
    let code = identifier.trim().to_uppercase();
    let bytes = code.as_bytes();
    let well_formed = bytes.len() == 12
        && bytes[..2].iter().all(u8::is_ascii_uppercase)
        && bytes[2..11]
            .iter()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        && bytes[11].is_ascii_digit();
    well_formed && luhn_checksum(&code) == 0
}

/// Luhn sum over the ISIN with letters expanded to two digits (A=10 .. Z=35).
fn luhn_checksum(code: &str) -> u32 {
    let digits: Vec<u32> = code
        .chars()
        .filter_map(|c| c.to_digit(36))
        .flat_map(|v| if v >= 10 { vec![v / 10, v % 10] } else { vec![v] })
        .collect();
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isin_detection() {
        assert!(is_valid_isin("IE00B4L5Y983"));
        assert!(is_valid_isin(" lu0274208692 "));
        assert!(!is_valid_isin("AAPL"));
        assert!(!is_valid_isin("IE00B4L5Y98X"));
        assert!(!is_valid_isin("1E00B4L5Y983"));
        assert!(!is_valid_isin(""));
    }

    #[test]
    fn test_isin_check_digit() {
        assert!(is_valid_isin("US0378331005"));
        assert!(is_valid_isin("FR0010315770"));
        // Right shape, wrong check digit
        assert!(!is_valid_isin("IE00B4L5Y984"));
        assert!(!is_valid_isin("US0378331006"));
    }

    #[test]
    fn test_date_range_contains() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        let range = DateRange::between(d(5), d(10));
        assert!(range.contains(d(5)));
        assert!(range.contains(d(10)));
        assert!(!range.contains(d(4)));
        assert!(!range.contains(d(11)));
        assert!(DateRange::full().contains(d(1)));
    }
}
