//! Request-scoped index of full price histories.
//!
//! A [`BatchPriceCache`] is built once per aggregation call by
//! [`PriceService::fetch_batch_historical_prices`](crate::core::pricing::PriceService::fetch_batch_historical_prices)
//! and passed by reference to whatever needs historical prices during that
//! call. It is never shared between calls and has no invalidation logic.

use crate::core::price::{DailyPrice, PriceQuote};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

/// Date-ordered prices for one instrument. Dates are unique.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    currency: String,
    source: String,
    points: Vec<DailyPrice>,
}

impl PriceSeries {
    /// Builds a series from unordered provider data. Non-finite or
    /// non-positive prices are dropped; for duplicate dates the last
    /// observation wins.
    pub fn new(currency: &str, source: &str, mut points: Vec<DailyPrice>) -> Self {
        points.retain(|p| p.price.is_finite() && p.price > 0.0);
        points.sort_by_key(|p| p.date);
        let mut deduped: Vec<DailyPrice> = Vec::with_capacity(points.len());
        for point in points {
            match deduped.last_mut() {
                Some(last) if last.date == point.date => *last = point,
                _ => deduped.push(point),
            }
        }
        Self {
            currency: currency.to_string(),
            source: source.to_string(),
            points: deduped,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|p| p.date)
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn points(&self) -> &[DailyPrice] {
        &self.points
    }

    /// The price on `date`, or on the closest earlier date.
    pub fn at_or_before(&self, date: NaiveDate) -> Option<DailyPrice> {
        match self.points.binary_search_by_key(&date, |p| p.date) {
            Ok(idx) => Some(self.points[idx]),
            Err(0) => None,
            Err(idx) => Some(self.points[idx - 1]),
        }
    }
}

/// Result of a cache lookup. A miss is a signal to fall back to the
/// single-instrument cascade, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchLookup {
    Hit(PriceQuote),
    Miss,
}

impl BatchLookup {
    pub fn into_option(self) -> Option<PriceQuote> {
        match self {
            BatchLookup::Hit(quote) => Some(quote),
            BatchLookup::Miss => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchPriceCache {
    series: HashMap<String, PriceSeries>,
}

impl BatchPriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, instrument: &str, series: PriceSeries) {
        self.series.insert(instrument.to_string(), series);
    }

    pub fn contains(&self, instrument: &str) -> bool {
        self.series.contains_key(instrument)
    }

    pub fn series(&self, instrument: &str) -> Option<&PriceSeries> {
        self.series.get(instrument)
    }

    pub fn instruments(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn lookup(&self, instrument: &str, date: NaiveDate) -> BatchLookup {
        let Some(series) = self.series.get(instrument) else {
            return BatchLookup::Miss;
        };
        match series.at_or_before(date) {
            Some(point) => BatchLookup::Hit(PriceQuote {
                instrument: instrument.to_string(),
                price: point.price,
                currency: series.currency.clone(),
                as_of: point.date,
                source: series.source.clone(),
                venue: None,
            }),
            None => BatchLookup::Miss,
        }
    }
}

/// Outcome of a batch fetch: the populated cache plus a per-instrument
/// success flag so callers can report partial coverage.
#[derive(Debug, Clone, Default)]
pub struct BatchFetch {
    pub cache: BatchPriceCache,
    pub coverage: BTreeMap<String, bool>,
}

impl BatchFetch {
    pub fn failed_instruments(&self) -> Vec<&str> {
        self.coverage
            .iter()
            .filter(|(_, ok)| !**ok)
            .map(|(instrument, _)| instrument.as_str())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.coverage.values().all(|ok| *ok)
    }
}
