//! Position aggregation from the raw transaction ledger.
//!
//! Each instrument is walked in chronological order with a running
//! weighted-average cost basis. Acquisitions move the average; disposals
//! only reduce the quantity, and a position that reaches zero starts over
//! with a zero basis. A disposal larger than the held quantity fails that
//! instrument alone with [`CoreError::NegativePosition`].

use crate::core::error::CoreError;
use crate::core::fiscal::{FiscalScenario, TaxRegime, fiscal_scenarios};
use crate::core::ledger::{Transaction, sort_chronologically};
use crate::core::performance::{CashFlow, PerformanceMetrics};
use crate::core::price::PriceQuote;
use crate::core::pricing::PriceService;
use chrono::{Datelike, Local, Months, NaiveDate};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

const QUANTITY_EPSILON: f64 = 1e-9;

/// Running state of one instrument while its transactions are replayed.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionBook {
    pub instrument: String,
    pub quantity: f64,
    pub average_cost: f64,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    /// Transactions applied so far, skipped zero quantities excluded.
    pub transaction_count: usize,
}

impl PositionBook {
    pub fn new(instrument: &str) -> Self {
        Self {
            instrument: instrument.to_string(),
            quantity: 0.0,
            average_cost: 0.0,
            first_date: None,
            last_date: None,
            transaction_count: 0,
        }
    }

    /// Applies one transaction. On error the book is left untouched.
    pub fn apply(&mut self, tx: &Transaction) -> Result<(), CoreError> {
        if tx.quantity == 0.0 || !tx.quantity.is_finite() {
            warn!(instrument = %self.instrument, date = %tx.date, "Skipping transaction without quantity");
            return Ok(());
        }

        if tx.is_acquisition() {
            let quantity = self.quantity + tx.quantity;
            self.average_cost =
                (self.average_cost * self.quantity + tx.total_price.abs()) / quantity;
            self.quantity = quantity;
        } else {
            let requested = -tx.quantity;
            if requested > self.quantity + QUANTITY_EPSILON {
                return Err(CoreError::NegativePosition {
                    instrument: self.instrument.clone(),
                    date: tx.date,
                    held: self.quantity,
                    requested,
                });
            }
            self.quantity -= requested;
            if self.quantity.abs() < QUANTITY_EPSILON {
                self.quantity = 0.0;
                self.average_cost = 0.0;
            }
        }
        self.first_date.get_or_insert(tx.date);
        self.last_date = Some(tx.date);
        self.transaction_count += 1;
        Ok(())
    }

    pub fn invested_capital(&self) -> f64 {
        self.average_cost * self.quantity
    }

    pub fn is_open(&self) -> bool {
        self.quantity > 0.0
    }
}

/// Replays `transactions` (already chronological) for one instrument.
pub fn build_position(
    instrument: &str,
    transactions: &[Transaction],
) -> Result<PositionBook, CoreError> {
    let mut book = PositionBook::new(instrument);
    for tx in transactions {
        book.apply(tx)?;
    }
    Ok(book)
}

/// Groups transactions by instrument, each group in chronological order.
pub fn group_by_instrument(transactions: &[Transaction]) -> BTreeMap<String, Vec<Transaction>> {
    let mut groups: BTreeMap<String, Vec<Transaction>> = BTreeMap::new();
    for tx in transactions {
        groups.entry(tx.isin.clone()).or_default().push(tx.clone());
    }
    for group in groups.values_mut() {
        sort_chronologically(group);
    }
    groups
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionSummary {
    pub instrument: String,
    pub quantity: f64,
    pub average_cost: f64,
    pub invested_capital: f64,
    pub current_price: Option<f64>,
    pub price_as_of: Option<NaiveDate>,
    pub price_source: Option<String>,
    pub price_venue: Option<String>,
    pub current_value: Option<f64>,
    pub unrealized_pl: Option<f64>,
    /// Unrealized P/L as a percentage of invested capital.
    pub unrealized_pl_pct: Option<f64>,
    pub transaction_count: usize,
    pub first_transaction: Option<NaiveDate>,
    pub last_transaction: Option<NaiveDate>,
}

impl PositionSummary {
    pub fn new(book: &PositionBook, quote: Option<&PriceQuote>) -> Self {
        let invested_capital = book.invested_capital();
        let current_value = quote.map(|q| q.price * book.quantity);
        let unrealized_pl = current_value.map(|v| v - invested_capital);
        Self {
            instrument: book.instrument.clone(),
            quantity: book.quantity,
            average_cost: book.average_cost,
            invested_capital,
            current_price: quote.map(|q| q.price),
            price_as_of: quote.map(|q| q.as_of),
            price_source: quote.map(|q| q.source.clone()),
            price_venue: quote.and_then(|q| q.venue.clone()),
            current_value,
            unrealized_pl,
            unrealized_pl_pct: unrealized_pl
                .filter(|_| invested_capital > 0.0)
                .map(|pl| pl / invested_capital * 100.0),
            transaction_count: book.transaction_count,
            first_transaction: book.first_date,
            last_transaction: book.last_date,
        }
    }

    pub fn is_priced(&self) -> bool {
        self.current_value.is_some()
    }
}

/// An instrument left out of the portfolio because its ledger is inconsistent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerIssue {
    pub instrument: String,
    #[serde(serialize_with = "serialize_error")]
    pub error: CoreError,
}

fn serialize_error<S: Serializer>(error: &CoreError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSummary {
    pub as_of: NaiveDate,
    pub currency: String,
    pub positions: Vec<PositionSummary>,
    pub ledger_errors: Vec<LedgerIssue>,
    /// Open positions whose current price could not be resolved. They carry
    /// no value and are left out of the metrics and cash flows.
    pub unpriced: Vec<String>,
    /// Transactions behind the valid instruments, closed ones included.
    pub transaction_count: usize,
    pub metrics: PerformanceMetrics,
    pub fiscal_scenarios: Vec<FiscalScenario>,
    pub cash_flows: Vec<CashFlow>,
}

pub async fn get_portfolio_summary(
    transactions: &[Transaction],
    pricing: &PriceService,
    regimes: &[TaxRegime],
) -> PortfolioSummary {
    summarize_as_of(
        transactions,
        pricing,
        regimes,
        Local::now().date_naive(),
        &|| {},
    )
    .await
}

/// Builds the summary with the terminal cash flow dated `as_of`. `on_priced`
/// is called once per instrument whose current price has been looked up.
#[instrument(skip_all, fields(transactions = transactions.len(), %as_of))]
pub async fn summarize_as_of(
    transactions: &[Transaction],
    pricing: &PriceService,
    regimes: &[TaxRegime],
    as_of: NaiveDate,
    on_priced: &(dyn Fn() + Sync),
) -> PortfolioSummary {
    let groups = group_by_instrument(transactions);

    let mut books = Vec::new();
    let mut ledger_errors = Vec::new();
    for (instrument, txs) in &groups {
        match build_position(instrument, txs) {
            Ok(book) => books.push((book, txs)),
            Err(error) => {
                warn!(%instrument, %error, "Excluding instrument with inconsistent ledger");
                ledger_errors.push(LedgerIssue {
                    instrument: instrument.clone(),
                    error,
                });
            }
        }
    }

    let open: Vec<String> = books
        .iter()
        .filter(|(book, _)| book.is_open())
        .map(|(book, _)| book.instrument.clone())
        .collect();
    let quotes = pricing.get_current_prices(&open, on_priced).await;

    let mut positions = Vec::new();
    let mut unpriced = Vec::new();
    let mut cash_flows = Vec::new();
    for (book, txs) in &books {
        if book.is_open() {
            let quote = match quotes.get(&book.instrument) {
                Some(Ok(quote)) => Some(quote),
                Some(Err(error)) => {
                    warn!(instrument = %book.instrument, %error, "Position left unpriced");
                    None
                }
                None => None,
            };
            let position = PositionSummary::new(book, quote);
            let priced = position.is_priced();
            positions.push(position);
            if !priced {
                unpriced.push(book.instrument.clone());
                continue;
            }
        }
        cash_flows.extend(transaction_flows(txs));
    }

    let transaction_count = books.iter().map(|(book, _)| book.transaction_count).sum();
    let priced = positions.iter().filter(|p| p.is_priced());
    let invested_capital: f64 = priced.clone().map(|p| p.invested_capital).sum();
    let current_value: f64 = priced.filter_map(|p| p.current_value).sum();
    if current_value > 0.0 {
        cash_flows.push(CashFlow::new(as_of, current_value));
    }
    cash_flows.sort_by_key(|f| f.date);

    let metrics = PerformanceMetrics::new(invested_capital, current_value, &cash_flows);
    let fiscal_scenarios = fiscal_scenarios(metrics.absolute_pl, current_value, regimes);
    info!(
        positions = positions.len(),
        unpriced = unpriced.len(),
        ledger_errors = ledger_errors.len(),
        current_value,
        "Portfolio summarized"
    );

    PortfolioSummary {
        as_of,
        currency: pricing.reporting_currency().to_string(),
        positions,
        ledger_errors,
        unpriced,
        transaction_count,
        metrics,
        fiscal_scenarios,
        cash_flows,
    }
}

/// Acquisitions are money going in, disposals money coming out.
fn transaction_flows(transactions: &[Transaction]) -> impl Iterator<Item = CashFlow> + '_ {
    transactions
        .iter()
        .filter(|tx| tx.quantity != 0.0 && tx.quantity.is_finite())
        .map(|tx| {
            let amount = if tx.is_acquisition() {
                -tx.total_price.abs()
            } else {
                tx.total_price.abs()
            };
            CashFlow::new(tx.date, amount)
        })
}

/// A dated point of a historical value series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValuationPoint {
    pub date: NaiveDate,
    pub quantity: Option<f64>,
    pub invested_capital: f64,
    /// Absent when the price of at least one held instrument is missing.
    pub market_value: Option<f64>,
    pub missing: Vec<String>,
}

/// Last day of every month from `from`'s month to `to`'s month. The final
/// point is `to` itself when the month has not ended yet.
pub fn month_ends(from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let Some(mut month_start) = from.with_day0(0) else {
        return dates;
    };
    while month_start <= to {
        let Some(next_month) = month_start.checked_add_months(Months::new(1)) else {
            break;
        };
        let Some(month_end) = next_month.pred_opt() else {
            break;
        };
        dates.push(month_end.min(to));
        month_start = next_month;
    }
    dates
}

/// Advances `book` through `transactions[*cursor..]` up to and including `date`.
fn advance_to(
    book: &mut PositionBook,
    transactions: &[Transaction],
    cursor: &mut usize,
    date: NaiveDate,
) -> Result<(), CoreError> {
    while let Some(tx) = transactions.get(*cursor) {
        if tx.date > date {
            break;
        }
        book.apply(tx)?;
        *cursor += 1;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionDetail {
    pub position: PositionSummary,
    pub history: Vec<ValuationPoint>,
}

/// Position summary of one instrument plus its month-end value history.
#[instrument(skip(transactions, pricing))]
pub async fn get_position_detail(
    instrument: &str,
    transactions: &[Transaction],
    pricing: &PriceService,
    as_of: NaiveDate,
) -> Result<PositionDetail, CoreError> {
    let instrument = instrument.trim().to_uppercase();
    let mut txs: Vec<Transaction> = transactions
        .iter()
        .filter(|tx| tx.isin == instrument)
        .cloned()
        .collect();
    sort_chronologically(&mut txs);

    let book = build_position(&instrument, &txs)?;
    let quote = if book.is_open() {
        pricing
            .get_current_price(&instrument)
            .await
            .inspect_err(|e| warn!(error = %e, "Position left unpriced"))
            .ok()
    } else {
        None
    };
    let position = PositionSummary::new(&book, quote.as_ref());

    let Some(first_date) = book.first_date else {
        return Ok(PositionDetail {
            position,
            history: Vec::new(),
        });
    };

    let batch = pricing
        .fetch_batch_historical_prices(&[instrument.clone()], pricing.concurrency(), &|| {})
        .await;

    let mut history = Vec::new();
    let mut running = PositionBook::new(&instrument);
    let mut cursor = 0;
    for date in month_ends(first_date, as_of) {
        advance_to(&mut running, &txs, &mut cursor, date)?;
        let mut missing = Vec::new();
        let market_value = if running.is_open() {
            match pricing
                .resolve_historical_price(&batch.cache, &instrument, date)
                .await
            {
                Ok(quote) => Some(quote.price * running.quantity),
                Err(e) => {
                    debug!(%date, error = %e, "Missing historical point");
                    missing.push(instrument.clone());
                    None
                }
            }
        } else {
            Some(0.0)
        };
        history.push(ValuationPoint {
            date,
            quantity: Some(running.quantity),
            invested_capital: running.invested_capital(),
            market_value,
            missing,
        });
    }

    Ok(PositionDetail { position, history })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyValues {
    pub currency: String,
    pub points: Vec<ValuationPoint>,
    pub ledger_errors: Vec<LedgerIssue>,
    /// Instruments without a cached history; their points went through the
    /// single-instrument fallback.
    pub uncached: Vec<String>,
}

/// Month-end invested capital and market value of the whole portfolio, from
/// the month of the first transaction to `as_of`.
#[instrument(skip_all, fields(transactions = transactions.len(), %as_of))]
pub async fn get_monthly_portfolio_values(
    transactions: &[Transaction],
    pricing: &PriceService,
    as_of: NaiveDate,
    on_fetched: &(dyn Fn() + Sync),
) -> MonthlyValues {
    let groups = group_by_instrument(transactions);

    let mut valid = BTreeMap::new();
    let mut ledger_errors = Vec::new();
    for (instrument, txs) in groups {
        match build_position(&instrument, &txs) {
            Ok(_) => {
                valid.insert(instrument, txs);
            }
            Err(error) => {
                warn!(%instrument, %error, "Excluding instrument with inconsistent ledger");
                ledger_errors.push(LedgerIssue { instrument, error });
            }
        }
    }

    let instruments: Vec<String> = valid.keys().cloned().collect();
    let batch = pricing
        .fetch_batch_historical_prices(&instruments, pricing.concurrency(), on_fetched)
        .await;

    let first_date = valid.values().filter_map(|txs| txs.first()).map(|tx| tx.date).min();
    let dates = first_date.map_or_else(Vec::new, |first| month_ends(first, as_of));

    let mut states: Vec<(PositionBook, &[Transaction], usize)> = valid
        .iter()
        .map(|(instrument, txs)| (PositionBook::new(instrument), txs.as_slice(), 0))
        .collect();

    let mut points = Vec::with_capacity(dates.len());
    for date in dates {
        let mut invested_capital = 0.0;
        let mut value = 0.0;
        let mut missing = Vec::new();
        for (book, txs, cursor) in states.iter_mut() {
            // Already validated by the full replay above
            if advance_to(book, txs, cursor, date).is_err() || !book.is_open() {
                continue;
            }
            invested_capital += book.invested_capital();
            match pricing
                .resolve_historical_price(&batch.cache, &book.instrument, date)
                .await
            {
                Ok(quote) => value += quote.price * book.quantity,
                Err(e) => {
                    debug!(%date, error = %e, "Missing historical point");
                    missing.push(book.instrument.clone());
                }
            }
        }
        points.push(ValuationPoint {
            date,
            quantity: None,
            invested_capital,
            market_value: missing.is_empty().then_some(value),
            missing,
        });
    }

    MonthlyValues {
        currency: pricing.reporting_currency().to_string(),
        points,
        ledger_errors,
        uncached: batch
            .failed_instruments()
            .into_iter()
            .map(str::to_string)
            .collect(),
    }
}
