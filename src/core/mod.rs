//! Valuation engine: pricing, aggregation, performance, tax and projection.

pub mod batch;
pub mod cache;
pub mod config;
pub mod currency;
pub mod error;
pub mod fiscal;
pub mod ledger;
pub mod log;
pub mod performance;
pub mod portfolio;
pub mod price;
pub mod pricing;
pub mod projection;

// Re-export main types for cleaner imports
pub use batch::{BatchFetch, BatchLookup, BatchPriceCache};
pub use currency::CurrencyRateProvider;
pub use error::CoreError;
pub use ledger::{JsonFileLedger, Ledger, Transaction};
pub use price::{DateRange, PriceQuote, QuoteProvider};
pub use pricing::PriceService;
