pub mod justetf;
pub mod util;
pub mod yahoo_finance;

pub use justetf::JustEtfProvider;
pub use yahoo_finance::{YahooCurrencyProvider, YahooFinanceProvider};
