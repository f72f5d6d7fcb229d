//! Price resolution across an ordered chain of quote providers.

use crate::core::batch::{BatchFetch, BatchLookup, BatchPriceCache, PriceSeries};
use crate::core::currency::{CurrencyRateProvider, conversion_rate};
use crate::core::error::CoreError;
use crate::core::price::{DateRange, PriceQuote, QuoteProvider};
use anyhow::{Result, anyhow};
use chrono::{Duration, NaiveDate};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_BATCH_CONCURRENCY: usize = 5;
pub const DEFAULT_LOOKBACK_DAYS: i64 = 10;

/// Where the historical cascade currently stands. The index points into the
/// provider chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CascadeStep {
    Exact(usize),
    Nearest(usize),
    Failed,
}

impl CascadeStep {
    fn start(chain_len: usize) -> Self {
        if chain_len == 0 {
            CascadeStep::Failed
        } else {
            CascadeStep::Exact(0)
        }
    }

    fn next(self, chain_len: usize) -> Self {
        match self {
            CascadeStep::Exact(i) => CascadeStep::Nearest(i),
            CascadeStep::Nearest(i) if i + 1 < chain_len => CascadeStep::Exact(i + 1),
            _ => CascadeStep::Failed,
        }
    }
}

pub struct PriceService {
    providers: Vec<Arc<dyn QuoteProvider>>,
    currency_provider: Option<Arc<dyn CurrencyRateProvider>>,
    reporting_currency: String,
    lookback_days: i64,
    concurrency: usize,
}

impl PriceService {
    /// Creates a service over `providers`, tried in the given order.
    pub fn new(providers: Vec<Arc<dyn QuoteProvider>>) -> Self {
        Self {
            providers,
            currency_provider: None,
            reporting_currency: "EUR".to_string(),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            concurrency: DEFAULT_BATCH_CONCURRENCY,
        }
    }

    pub fn with_reporting_currency(
        mut self,
        currency: &str,
        provider: Option<Arc<dyn CurrencyRateProvider>>,
    ) -> Self {
        self.reporting_currency = currency.to_uppercase();
        self.currency_provider = provider;
        self
    }

    pub fn with_lookback_days(mut self, days: i64) -> Self {
        self.lookback_days = days.max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn reporting_currency(&self) -> &str {
        &self.reporting_currency
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Latest price from the first provider that answers.
    #[instrument(skip(self))]
    pub async fn get_current_price(&self, instrument: &str) -> Result<PriceQuote, CoreError> {
        for provider in &self.providers {
            let attempt = async {
                let quote = provider.fetch_current(instrument).await?;
                ensure_usable(&quote)?;
                self.normalize(quote).await
            };
            match attempt.await {
                Ok(quote) => {
                    debug!(source = %quote.source, price = quote.price, "Resolved current price");
                    return Ok(quote);
                }
                Err(e) => debug!(provider = provider.name(), error = %e, "Source unavailable"),
            }
        }
        warn!("Current price unavailable from all sources");
        Err(CoreError::price_unavailable(instrument, None))
    }

    /// Current prices for several instruments, resolved concurrently.
    pub async fn get_current_prices(
        &self,
        instruments: &[String],
        on_done: &(dyn Fn() + Sync),
    ) -> HashMap<String, Result<PriceQuote, CoreError>> {
        let unique: BTreeSet<&String> = instruments.iter().collect();
        stream::iter(unique)
            .map(|instrument| async move {
                let result = self.get_current_price(instrument).await;
                on_done();
                (instrument.clone(), result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    /// Price on `date`, or on the nearest earlier trading day within the
    /// lookback window, walking the provider chain until one succeeds.
    #[instrument(skip(self))]
    pub async fn get_historical_price(
        &self,
        instrument: &str,
        date: NaiveDate,
    ) -> Result<PriceQuote, CoreError> {
        let chain_len = self.providers.len();
        let mut step = CascadeStep::start(chain_len);
        loop {
            let attempt = match step {
                CascadeStep::Exact(i) => self.try_exact(&*self.providers[i], instrument, date).await,
                CascadeStep::Nearest(i) => {
                    self.try_nearest(&*self.providers[i], instrument, date).await
                }
                CascadeStep::Failed => {
                    warn!("Historical price unavailable from all sources");
                    return Err(CoreError::price_unavailable(instrument, Some(date)));
                }
            };
            match attempt {
                Ok(quote) => {
                    debug!(?step, as_of = %quote.as_of, "Resolved historical price");
                    return Ok(quote);
                }
                Err(e) => debug!(?step, error = %e, "Source unavailable"),
            }
            step = step.next(chain_len);
        }
    }

    async fn try_exact(
        &self,
        provider: &dyn QuoteProvider,
        instrument: &str,
        date: NaiveDate,
    ) -> Result<PriceQuote> {
        let history = provider
            .fetch_history(instrument, DateRange::between(date, date))
            .await?;
        let point = history
            .prices
            .iter()
            .find(|p| p.date == date && p.price.is_finite() && p.price > 0.0)
            .copied()
            .ok_or_else(|| anyhow!("No price on {date}"))?;
        self.normalize(PriceQuote {
            instrument: instrument.to_string(),
            price: point.price,
            currency: history.currency,
            as_of: point.date,
            source: provider.name().to_string(),
            venue: None,
        })
        .await
    }

    async fn try_nearest(
        &self,
        provider: &dyn QuoteProvider,
        instrument: &str,
        date: NaiveDate,
    ) -> Result<PriceQuote> {
        let window = DateRange::between(
            date - Duration::days(self.lookback_days),
            date - Duration::days(1),
        );
        let history = provider.fetch_history(instrument, window).await?;
        let point = history
            .prices
            .iter()
            .filter(|p| p.date < date && window.contains(p.date))
            .filter(|p| p.price.is_finite() && p.price > 0.0)
            .max_by_key(|p| p.date)
            .copied()
            .ok_or_else(|| {
                anyhow!(
                    "No price within {} days before {date}",
                    self.lookback_days
                )
            })?;
        self.normalize(PriceQuote {
            instrument: instrument.to_string(),
            price: point.price,
            currency: history.currency,
            as_of: point.date,
            source: provider.name().to_string(),
            venue: None,
        })
        .await
    }

    /// Fetches the full available history of every instrument with at most
    /// `concurrency` requests in flight. One instrument failing only removes
    /// it from the cache.
    pub async fn fetch_batch_historical_prices(
        &self,
        instruments: &[String],
        concurrency: usize,
        on_done: &(dyn Fn() + Sync),
    ) -> BatchFetch {
        let unique: BTreeSet<&String> = instruments.iter().collect();
        info!(
            instruments = unique.len(),
            concurrency, "Fetching price histories"
        );

        let results: Vec<(String, Option<PriceSeries>)> = stream::iter(unique)
            .map(|instrument| async move {
                let series = match self.fetch_series(instrument).await {
                    Ok(series) => Some(series),
                    Err(e) => {
                        warn!(instrument = %instrument, error = %e, "History unavailable");
                        None
                    }
                };
                on_done();
                (instrument.clone(), series)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut fetch = BatchFetch::default();
        for (instrument, series) in results {
            fetch.coverage.insert(instrument.clone(), series.is_some());
            if let Some(series) = series {
                fetch.cache.insert(&instrument, series);
            }
        }
        fetch
    }

    async fn fetch_series(&self, instrument: &str) -> Result<PriceSeries> {
        let mut last_error = anyhow!("No quote providers configured");
        for provider in &self.providers {
            let attempt = async {
                let history = provider.fetch_history(instrument, DateRange::full()).await?;
                let rate = self.rate_to_reporting(&history.currency).await?;
                let points = history
                    .prices
                    .into_iter()
                    .map(|mut p| {
                        p.price *= rate;
                        p
                    })
                    .collect();
                let series = PriceSeries::new(&self.reporting_currency, provider.name(), points);
                if series.is_empty() {
                    return Err(anyhow!("Empty price history"));
                }
                Ok::<_, anyhow::Error>(series)
            };
            match attempt.await {
                Ok(series) => {
                    debug!(instrument, provider = provider.name(), points = series.len(), "Fetched history");
                    return Ok(series);
                }
                Err(e) => {
                    debug!(instrument, provider = provider.name(), error = %e, "Source unavailable");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Pure lookup into a batch cache; a miss tells the caller to fall back
    /// to [`get_historical_price`](Self::get_historical_price).
    pub fn get_historical_price_from_batch(
        &self,
        cache: &BatchPriceCache,
        instrument: &str,
        date: NaiveDate,
    ) -> BatchLookup {
        cache.lookup(instrument, date)
    }

    /// Batch lookup first, then the single-instrument cascade.
    pub async fn resolve_historical_price(
        &self,
        cache: &BatchPriceCache,
        instrument: &str,
        date: NaiveDate,
    ) -> Result<PriceQuote, CoreError> {
        match self.get_historical_price_from_batch(cache, instrument, date) {
            BatchLookup::Hit(quote) => Ok(quote),
            BatchLookup::Miss => {
                debug!(instrument, %date, "Batch miss, falling back to cascade");
                self.get_historical_price(instrument, date).await
            }
        }
    }

    async fn rate_to_reporting(&self, currency: &str) -> Result<f64> {
        if currency.eq_ignore_ascii_case(&self.reporting_currency) {
            return Ok(1.0);
        }
        let provider = self.currency_provider.as_deref().ok_or_else(|| {
            anyhow!(
                "No currency provider to convert {currency} to {}",
                self.reporting_currency
            )
        })?;
        conversion_rate(provider, currency, &self.reporting_currency).await
    }

    async fn normalize(&self, quote: PriceQuote) -> Result<PriceQuote> {
        if quote.currency.eq_ignore_ascii_case(&self.reporting_currency) {
            return Ok(quote);
        }
        let rate = self.rate_to_reporting(&quote.currency).await?;
        Ok(PriceQuote {
            price: quote.price * rate,
            currency: self.reporting_currency.clone(),
            source: format!("{} ({})", quote.source, self.reporting_currency),
            ..quote
        })
    }
}

fn ensure_usable(quote: &PriceQuote) -> Result<()> {
    if quote.price.is_finite() && quote.price > 0.0 {
        Ok(())
    } else {
        Err(anyhow!("Unusable price {} for {}", quote.price, quote.instrument))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::price::{DailyPrice, PriceHistory};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// In-memory provider with canned histories and call recording.
    pub(crate) struct MockQuoteProvider {
        name: String,
        currency: String,
        current: HashMap<String, f64>,
        history: HashMap<String, Vec<DailyPrice>>,
        failing: bool,
        venue: Option<String>,
        pub(crate) history_calls: Mutex<Vec<(String, DateRange)>>,
        pub(crate) current_calls: AtomicUsize,
    }

    impl MockQuoteProvider {
        pub(crate) fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                currency: "EUR".to_string(),
                current: HashMap::new(),
                history: HashMap::new(),
                failing: false,
                venue: None,
                history_calls: Mutex::new(Vec::new()),
                current_calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn failing(name: &str) -> Self {
            Self {
                failing: true,
                ..Self::new(name)
            }
        }

        pub(crate) fn in_currency(mut self, currency: &str) -> Self {
            self.currency = currency.to_string();
            self
        }

        pub(crate) fn with_current(mut self, instrument: &str, price: f64) -> Self {
            self.current.insert(instrument.to_string(), price);
            self
        }

        pub(crate) fn with_venue(mut self, venue: &str) -> Self {
            self.venue = Some(venue.to_string());
            self
        }

        pub(crate) fn with_history(mut self, instrument: &str, points: &[(NaiveDate, f64)]) -> Self {
            self.history.insert(
                instrument.to_string(),
                points
                    .iter()
                    .map(|(date, price)| DailyPrice {
                        date: *date,
                        price: *price,
                    })
                    .collect(),
            );
            self
        }

        pub(crate) fn history_call_count(&self) -> usize {
            self.history_calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl QuoteProvider for MockQuoteProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch_current(&self, instrument: &str) -> Result<PriceQuote> {
            self.current_calls.fetch_add(1, Ordering::SeqCst);
            if self.failing {
                return Err(anyhow!("{} is down", self.name));
            }
            let price = self
                .current
                .get(instrument)
                .ok_or_else(|| anyhow!("Unknown instrument {instrument}"))?;
            Ok(PriceQuote {
                instrument: instrument.to_string(),
                price: *price,
                currency: self.currency.clone(),
                as_of: date(2024, 12, 31),
                source: self.name.clone(),
                venue: self.venue.clone(),
            })
        }

        async fn fetch_history(&self, instrument: &str, range: DateRange) -> Result<PriceHistory> {
            self.history_calls
                .lock()
                .unwrap()
                .push((instrument.to_string(), range));
            if self.failing {
                return Err(anyhow!("{} is down", self.name));
            }
            let prices = self
                .history
                .get(instrument)
                .map(|points| {
                    points
                        .iter()
                        .filter(|p| range.contains(p.date))
                        .copied()
                        .collect()
                })
                .unwrap_or_default();
            Ok(PriceHistory {
                currency: self.currency.clone(),
                prices,
            })
        }
    }

    struct FixedRate(f64);

    #[async_trait]
    impl CurrencyRateProvider for FixedRate {
        async fn get_rate(&self, _from: &str, _to: &str) -> Result<f64> {
            Ok(self.0)
        }
    }

    fn service(providers: Vec<Arc<dyn QuoteProvider>>) -> PriceService {
        PriceService::new(providers)
    }

    #[test]
    fn test_cascade_transitions() {
        let mut step = CascadeStep::start(2);
        let mut visited = vec![step];
        while step != CascadeStep::Failed {
            step = step.next(2);
            visited.push(step);
        }
        assert_eq!(
            visited,
            vec![
                CascadeStep::Exact(0),
                CascadeStep::Nearest(0),
                CascadeStep::Exact(1),
                CascadeStep::Nearest(1),
                CascadeStep::Failed,
            ]
        );
        assert_eq!(CascadeStep::start(0), CascadeStep::Failed);
    }

    #[tokio::test]
    async fn test_current_price_uses_priority_order() {
        let primary = Arc::new(MockQuoteProvider::failing("primary"));
        let secondary = Arc::new(MockQuoteProvider::new("secondary").with_current("AAPL", 150.0));
        let svc = service(vec![primary.clone(), secondary.clone()]);

        let quote = svc.get_current_price("AAPL").await.unwrap();
        assert_eq!(quote.price, 150.0);
        assert_eq!(quote.source, "secondary");
        assert_eq!(primary.current_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_current_price_unavailable_when_all_fail() {
        let svc = service(vec![
            Arc::new(MockQuoteProvider::failing("primary")),
            Arc::new(MockQuoteProvider::new("secondary")),
        ]);
        let err = svc.get_current_price("AAPL").await.unwrap_err();
        assert_eq!(err, CoreError::price_unavailable("AAPL", None));
    }

    #[tokio::test]
    async fn test_current_price_rejects_zero_price() {
        let svc = service(vec![
            Arc::new(MockQuoteProvider::new("primary").with_current("X", 0.0)),
            Arc::new(MockQuoteProvider::new("secondary").with_current("X", 12.0)),
        ]);
        assert_eq!(svc.get_current_price("X").await.unwrap().price, 12.0);
    }

    #[tokio::test]
    async fn test_current_price_converted_to_reporting_currency() {
        let svc = service(vec![Arc::new(
            MockQuoteProvider::new("yahoo")
                .in_currency("USD")
                .with_current("AAPL", 200.0),
        )])
        .with_reporting_currency("EUR", Some(Arc::new(FixedRate(0.5))));

        let quote = svc.get_current_price("AAPL").await.unwrap();
        assert_eq!(quote.price, 100.0);
        assert_eq!(quote.currency, "EUR");
        assert_eq!(quote.source, "yahoo (EUR)");
    }

    #[tokio::test]
    async fn test_unconvertible_currency_is_source_failure() {
        let svc = service(vec![
            Arc::new(
                MockQuoteProvider::new("yahoo")
                    .in_currency("USD")
                    .with_current("X", 200.0),
            ),
            Arc::new(MockQuoteProvider::new("justetf").with_current("X", 180.0)),
        ]);
        let quote = svc.get_current_price("X").await.unwrap();
        assert_eq!(quote.source, "justetf");
    }

    #[tokio::test]
    async fn test_historical_exact_date_from_primary() {
        let primary = Arc::new(
            MockQuoteProvider::new("primary").with_history("X", &[(date(2024, 3, 1), 50.0)]),
        );
        let secondary = Arc::new(MockQuoteProvider::new("secondary"));
        let svc = service(vec![primary.clone(), secondary.clone()]);

        let quote = svc.get_historical_price("X", date(2024, 3, 1)).await.unwrap();
        assert_eq!(quote.price, 50.0);
        assert_eq!(quote.as_of, date(2024, 3, 1));
        assert_eq!(primary.history_call_count(), 1);
        assert_eq!(secondary.history_call_count(), 0);
    }

    #[tokio::test]
    async fn test_historical_nearest_prior_trading_day() {
        let primary = Arc::new(MockQuoteProvider::new("primary").with_history(
            "X",
            &[
                (date(2024, 2, 20), 40.0),
                (date(2024, 2, 29), 48.0),
                (date(2024, 3, 4), 52.0),
            ],
        ));
        let svc = service(vec![primary.clone()]);

        // 2024-03-02 is a Saturday
        let quote = svc.get_historical_price("X", date(2024, 3, 2)).await.unwrap();
        assert_eq!(quote.price, 48.0);
        assert_eq!(quote.as_of, date(2024, 2, 29));

        let calls = primary.history_calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[1].1,
            DateRange::between(date(2024, 2, 21), date(2024, 3, 1))
        );
    }

    #[tokio::test]
    async fn test_historical_lookback_window_is_bounded() {
        let svc = service(vec![Arc::new(
            MockQuoteProvider::new("primary").with_history("X", &[(date(2024, 2, 1), 40.0)]),
        )]);
        let err = svc
            .get_historical_price("X", date(2024, 3, 1))
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::price_unavailable("X", Some(date(2024, 3, 1))));
    }

    #[tokio::test]
    async fn test_historical_falls_through_to_secondary() {
        let primary = Arc::new(MockQuoteProvider::failing("primary"));
        let secondary = Arc::new(
            MockQuoteProvider::new("secondary").with_history("X", &[(date(2024, 2, 28), 47.0)]),
        );
        let svc = service(vec![primary.clone(), secondary.clone()]);

        let quote = svc.get_historical_price("X", date(2024, 3, 1)).await.unwrap();
        assert_eq!(quote.source, "secondary");
        assert_eq!(quote.price, 47.0);
        // exact + nearest on each provider
        assert_eq!(primary.history_call_count(), 2);
        assert_eq!(secondary.history_call_count(), 2);
    }

    #[tokio::test]
    async fn test_batch_fetch_isolates_failures() {
        let provider = Arc::new(
            MockQuoteProvider::new("primary")
                .with_history("A", &[(date(2024, 1, 2), 10.0), (date(2024, 1, 3), 11.0)])
                .with_history("B", &[]),
        );
        let svc = service(vec![provider]);
        let instruments = vec!["A".to_string(), "B".to_string(), "C".to_string()];

        let fetch = svc
            .fetch_batch_historical_prices(&instruments, 2, &|| ())
            .await;
        assert_eq!(fetch.coverage.get("A"), Some(&true));
        assert_eq!(fetch.coverage.get("B"), Some(&false));
        assert_eq!(fetch.coverage.get("C"), Some(&false));
        assert!(fetch.cache.contains("A"));
        assert!(!fetch.cache.contains("B"));
        assert_eq!(fetch.failed_instruments(), vec!["B", "C"]);
    }

    #[tokio::test]
    async fn test_batch_fetch_is_idempotent() {
        let provider = Arc::new(
            MockQuoteProvider::new("primary")
                .with_history("A", &[(date(2024, 1, 2), 10.0), (date(2024, 1, 3), 11.0)])
                .with_history("B", &[(date(2024, 1, 2), 20.0)]),
        );
        let svc = service(vec![provider]);
        let instruments = vec!["B".to_string(), "A".to_string(), "A".to_string()];

        let first = svc.fetch_batch_historical_prices(&instruments, 5, &|| ()).await;
        let second = svc.fetch_batch_historical_prices(&instruments, 1, &|| ()).await;
        assert_eq!(first.cache, second.cache);
        assert_eq!(first.coverage, second.coverage);
    }

    #[tokio::test]
    async fn test_batch_fetch_reports_progress_per_instrument() {
        let svc = service(vec![Arc::new(MockQuoteProvider::new("primary"))]);
        let counter = AtomicUsize::new(0);
        let instruments = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        svc.fetch_batch_historical_prices(&instruments, 2, &|| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_resolve_historical_prefers_batch_then_cascade() {
        let provider = Arc::new(
            MockQuoteProvider::new("primary").with_history("A", &[(date(2024, 1, 2), 10.0)]),
        );
        let svc = service(vec![provider.clone()]);
        let fetch = svc
            .fetch_batch_historical_prices(&["A".to_string()], 5, &|| ())
            .await;
        let calls_after_batch = provider.history_call_count();

        let hit = svc
            .resolve_historical_price(&fetch.cache, "A", date(2024, 1, 10))
            .await
            .unwrap();
        assert_eq!(hit.price, 10.0);
        assert_eq!(provider.history_call_count(), calls_after_batch);

        // before the first cached date: batch miss, cascade also fails
        let miss = svc
            .resolve_historical_price(&fetch.cache, "A", date(2023, 12, 1))
            .await;
        assert!(miss.is_err());
        assert!(provider.history_call_count() > calls_after_batch);
    }

    #[tokio::test]
    async fn test_current_prices_map() {
        let svc = service(vec![Arc::new(
            MockQuoteProvider::new("primary")
                .with_current("A", 1.0)
                .with_current("B", 2.0),
        )]);
        let prices = svc
            .get_current_prices(&["A".to_string(), "B".to_string(), "Z".to_string()], &|| ())
            .await;
        assert_eq!(prices.len(), 3);
        assert_eq!(prices["A"].as_ref().unwrap().price, 1.0);
        assert!(prices["Z"].is_err());
    }
}
