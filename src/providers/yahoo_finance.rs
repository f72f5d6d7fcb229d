use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::core::cache::Cache;
use crate::core::currency::CurrencyRateProvider;
use crate::core::price::{DailyPrice, DateRange, PriceHistory, PriceQuote, QuoteProvider};
use crate::providers::util::{USER_AGENT, with_retry};

const NAME: &str = "Yahoo Finance";

fn timestamp_to_date(ts: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive())
}

fn date_to_timestamp(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map_or(0, |dt| dt.and_utc().timestamp())
}

/// Pairs chart timestamps with their closes, skipping empty bars.
fn extract_daily_closes(item: &PriceChartItem) -> Vec<DailyPrice> {
    let closes = item
        .indicators
        .as_ref()
        .and_then(|inds| inds.quote.first())
        .and_then(|q| q.close.as_ref());
    match (item.timestamp.as_ref(), closes) {
        (Some(timestamps), Some(closes)) => timestamps
            .iter()
            .zip(closes)
            .filter_map(|(ts, close)| {
                Some(DailyPrice {
                    date: timestamp_to_date(*ts)?,
                    price: (*close)?,
                })
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Quotes and daily closes for ticker symbols from the Yahoo Finance chart API.
pub struct YahooFinanceProvider {
    base_url: String,
    client: reqwest::Client,
    retries: usize,
    retry_delay_ms: u64,
}

impl YahooFinanceProvider {
    pub fn new(base_url: &str, retries: usize, retry_delay_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(YahooFinanceProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            retries,
            retry_delay_ms,
        })
    }

    async fn fetch_chart(&self, symbol: &str, query: &str) -> Result<PriceChartItem> {
        let url = format!("{}/v8/finance/chart/{}?{}", self.base_url, symbol, query);
        debug!("Requesting price data from {}", url);

        let response = with_retry(
            || async { self.client.get(&url).send().await?.error_for_status() },
            self.retries,
            self.retry_delay_ms,
        )
        .await
        .with_context(|| format!("Request failed for symbol: {symbol}"))?;

        let data = response
            .json::<YahooPriceResponse>()
            .await
            .with_context(|| format!("Failed to parse JSON response for {symbol}"))?;
        data.chart
            .result
            .and_then(|items| items.into_iter().next())
            .ok_or_else(|| anyhow!("No price data found for symbol: {}", symbol))
    }
}

#[derive(Deserialize, Debug)]
struct YahooPriceResponse {
    chart: PriceChartResult,
}

#[derive(Deserialize, Debug)]
struct PriceChartResult {
    result: Option<Vec<PriceChartItem>>,
}

#[derive(Deserialize, Debug)]
struct Indicators {
    quote: Vec<Quote>,
}

#[derive(Deserialize, Debug)]
struct Quote {
    close: Option<Vec<Option<f64>>>,
}

#[derive(Deserialize, Debug)]
struct PriceChartItem {
    meta: PriceChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: Option<Indicators>,
}

#[derive(Deserialize, Debug)]
struct PriceChartMeta {
    #[serde(alias = "regularMarketPrice")]
    regular_market_price: Option<f64>,
    #[serde(alias = "regularMarketTime")]
    regular_market_time: Option<i64>,
    currency: Option<String>,
    #[serde(alias = "exchangeName")]
    exchange_name: Option<String>,
}

#[async_trait]
impl QuoteProvider for YahooFinanceProvider {
    fn name(&self) -> &str {
        NAME
    }

    #[instrument(name = "YahooPriceFetch", skip(self), fields(symbol = %symbol))]
    async fn fetch_current(&self, symbol: &str) -> Result<PriceQuote> {
        let item = self.fetch_chart(symbol, "interval=1d&range=5d").await?;

        let closes = extract_daily_closes(&item);
        let (price, as_of) = match item.meta.regular_market_price {
            Some(price) => {
                let as_of = item
                    .meta
                    .regular_market_time
                    .and_then(timestamp_to_date)
                    .unwrap_or_else(|| Local::now().date_naive());
                (price, as_of)
            }
            None => closes
                .last()
                .map(|p| (p.price, p.date))
                .ok_or_else(|| anyhow!("No market price for symbol: {}", symbol))?,
        };
        let currency = item
            .meta
            .currency
            .ok_or_else(|| anyhow!("No currency for symbol: {}", symbol))?;

        Ok(PriceQuote {
            instrument: symbol.to_string(),
            price,
            currency: currency.to_uppercase(),
            as_of,
            source: NAME.to_string(),
            venue: item.meta.exchange_name,
        })
    }

    #[instrument(name = "YahooHistoryFetch", skip(self), fields(symbol = %symbol))]
    async fn fetch_history(&self, symbol: &str, range: DateRange) -> Result<PriceHistory> {
        let query = match (range.from, range.to) {
            (None, None) => "interval=1d&range=max".to_string(),
            (from, to) => {
                let period1 = from.map_or(0, date_to_timestamp);
                // period2 is exclusive
                let period2 = date_to_timestamp(
                    to.unwrap_or_else(|| Local::now().date_naive()) + chrono::Duration::days(1),
                );
                format!("interval=1d&period1={period1}&period2={period2}")
            }
        };
        let item = self.fetch_chart(symbol, &query).await?;

        let prices: Vec<DailyPrice> = extract_daily_closes(&item)
            .into_iter()
            .filter(|p| range.contains(p.date))
            .collect();
        let currency = item
            .meta
            .currency
            .ok_or_else(|| anyhow!("No currency for symbol: {}", symbol))?;
        debug!(points = prices.len(), "Parsed Yahoo chart");

        Ok(PriceHistory {
            currency: currency.to_uppercase(),
            prices,
        })
    }
}

/// Exchange rates from Yahoo `{FROM}{TO}=X` pairs, memoized per run.
pub struct YahooCurrencyProvider {
    base_url: String,
    client: reqwest::Client,
    cache: Arc<Cache<String, f64>>,
}

impl YahooCurrencyProvider {
    pub fn new(base_url: &str, cache: Arc<Cache<String, f64>>) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(YahooCurrencyProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            cache,
        })
    }
}

#[derive(Debug, Deserialize)]
struct YahooCurrencyResponse {
    chart: CurrencyChartResult,
}

#[derive(Debug, Deserialize)]
struct CurrencyChartResult {
    result: Vec<CurrencyChartItem>,
}

#[derive(Debug, Deserialize)]
struct CurrencyChartItem {
    meta: CurrencyChartMeta,
}

#[derive(Debug, Deserialize)]
struct CurrencyChartMeta {
    #[serde(alias = "regularMarketPrice")]
    regular_market_price: f64,
}

#[async_trait]
impl CurrencyRateProvider for YahooCurrencyProvider {
    async fn get_rate(&self, from: &str, to: &str) -> Result<f64> {
        let symbol = format!("{from}{to}=X");
        if let Some(cached) = self.cache.get(&symbol).await {
            return Ok(cached);
        }

        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);
        debug!("Requesting currency rate from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| anyhow!("Request error: {} for currency pair: {}", e, symbol))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "HTTP error: {} for currency pair: {}",
                response.status(),
                symbol
            ));
        }

        let text = response.text().await?;

        let data: YahooCurrencyResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse JSON response for {}: {}", symbol, e))?;

        let item = data
            .chart
            .result
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No rate data found for currency pair: {}", symbol))?;

        let rate = item.meta.regular_market_price;
        self.cache.put(symbol, rate).await;
        Ok(rate)
    }
}
