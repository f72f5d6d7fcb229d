use crate::core::price::{DailyPrice, DateRange, PriceHistory, PriceQuote, QuoteProvider, is_valid_isin};
use crate::providers::util::{USER_AGENT, with_retry};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

const NAME: &str = "JustETF";
/// JustETF quotes are requested in euros.
const QUOTE_CURRENCY: &str = "EUR";
const EARLIEST_DATE: &str = "2000-01-01";

/// ETF quotes and daily history from JustETF. Only ISINs are served; any
/// other identifier is rejected before a request is made.
pub struct JustEtfProvider {
    base_url: String,
    client: reqwest::Client,
    retries: usize,
    retry_delay_ms: u64,
}

impl JustEtfProvider {
    pub fn new(base_url: &str, retries: usize, retry_delay_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            retries,
            retry_delay_ms,
        })
    }

    fn isin(instrument: &str) -> Result<String> {
        if !is_valid_isin(instrument) {
            bail!("{NAME} only serves ISINs, got {instrument}");
        }
        Ok(instrument.trim().to_uppercase())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, isin: &str) -> Result<T> {
        debug!("Requesting {}", url);
        let response = with_retry(
            || async move {
                self.client
                    .get(url)
                    .header("Accept", "application/json")
                    .send()
                    .await?
                    .error_for_status()
            },
            self.retries,
            self.retry_delay_ms,
        )
        .await
        .with_context(|| format!("Failed to send request for ISIN: {isin}"))?;

        let text = response
            .text()
            .await
            .with_context(|| format!("Failed to get response text for ISIN: {isin}"))?;
        if text.trim().is_empty() {
            return Err(anyhow!("Received empty response for ISIN: {}", isin));
        }
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse {NAME} response for ISIN: {isin}"))
    }
}

#[derive(Debug, Deserialize)]
struct RawValue {
    raw: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    latest_quote: Option<RawValue>,
    latest_quote_date: Option<String>,
    quote_trading_venue: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeriesPoint {
    date: Option<String>,
    value: Option<RawValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartResponse {
    #[serde(default)]
    series: Vec<SeriesPoint>,
    latest_quote: Option<RawValue>,
    latest_quote_date: Option<String>,
}

/// Dates come either as `YYYY-MM-DD` or as a longer timestamp.
fn parse_date(value: &str) -> Option<NaiveDate> {
    value
        .get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
}

#[async_trait]
impl QuoteProvider for JustEtfProvider {
    fn name(&self) -> &str {
        NAME
    }

    #[instrument(name = "JustEtfQuote", skip(self))]
    async fn fetch_current(&self, instrument: &str) -> Result<PriceQuote> {
        let isin = Self::isin(instrument)?;
        let url = format!(
            "{}/api/etfs/{}/quote?currency={}&locale=fr",
            self.base_url, isin, QUOTE_CURRENCY
        );
        let data: QuoteResponse = self.get_json(&url, &isin).await?;

        let price = data
            .latest_quote
            .and_then(|q| q.raw)
            .ok_or_else(|| anyhow!("Invalid {NAME} response for ISIN: {isin}"))?;
        let as_of = data
            .latest_quote_date
            .as_deref()
            .and_then(parse_date)
            .unwrap_or_else(|| Local::now().date_naive());

        Ok(PriceQuote {
            instrument: isin,
            price,
            currency: QUOTE_CURRENCY.to_string(),
            as_of,
            source: NAME.to_string(),
            venue: data.quote_trading_venue,
        })
    }

    #[instrument(name = "JustEtfHistory", skip(self))]
    async fn fetch_history(&self, instrument: &str, range: DateRange) -> Result<PriceHistory> {
        let isin = Self::isin(instrument)?;
        let date_from = range
            .from
            .map_or_else(|| EARLIEST_DATE.to_string(), |d| d.to_string());
        let date_to = range.to.unwrap_or_else(|| Local::now().date_naive());
        let url = format!(
            "{}/api/etfs/{}/performance-chart?locale=fr&currency={}&valuesType=MARKET_VALUE\
             &reduceData=false&includeDividends=false&dateFrom={}&dateTo={}",
            self.base_url, isin, QUOTE_CURRENCY, date_from, date_to
        );
        let data: ChartResponse = self.get_json(&url, &isin).await?;

        let mut prices: Vec<DailyPrice> = data
            .series
            .iter()
            .filter_map(|point| {
                let date = point.date.as_deref().and_then(parse_date)?;
                let price = point.value.as_ref().and_then(|v| v.raw)?;
                Some(DailyPrice { date, price })
            })
            .filter(|p| range.contains(p.date))
            .collect();

        // The latest quote is not always part of the series
        let latest = data
            .latest_quote_date
            .as_deref()
            .and_then(parse_date)
            .zip(data.latest_quote.and_then(|q| q.raw));
        if let Some((date, price)) = latest
            && range.contains(date)
            && !prices.iter().any(|p| p.date == date)
        {
            prices.push(DailyPrice { date, price });
        }

        debug!(points = prices.len(), "Parsed {} performance chart", NAME);
        Ok(PriceHistory {
            currency: QUOTE_CURRENCY.to_string(),
            prices,
        })
    }
}
