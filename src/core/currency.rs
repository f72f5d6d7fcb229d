//! Currency conversion abstractions

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait CurrencyRateProvider: Send + Sync {
    /// Returns how many units of `to` one unit of `from` buys.
    async fn get_rate(&self, from: &str, to: &str) -> Result<f64>;
}

/// Rate for converting `from` into `to`, short-circuiting identical codes.
pub async fn conversion_rate(
    provider: &dyn CurrencyRateProvider,
    from: &str,
    to: &str,
) -> Result<f64> {
    if from.eq_ignore_ascii_case(to) {
        return Ok(1.0);
    }
    let rate = provider.get_rate(&from.to_uppercase(), &to.to_uppercase()).await?;
    if !rate.is_finite() || rate <= 0.0 {
        anyhow::bail!("Invalid conversion rate {rate} for {from} -> {to}");
    }
    Ok(rate)
}
