pub mod cli;
pub mod core;
pub mod providers;

use crate::core::cache::Cache;
use crate::core::config::AppConfig;
use crate::core::ledger::{JsonFileLedger, Ledger, Transaction};
use crate::core::portfolio::get_portfolio_summary;
use crate::core::price::QuoteProvider;
use crate::core::pricing::PriceService;
use crate::core::{CurrencyRateProvider, projection::ProjectionParams};
use crate::providers::{JustEtfProvider, YahooCurrencyProvider, YahooFinanceProvider};
use anyhow::{Result, bail};
use chrono::{Local, NaiveDate};
use std::sync::Arc;
use tracing::{debug, info};

pub enum AppCommand {
    Summary,
    Position {
        instrument: String,
    },
    History,
    Price {
        instrument: String,
        date: Option<NaiveDate>,
    },
    Project {
        initial_capital: Option<f64>,
        monthly_contribution: Option<f64>,
        years: Option<u32>,
        annual_fee_rate: Option<f64>,
        /// Start from the current portfolio value instead of a fixed amount.
        from_portfolio: bool,
    },
}

/// Builds the provider chain from config: JustETF first, then Yahoo Finance.
pub fn build_price_service(config: &AppConfig) -> Result<PriceService> {
    let pricing = &config.pricing;
    let mut providers: Vec<Arc<dyn QuoteProvider>> = Vec::new();
    if let Some(justetf) = &config.providers.justetf {
        providers.push(Arc::new(JustEtfProvider::new(
            &justetf.base_url,
            pricing.retries,
            pricing.retry_delay_ms,
        )?));
    }

    let mut currency_provider: Option<Arc<dyn CurrencyRateProvider>> = None;
    if let Some(yahoo) = &config.providers.yahoo {
        providers.push(Arc::new(YahooFinanceProvider::new(
            &yahoo.base_url,
            pricing.retries,
            pricing.retry_delay_ms,
        )?));
        let rate_cache = Arc::new(Cache::<String, f64>::new());
        currency_provider = Some(Arc::new(YahooCurrencyProvider::new(
            &yahoo.base_url,
            rate_cache,
        )?));
    }

    if providers.is_empty() {
        bail!("No quote providers configured");
    }
    debug!(providers = providers.len(), "Built provider chain");

    Ok(PriceService::new(providers)
        .with_reporting_currency(&config.currency, currency_provider)
        .with_lookback_days(pricing.lookback_days)
        .with_concurrency(pricing.concurrency))
}

async fn load_transactions(config: &AppConfig) -> Result<Vec<Transaction>> {
    let ledger = JsonFileLedger::new(config.ledger_path()?);
    ledger.list_transactions(&config.ledger.owner).await
}

pub async fn run_command(
    command: AppCommand,
    config_path: Option<&str>,
    json: bool,
) -> Result<()> {
    info!("Valorem starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let today = Local::now().date_naive();
    match command {
        AppCommand::Summary => {
            let pricing = build_price_service(&config)?;
            let transactions = load_transactions(&config).await?;
            cli::summary::run(&transactions, &pricing, &config.fiscal, today, json).await
        }
        AppCommand::Position { instrument } => {
            let pricing = build_price_service(&config)?;
            let transactions = load_transactions(&config).await?;
            cli::position::run(&instrument, &transactions, &pricing, today, json).await
        }
        AppCommand::History => {
            let pricing = build_price_service(&config)?;
            let transactions = load_transactions(&config).await?;
            cli::history::run(&transactions, &pricing, today, json).await
        }
        AppCommand::Price { instrument, date } => {
            let pricing = build_price_service(&config)?;
            cli::price::run(&instrument, date, &pricing, json).await
        }
        AppCommand::Project {
            initial_capital,
            monthly_contribution,
            years,
            annual_fee_rate,
            from_portfolio,
        } => {
            let defaults = config.projection.params();
            let initial_capital = match (initial_capital, from_portfolio) {
                (Some(value), _) => value,
                (None, true) => {
                    let pricing = build_price_service(&config)?;
                    let transactions = load_transactions(&config).await?;
                    get_portfolio_summary(&transactions, &pricing, &config.fiscal)
                        .await
                        .metrics
                        .current_value
                }
                (None, false) => defaults.initial_capital,
            };
            let params = ProjectionParams {
                initial_capital,
                monthly_contribution: monthly_contribution
                    .unwrap_or(defaults.monthly_contribution),
                years: years.unwrap_or(defaults.years),
                annual_fee_rate: annual_fee_rate.unwrap_or(defaults.annual_fee_rate),
            };
            cli::projection::run(params, &config.projection.scenarios, &config.currency, json)
        }
    }
}
