use crate::core::fiscal::{TaxRegime, default_regimes};
use crate::core::pricing::{DEFAULT_BATCH_CONCURRENCY, DEFAULT_LOOKBACK_DAYS};
use crate::core::projection::{
    DEFAULT_FEE_RATE, DEFAULT_INITIAL_CAPITAL, DEFAULT_MONTHLY_CONTRIBUTION, DEFAULT_YEARS,
    ProjectionParams, Scenario, default_scenarios,
};
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};
use tracing::debug;

pub const DEFAULT_JUSTETF_URL: &str = "https://www.justetf.com";
pub const DEFAULT_YAHOO_URL: &str = "https://query1.finance.yahoo.com";

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("fr", "valorem", "valorem").context("Could not determine project directories")
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct LedgerConfig {
    /// JSON ledger file. Defaults to `ledger.json` in the data directory.
    pub path: Option<String>,
    #[serde(default = "default_owner")]
    pub owner: String,
}

fn default_owner() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub justetf: Option<ProviderConfig>,
    pub yahoo: Option<ProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            justetf: Some(ProviderConfig {
                base_url: DEFAULT_JUSTETF_URL.to_string(),
            }),
            yahoo: Some(ProviderConfig {
                base_url: DEFAULT_YAHOO_URL.to_string(),
            }),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PricingConfig {
    pub concurrency: usize,
    pub lookback_days: i64,
    pub retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_BATCH_CONCURRENCY,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            retries: 2,
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ProjectionConfig {
    pub initial_capital: f64,
    pub monthly_contribution: f64,
    pub years: u32,
    pub annual_fee_rate: f64,
    pub scenarios: Vec<Scenario>,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            monthly_contribution: DEFAULT_MONTHLY_CONTRIBUTION,
            years: DEFAULT_YEARS,
            annual_fee_rate: DEFAULT_FEE_RATE,
            scenarios: default_scenarios(),
        }
    }
}

impl ProjectionConfig {
    pub fn params(&self) -> ProjectionParams {
        ProjectionParams {
            initial_capital: self.initial_capital,
            monthly_contribution: self.monthly_contribution,
            years: self.years,
            annual_fee_rate: self.annual_fee_rate,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default = "default_regimes")]
    pub fiscal: Vec<TaxRegime>,
    #[serde(default)]
    pub projection: ProjectionConfig,
}

fn default_currency() -> String {
    "EUR".to_string()
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join("config.yaml"))
    }

    pub fn ledger_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.ledger.path {
            return Ok(PathBuf::from(custom_path));
        }
        Ok(project_dirs()?.data_dir().join("ledger.json"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }
}
