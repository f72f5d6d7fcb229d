use anyhow::Result;
use chrono::NaiveDate;
use clap::{CommandFactory, Parser, Subcommand};
use valorem::cli::setup::{setup, setup_at_path};
use valorem::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    /// Print results as JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Display positions, performance and tax scenarios
    Summary,
    /// Display one position with its month-end value history
    Position {
        /// ISIN or ticker symbol
        instrument: String,
    },
    /// Display month-end invested capital and value of the whole portfolio
    History,
    /// Look up the price of an instrument
    Price {
        /// ISIN or ticker symbol
        instrument: String,
        /// Date (YYYY-MM-DD); the current price when omitted
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Project the portfolio under pessimistic, normal and optimistic growth
    Project {
        /// Starting capital
        #[arg(long)]
        initial_capital: Option<f64>,
        /// Amount added every month
        #[arg(long)]
        monthly_contribution: Option<f64>,
        /// Horizon in years (1 to 50)
        #[arg(long)]
        years: Option<u32>,
        /// Annual fee rate, e.g. 0.0075 for 0.75%
        #[arg(long)]
        fee_rate: Option<f64>,
        /// Start from the current value of the portfolio
        #[arg(long, conflicts_with = "initial_capital")]
        from_portfolio: bool,
    },
}

impl From<Commands> for valorem::AppCommand {
    fn from(cmd: Commands) -> valorem::AppCommand {
        match cmd {
            Commands::Summary => valorem::AppCommand::Summary,
            Commands::Position { instrument } => valorem::AppCommand::Position { instrument },
            Commands::History => valorem::AppCommand::History,
            Commands::Price { instrument, date } => valorem::AppCommand::Price { instrument, date },
            Commands::Project {
                initial_capital,
                monthly_contribution,
                years,
                fee_rate,
                from_portfolio,
            } => valorem::AppCommand::Project {
                initial_capital,
                monthly_contribution,
                years,
                annual_fee_rate: fee_rate,
                from_portfolio,
            },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => match cli.config_path.as_deref() {
            Some(path) => setup_at_path(path),
            None => setup(),
        },
        Some(cmd) => valorem::run_command(cmd.into(), cli.config_path.as_deref(), cli.json).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
