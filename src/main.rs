use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use market_pulse::cli::setup::setup;
use market_pulse::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for market_pulse::AppCommand {
    fn from(cmd: Commands) -> market_pulse::AppCommand {
        match cmd {
            Commands::Quotes => market_pulse::AppCommand::Quotes,
            Commands::History { symbol } => market_pulse::AppCommand::History { symbol },
            Commands::Sparklines => market_pulse::AppCommand::Sparklines,
            Commands::Config => market_pulse::AppCommand::Config,
            Commands::Watch { interval } => market_pulse::AppCommand::Watch {
                interval_secs: interval,
            },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Display quotes for the tracked symbol universe
    Quotes,
    /// Display recent closing prices for a symbol
    History {
        /// Symbol to look up, e.g. AAPL or ^GSPC
        symbol: String,
    },
    /// Display index sparklines
    Sparklines,
    /// Display the active symbol universe
    Config,
    /// Refresh quotes and sparklines until interrupted
    Watch {
        /// Seconds between refreshes
        #[arg(short, long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => setup(),
        Some(cmd) => {
            market_pulse::run_command(cmd.into(), cli.config_path.as_deref(), cli.json).await
        }
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
