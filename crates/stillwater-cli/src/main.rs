use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "stillwater-cli", version, about = "Stillwater gateway CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Persisted gateway state
    State {
        #[command(subcommand)]
        action: commands::state::StateAction,
    },
    /// Notification consent bookkeeping
    Consent {
        #[command(subcommand)]
        action: commands::consent::ConsentAction,
    },
    /// Persisted browser cookies
    Cookies {
        #[command(subcommand)]
        action: commands::cookies::CookiesAction,
    },
    /// Phase decision and engine runs
    Gateway {
        #[command(subcommand)]
        action: commands::gateway::GatewayAction,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Config { action } => commands::config::run(action),
        Commands::State { action } => commands::state::run(action),
        Commands::Consent { action } => commands::consent::run(action),
        Commands::Cookies { action } => commands::cookies::run(action),
        Commands::Gateway { action } => commands::gateway::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
