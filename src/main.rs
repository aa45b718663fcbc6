//! PataBima CLI application
//!
//! Diagnostic command-line interface over the client library: session
//! login, arbitrary backend requests with candidate probing, and session
//! state inspection.

use std::process;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use patabima_client::cli::{Cli, Commands};
use patabima_client::constants::logging;
use patabima_client::errors::Result;

#[tokio::main]
async fn main() {
    let result = run().await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();

    init_logging(&cli);

    info!("PataBima client v{} starting", env!("CARGO_PKG_VERSION"));

    let config_path = cli.global.config.clone();
    match cli.command {
        Commands::Login(args) => patabima_client::cli::handle_login(args, config_path).await,
        Commands::Request(args) => patabima_client::cli::handle_request(args, config_path).await,
        Commands::Status => patabima_client::cli::handle_status(config_path).await,
        Commands::Logout => patabima_client::cli::handle_logout(config_path).await,
    }
}

/// Initialize logging based on verbosity flags; RUST_LOG overrides both
fn init_logging(cli: &Cli) {
    let filter = if cli.global.very_verbose {
        EnvFilter::new("patabima_client=debug")
    } else if cli.global.verbose {
        EnvFilter::new("patabima_client=info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(logging::DEFAULT_LOG_FILTER))
    };

    fmt().with_env_filter(filter).with_target(false).init();
}
