use anyhow::Result;
use colored::Colorize;
use std::sync::Arc;
use tracing::info;
use user_api::{config, observability, server};

/// Execute the start command
///
/// This will:
/// 1. Load configuration
/// 2. Open the structured logger (failure exits with status 1)
/// 3. Route ambient `tracing` events into the same sink
/// 4. Start the server
pub async fn execute(config_path: &str) -> Result<()> {
    println!("{}", "Starting user-api...".green());

    let cfg = config::load_config(config_path)?;

    let logger = match observability::StructuredLogger::init(&cfg.log) {
        Ok(logger) => Arc::new(logger),
        Err(err) => {
            eprintln!("{} {}", "Failed to initialize logger:".red(), err);
            std::process::exit(1);
        }
    };

    if let Err(err) = observability::install_global(logger.clone()) {
        eprintln!("{} {}", "Failed to install tracing subscriber:".yellow(), err);
    }

    info!(
        level = %logger.level(),
        file = %cfg.log.filename,
        "Structured logger initialized"
    );

    server::start_server(cfg, logger).await
}
