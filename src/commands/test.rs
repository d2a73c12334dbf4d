use anyhow::Result;
use colored::Colorize;
use user_api::{
    config,
    db::QueryLogLevel,
    observability::{Level, RotationPolicy},
};

/// Execute the test command
///
/// This validates the configuration file without starting the server
pub fn execute(config_path: &str) -> Result<()> {
    println!("{}", "Testing configuration...".yellow());

    // Load configuration (this will validate it)
    let cfg = config::load_config(config_path)?;
    let policy = RotationPolicy::from_config(&cfg.log)?;

    println!("{}", "✓ Configuration test successful".green());
    println!();

    println!("{}", "Configuration Summary:".bold());
    println!("  {}: {}:{}", "Server".cyan(), cfg.server.host, cfg.server.port);
    println!(
        "  {}: {} bytes (logged up to {})",
        "Body Limit".cyan(),
        cfg.server.max_body_bytes,
        cfg.server.log_body_max_bytes
    );
    println!();

    println!("  {}: {}", "Database".cyan(), cfg.database.url);
    println!(
        "    SQL logging: {}",
        if cfg.database.log_sql {
            format!("{:?}", QueryLogLevel::parse(&cfg.database.log_level)).green()
        } else {
            "disabled".red()
        }
    );
    println!("    Slow threshold: {} ms", cfg.database.slow_threshold_ms);
    println!();

    println!("  {}: {}", "Log Level".cyan(), Level::parse_or_default(&cfg.log.level));
    println!("    File: {}", policy.file_path_at(policy.now()).display());
    println!("    Rotate at: {} bytes", policy.max_size_bytes());
    println!(
        "    Backups: {}  Max age: {}  Compress: {}",
        if policy.max_backups == 0 {
            "unlimited".to_string()
        } else {
            policy.max_backups.to_string()
        },
        if cfg.log.max_age == 0 {
            "unlimited".to_string()
        } else {
            format!("{} days", cfg.log.max_age)
        },
        if policy.compress {
            "yes".green()
        } else {
            "no".dimmed()
        }
    );

    Ok(())
}
