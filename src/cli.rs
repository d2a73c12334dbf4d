use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "user-api", version, about = "User API with request-scoped structured logging")]
pub struct Cli {
    /// Configuration file path (extension optional)
    #[arg(short, long, default_value = "config", global = true, env = "USER_API_CONFIG")]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the API server (default)
    Start,

    /// Test configuration file validity
    Test,

    /// Show version information
    Version,
}

impl Cli {
    /// Get the command to execute, defaulting to Start if none provided
    pub fn get_command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Start)
    }
}
