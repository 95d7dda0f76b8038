//! Runtime configuration from command-line flags and environment

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "accessflow")]
#[command(about = "Role access requests with unanimous approver consensus")]
#[command(version)]
pub struct Config {
    /// SQLite database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:accessflow.db")]
    pub database_url: String,

    /// Maximum pooled database connections
    #[arg(long, env = "ACCESSFLOW_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Apply pending database migrations (default)
    Migrate,
    /// Migrate, then load the sample organisation into an empty database
    Seed,
}

impl Config {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Migrate)
    }
}
